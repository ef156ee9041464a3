// SPDX-License-Identifier: CEPL-1.0
//! Device memory: buffers, one-shot transfers and sampled textures.

use anyhow::{anyhow, Context, Result};
use ash::{vk, Instance};

use crate::swapchain::create_view;

/// A buffer and the allocation bound to it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BufferAlloc {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub host_visible: bool,
}

/// Image, memory and the view shaders sample through.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TextureAlloc {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl BufferAlloc {
    pub(crate) unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

impl TextureAlloc {
    pub(crate) unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

/// Index of the first memory type allowed by `type_bits` that has all of `req`.
pub(crate) fn pick_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && mem.memory_types[i as usize].property_flags.contains(req)
    })
}

pub(crate) unsafe fn find_memory_type(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let mem = instance.get_physical_device_memory_properties(phys);
    pick_memory_type(&mem, type_bits, req)
        .ok_or_else(|| anyhow!("no suitable memory type for {:?}", req))
}

pub(crate) unsafe fn create_buffer_and_memory(
    instance: &Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> Result<BufferAlloc> {
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = device.create_buffer(&bci, None)?;
    let req = device.get_buffer_memory_requirements(buffer);
    let mem_type = match find_memory_type(instance, phys, req.memory_type_bits, props) {
        Ok(t) => t,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(e);
        }
    };
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    let memory = match device.allocate_memory(&mai, None) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(e.into());
        }
    };
    device.bind_buffer_memory(buffer, memory, 0)?;
    Ok(BufferAlloc {
        buffer,
        memory,
        size,
        host_visible: props.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
    })
}

/// Maps `alloc`, copies `data` to offset 0 and unmaps. Memory must be host
/// coherent.
pub(crate) unsafe fn write_mapped(
    device: &ash::Device,
    alloc: &BufferAlloc,
    data: &[u8],
) -> Result<()> {
    let size = data.len() as vk::DeviceSize;
    let ptr = device.map_memory(alloc.memory, 0, size, vk::MemoryMapFlags::empty())?;
    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
    device.unmap_memory(alloc.memory);
    Ok(())
}

pub(crate) unsafe fn begin_one_shot(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer> {
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device.allocate_command_buffers(&ai)?[0];
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &bi)?;
    Ok(cmd)
}

/// Ends, submits and waits for `cmd`, then frees it.
pub(crate) unsafe fn end_one_shot(
    device: &ash::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
) -> Result<()> {
    let result = (|| -> Result<()> {
        device.end_command_buffer(cmd)?;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device.queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())?;
        // Transfers happen at load time and on resize only.
        device.queue_wait_idle(queue)?;
        Ok(())
    })();
    device.free_command_buffers(pool, std::slice::from_ref(&cmd));
    result
}

/// Copies `src_data` into device-local `dst` through a temporary staging buffer.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn upload_via_staging(
    instance: &Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    queue: vk::Queue,
    pool: vk::CommandPool,
    dst: vk::Buffer,
    src_data: &[u8],
) -> Result<()> {
    let staging = create_staging(instance, device, phys, src_data)?;
    let result = (|| -> Result<()> {
        let cmd = begin_one_shot(device, pool)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };
        device.cmd_copy_buffer(cmd, staging.buffer, dst, std::slice::from_ref(&region));
        end_one_shot(device, queue, pool, cmd)
    })();
    staging.destroy(device);
    result
}

unsafe fn create_staging(
    instance: &Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    data: &[u8],
) -> Result<BufferAlloc> {
    let staging = create_buffer_and_memory(
        instance,
        device,
        phys,
        data.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
    .context("staging buffer")?;
    if let Err(e) = write_mapped(device, &staging, data) {
        staging.destroy(device);
        return Err(e);
    }
    Ok(staging)
}

/// Access masks and stages for the two transitions a texture upload needs.
pub(crate) fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<(
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
)> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        _ => Err(anyhow!("unsupported layout transition {:?} -> {:?}", old, new)),
    }
}

pub(crate) unsafe fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let (src_access_mask, dst_access_mask, src_stage, dst_stage) = transition_masks(old, new)?;
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask,
        dst_access_mask,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[] as &[vk::MemoryBarrier],
        &[] as &[vk::BufferMemoryBarrier],
        std::slice::from_ref(&barrier),
    );
    Ok(())
}

/// Uploads RGBA8 `pixels` into a new device-local image and leaves it in
/// SHADER_READ_ONLY_OPTIMAL.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn create_texture_image(
    instance: &Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    queue: vk::Queue,
    pool: vk::CommandPool,
    extent: vk::Extent2D,
    format: vk::Format,
    pixels: &[u8],
) -> Result<TextureAlloc> {
    let staging = create_staging(instance, device, phys, pixels)?;

    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };

    let mut image = vk::Image::null();
    let mut memory = vk::DeviceMemory::null();
    let result = (|| -> Result<vk::ImageView> {
        image = device.create_image(&img_ci, None)?;
        let req = device.get_image_memory_requirements(image);
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(
                instance,
                phys,
                req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
            ..Default::default()
        };
        memory = device.allocate_memory(&mai, None)?;
        device.bind_image_memory(image, memory, 0)?;

        let cmd = begin_one_shot(device, pool)?;
        transition_image_layout(
            device,
            cmd,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        device.cmd_copy_buffer_to_image(
            cmd,
            staging.buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
        transition_image_layout(
            device,
            cmd,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        end_one_shot(device, queue, pool, cmd)?;

        create_view(device, image, format, vk::ImageAspectFlags::COLOR)
    })();
    staging.destroy(device);

    match result {
        Ok(view) => Ok(TextureAlloc {
            image,
            memory,
            view,
        }),
        Err(e) => {
            if image != vk::Image::null() {
                device.destroy_image(image, None);
            }
            if memory != vk::DeviceMemory::null() {
                device.free_memory(memory, None);
            }
            Err(e)
        }
    }
}
