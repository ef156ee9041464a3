// SPDX-License-Identifier: CEPL-1.0
//! [`VkContext`]: the Vulkan implementation of [`GraphicsContext`].
//!
//! Owns instance, surface, device, swapchain and the swapchain-scoped
//! objects (depth buffer, render pass, framebuffers, pipeline). Buffers and
//! textures handed out through the trait are tracked so their memory can be
//! found again from the opaque handle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context as _, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use inflight_render::{
    AcquiredImage, Buffer, BufferUsage, CommandBufferHandle, CommandList, CommandPoolHandle,
    DescriptorKind, DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorWrite, Extent2D, FenceHandle, FenceWait, FrameError, FrameResult, GraphicsContext,
    MemoryFlags, PipelineBinding, PresentOutcome, RenderSize, RenderTargets, SamplerHandle,
    SemaphoreHandle, SubmitInfo, Texture, TextureData, WaitStage,
};
use inflight_render::{BoundResource, Command};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::convert::*;
use crate::error::{map_setup, map_vk};
use crate::instance::{
    create_debug_messenger, create_device, create_instance, destroy_debug_messenger,
    pick_device_and_queue, DebugState, DeviceCaps,
};
use crate::memory::{
    create_buffer_and_memory, create_texture_image, upload_via_staging, write_mapped, BufferAlloc,
    TextureAlloc,
};
use crate::pipeline::{
    create_frame_set_layout, create_pipeline, create_pipeline_layout, create_texture_set_layout,
};
use crate::swapchain::{
    create_depth_buffer, create_framebuffers, create_render_pass, create_swapchain_bundle,
    pick_depth_format, DepthBuffer, SwapchainBundle, VkVsyncMode,
};

const CLEAR_DEPTH: f32 = 1.0;

/// Knobs fixed at context creation.
#[derive(Clone, Debug)]
pub struct VkOptions {
    pub app_name: String,
    pub vsync: bool,
    pub vsync_mode: VkVsyncMode,
    pub clear_color: [f32; 4],
}

impl Default for VkOptions {
    fn default() -> Self {
        Self {
            app_name: "inflight".to_string(),
            vsync: true,
            vsync_mode: VkVsyncMode::Fifo,
            clear_color: [0.02, 0.02, 0.04, 1.0],
        }
    }
}

pub struct VkContext {
    entry: Entry,
    instance: Instance,
    debug: DebugState,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    caps: DeviceCaps,

    swapchain_loader: swapchain::Device,
    swapchain: SwapchainBundle,
    depth_format: vk::Format,
    /// `None` only between teardown and rebuild inside `recreate_swapchain`.
    depth: Option<DepthBuffer>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,

    frame_set_layout: vk::DescriptorSetLayout,
    texture_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,

    // One-shot staging copies
    transfer_pool: vk::CommandPool,
    buffers: HashMap<vk::Buffer, BufferAlloc>,
    textures: HashMap<vk::Image, TextureAlloc>,

    options: VkOptions,
}

impl VkContext {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: VkOptions,
    ) -> Result<Self> {
        unsafe { build_context(window, display, size, options) }
    }

    /// Rebuilds every swapchain-scoped object for `size`. The render pass
    /// and pipeline are rebuilt only if the surface format changed. A zero
    /// size is ignored.
    pub fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        unsafe {
            // 1) Nothing may still reference the old images
            self.device.device_wait_idle()?;

            // 2) Framebuffers, views and depth belong to the old extent
            for &fb in &self.framebuffers {
                self.device.destroy_framebuffer(fb, None);
            }
            self.framebuffers.clear();
            for &iv in &self.swapchain.image_views {
                self.device.destroy_image_view(iv, None);
            }
            self.swapchain.image_views.clear();
            if let Some(depth) = self.depth.take() {
                depth.destroy(&self.device);
            }

            // 3) New swapchain, handing over the old one, then drop the old
            let old = self.swapchain.swapchain;
            let old_format = self.swapchain.format;
            let bundle = create_swapchain_bundle(
                &self.device,
                &self.surface_loader,
                &self.swapchain_loader,
                self.phys,
                self.surface,
                old,
                size,
                self.options.vsync,
                self.options.vsync_mode,
            )?;
            self.swapchain_loader.destroy_swapchain(old, None);
            self.swapchain = bundle;

            // 4) Depth for the new extent
            let depth = create_depth_buffer(
                &self.instance,
                &self.device,
                self.phys,
                self.swapchain.extent,
                self.depth_format,
            )?;
            let depth_view = depth.view;
            self.depth = Some(depth);

            // 5) Render pass + pipeline only when the colour format moved
            if self.swapchain.format != old_format {
                info!(
                    "surface format changed {:?} → {:?}; rebuilding render pass and pipeline",
                    old_format, self.swapchain.format
                );
                // nulled so a failed rebuild leaves nothing for Drop to free twice
                self.device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
                self.device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
                self.render_pass =
                    create_render_pass(&self.device, self.swapchain.format, self.depth_format)?;
                self.pipeline = create_pipeline(&self.device, self.render_pass, self.pipeline_layout)?;
            }

            // 6) Framebuffers
            self.framebuffers = create_framebuffers(
                &self.device,
                self.render_pass,
                &self.swapchain.image_views,
                depth_view,
                self.swapchain.extent,
            )?;
        }
        info!(
            "swapchain recreated: {}x{}, {} image(s)",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            self.swapchain.images.len()
        );
        Ok(())
    }

    /// Render pass, framebuffers and clear values for the current swapchain.
    pub fn render_targets(&self) -> RenderTargets {
        RenderTargets {
            render_pass: render_pass_handle(self.render_pass),
            framebuffers: self
                .framebuffers
                .iter()
                .map(|&fb| framebuffer_handle(fb))
                .collect(),
            extent: self.extent(),
            clear_color: self.options.clear_color,
            clear_depth: Some(CLEAR_DEPTH),
        }
    }

    pub fn pipeline_binding(&self) -> PipelineBinding {
        PipelineBinding {
            pipeline: pipeline_handle(self.pipeline),
            layout: pipeline_layout_handle(self.pipeline_layout),
        }
    }

    /// Layout of set 0, the per-frame uniform block.
    pub fn frame_set_layout(&self) -> DescriptorSetLayoutHandle {
        set_layout_handle(self.frame_set_layout)
    }

    /// Layout of set 1, the sampled texture.
    pub fn texture_set_layout(&self) -> DescriptorSetLayoutHandle {
        set_layout_handle(self.texture_set_layout)
    }

    pub fn extent(&self) -> Extent2D {
        core_extent(self.swapchain.extent)
    }

    /// Highest anisotropy the device accepts, `None` when unsupported.
    pub fn max_anisotropy(&self) -> Option<f32> {
        self.caps
            .sampler_anisotropy
            .then_some(self.caps.max_sampler_anisotropy)
    }
}

unsafe fn build_context(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    options: VkOptions,
) -> Result<VkContext> {
    let display_raw = display.display_handle()?.as_raw();
    let window_raw = window.window_handle()?.as_raw();

    // 1) Instance + debug + surface
    let entry = Entry::linked();
    let instance = create_instance(&entry, display_raw, &options.app_name)?;
    let debug = create_debug_messenger(&entry, &instance);
    let surface = ash_window::create_surface(&entry, &instance, display_raw, window_raw, None)
        .context("create_surface")?;
    let surface_loader = surface::Instance::new(&entry, &instance);

    // 2) Device + queue
    let (phys, queue_family) = pick_device_and_queue(&instance, &surface_loader, surface)?;
    let (device, queue, caps) = create_device(&instance, phys, queue_family)?;
    let swapchain_loader = swapchain::Device::new(&instance, &device);

    // 3) Swapchain-scoped objects
    let sc = create_swapchain_bundle(
        &device,
        &surface_loader,
        &swapchain_loader,
        phys,
        surface,
        vk::SwapchainKHR::null(),
        size,
        options.vsync,
        options.vsync_mode,
    )?;
    let depth_format = pick_depth_format(&instance, phys);
    let depth = create_depth_buffer(&instance, &device, phys, sc.extent, depth_format)?;
    let render_pass = create_render_pass(&device, sc.format, depth_format)?;
    let framebuffers =
        create_framebuffers(&device, render_pass, &sc.image_views, depth.view, sc.extent)?;

    // 4) Layouts + pipeline
    let frame_set_layout = create_frame_set_layout(&device)?;
    let texture_set_layout = create_texture_set_layout(&device)?;
    let pipeline_layout =
        create_pipeline_layout(&device, &[frame_set_layout, texture_set_layout])?;
    let pipeline = create_pipeline(&device, render_pass, pipeline_layout)?;

    // 5) Pool for staging copies
    let transfer_pool = create_command_pool_raw(&device, queue_family)?;

    info!(
        "Vulkan context ready: depth {:?}, {} swapchain image(s)",
        depth_format,
        sc.images.len()
    );

    Ok(VkContext {
        entry,
        instance,
        debug,
        surface_loader,
        surface,
        phys,
        device,
        queue_family,
        queue,
        caps,
        swapchain_loader,
        swapchain: sc,
        depth_format,
        depth: Some(depth),
        render_pass,
        framebuffers,
        frame_set_layout,
        texture_set_layout,
        pipeline_layout,
        pipeline,
        transfer_pool,
        buffers: HashMap::new(),
        textures: HashMap::new(),
        options,
    })
}

unsafe fn create_command_pool_raw(device: &ash::Device, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        queue_family_index: queue_family,
        ..Default::default()
    };
    Ok(device.create_command_pool(&pool_info, None)?)
}

fn wait_stage(stage: WaitStage) -> vk::PipelineStageFlags {
    match stage {
        WaitStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    }
}

impl VkContext {
    unsafe fn replay(&self, cb: vk::CommandBuffer, command: &Command) {
        let d = &self.device;
        match command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                extent: area,
                clear_color,
                clear_depth,
            } => {
                let mut clears = vec![vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: *clear_color,
                    },
                }];
                if let Some(depth) = clear_depth {
                    clears.push(vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: *depth,
                            stencil: 0,
                        },
                    });
                }
                let rp_begin = vk::RenderPassBeginInfo {
                    s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                    render_pass: vk_render_pass(*render_pass),
                    framebuffer: vk_framebuffer(*framebuffer),
                    render_area: vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: extent(*area),
                    },
                    clear_value_count: clears.len() as u32,
                    p_clear_values: clears.as_ptr(),
                    ..Default::default()
                };
                d.cmd_begin_render_pass(cb, &rp_begin, vk::SubpassContents::INLINE);
            }
            Command::BindPipeline(p) => {
                d.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, vk_pipeline(*p));
            }
            Command::SetViewport(v) => d.cmd_set_viewport(cb, 0, &[viewport(v)]),
            Command::SetScissor(s) => d.cmd_set_scissor(cb, 0, &[scissor(s)]),
            Command::BindDescriptorSets {
                layout,
                first_set,
                sets,
            } => {
                let sets: Vec<vk::DescriptorSet> = sets.iter().map(|&s| vk_set(s)).collect();
                d.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    vk_pipeline_layout(*layout),
                    *first_set,
                    &sets,
                    &[],
                );
            }
            Command::BindVertexBuffer { buffer, offset } => {
                d.cmd_bind_vertex_buffers(cb, 0, &[vk_buffer(*buffer)], &[*offset]);
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type: ty,
            } => d.cmd_bind_index_buffer(cb, vk_buffer(*buffer), *offset, index_type(*ty)),
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => d.cmd_draw(
                cb,
                *vertex_count,
                *instance_count,
                *first_vertex,
                *first_instance,
            ),
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => d.cmd_draw_indexed(
                cb,
                *index_count,
                *instance_count,
                *first_index,
                *vertex_offset,
                *first_instance,
            ),
            Command::EndRenderPass => d.cmd_end_render_pass(cb),
        }
    }
}

impl GraphicsContext for VkContext {
    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryFlags,
    ) -> FrameResult<Buffer> {
        if size == 0 {
            return Err(FrameError::ResourceCreation("zero-sized buffer".into()));
        }
        let mut vk_usage = buffer_usage(usage);
        if !memory.contains(MemoryFlags::HOST_VISIBLE) {
            // Device-local contents arrive by staging copy
            vk_usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        let alloc = unsafe {
            create_buffer_and_memory(
                &self.instance,
                &self.device,
                self.phys,
                size,
                vk_usage,
                memory_properties(memory),
            )
        }
        .map_err(|e| map_setup("create_buffer", e))?;
        self.buffers.insert(alloc.buffer, alloc);
        debug!("buffer {:?}: {} bytes, {:?}, {:?}", alloc.buffer, size, usage, memory);
        Ok(Buffer {
            handle: buffer_handle(alloc.buffer),
            size,
            usage,
            memory,
        })
    }

    fn update_buffer(&mut self, buffer: &Buffer, data: &[u8]) -> FrameResult<()> {
        let alloc = *self
            .buffers
            .get(&vk_buffer(buffer.handle))
            .ok_or_else(|| FrameError::InvalidHandle(format!("unknown buffer {:?}", buffer.handle)))?;
        if data.len() as u64 > alloc.size {
            return Err(FrameError::InvalidHandle(format!(
                "{} byte write into {} byte buffer",
                data.len(),
                alloc.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        unsafe {
            if alloc.host_visible {
                write_mapped(&self.device, &alloc, data)
            } else {
                upload_via_staging(
                    &self.instance,
                    &self.device,
                    self.phys,
                    self.queue,
                    self.transfer_pool,
                    alloc.buffer,
                    data,
                )
            }
        }
        .map_err(|e| map_setup("update_buffer", e))
    }

    fn destroy_buffer(&mut self, buffer: Buffer) {
        match self.buffers.remove(&vk_buffer(buffer.handle)) {
            Some(alloc) => unsafe { alloc.destroy(&self.device) },
            None => warn!("destroy_buffer: unknown buffer {:?}", buffer.handle),
        }
    }

    fn create_texture(&mut self, data: &TextureData) -> FrameResult<Texture> {
        if data.extent.is_empty() || data.pixels.len() != data.expected_len() {
            return Err(FrameError::ResourceCreation(format!(
                "texture {}x{} with {} byte(s) of pixels",
                data.extent.width,
                data.extent.height,
                data.pixels.len()
            )));
        }
        let alloc = unsafe {
            create_texture_image(
                &self.instance,
                &self.device,
                self.phys,
                self.queue,
                self.transfer_pool,
                extent(data.extent),
                texture_format(data.format),
                &data.pixels,
            )
        }
        .map_err(|e| map_setup("create_texture", e))?;
        self.textures.insert(alloc.image, alloc);
        info!(
            "texture uploaded: {}x{} {:?}",
            data.extent.width, data.extent.height, data.format
        );
        Ok(Texture {
            image: image_handle(alloc.image),
            view: view_handle(alloc.view),
            extent: data.extent,
            format: data.format,
        })
    }

    fn destroy_texture(&mut self, texture: Texture) {
        match self.textures.remove(&vk_image(texture.image)) {
            Some(alloc) => unsafe { alloc.destroy(&self.device) },
            None => warn!("destroy_texture: unknown image {:?}", texture.image),
        }
    }

    fn create_texture_sampler(&mut self, anisotropy: Option<f32>) -> FrameResult<SamplerHandle> {
        let max_anisotropy = match (anisotropy, self.max_anisotropy()) {
            (Some(want), Some(max)) if want > 1.0 => Some(want.min(max)),
            (Some(want), None) if want > 1.0 => {
                warn!("anisotropy {} requested but unsupported; disabled", want);
                None
            }
            _ => None,
        };
        let info = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            anisotropy_enable: max_anisotropy.is_some() as vk::Bool32,
            max_anisotropy: max_anisotropy.unwrap_or(1.0),
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            unnormalized_coordinates: vk::FALSE,
            compare_enable: vk::FALSE,
            compare_op: vk::CompareOp::ALWAYS,
            ..Default::default()
        };
        let sampler = unsafe { self.device.create_sampler(&info, None) }
            .map_err(|r| map_vk("create_sampler", r))?;
        debug!("sampler {:?} (anisotropy {:?})", sampler, max_anisotropy);
        Ok(sampler_handle(sampler))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        unsafe { self.device.destroy_sampler(vk_sampler(sampler), None) };
    }

    fn create_descriptor_pool(
        &mut self,
        sizes: &[(DescriptorKind, u32)],
        max_sets: u32,
    ) -> FrameResult<DescriptorPoolHandle> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
            .iter()
            .map(|&(kind, count)| vk::DescriptorPoolSize {
                ty: descriptor_type(kind),
                descriptor_count: count,
            })
            .collect();
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { self.device.create_descriptor_pool(&pool_ci, None) }
            .map_err(|r| map_vk("create_descriptor_pool", r))?;
        Ok(desc_pool_handle(pool))
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> FrameResult<DescriptorSetHandle> {
        let layouts = [vk_set_layout(layout)];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: vk_desc_pool(pool),
            descriptor_set_count: 1,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc) }
            .map_err(|r| map_vk("allocate_descriptor_sets", r))?;
        sets.first()
            .map(|&s| set_handle(s))
            .ok_or_else(|| FrameError::ResourceCreation("no descriptor set allocated".into()))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        unsafe { self.device.destroy_descriptor_pool(vk_desc_pool(pool), None) };
    }

    fn write_descriptors(&mut self, writes: &[DescriptorWrite]) -> FrameResult<()> {
        // Infos first; the writes point into these vectors.
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        for w in writes {
            match w.resource {
                BoundResource::UniformBuffer {
                    buffer,
                    offset,
                    range,
                } => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: vk_buffer(buffer),
                    offset,
                    range,
                }),
                BoundResource::CombinedImageSampler { view, sampler } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk_sampler(sampler),
                        image_view: vk_view(view),
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    })
                }
            }
        }

        let (mut bi, mut ii) = (0, 0);
        let mut vk_writes = Vec::with_capacity(writes.len());
        for w in writes {
            let mut write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: vk_set(w.set),
                dst_binding: w.binding,
                descriptor_count: 1,
                descriptor_type: descriptor_type(w.resource.kind()),
                ..Default::default()
            };
            match w.resource {
                BoundResource::UniformBuffer { .. } => {
                    write.p_buffer_info = &buffer_infos[bi];
                    bi += 1;
                }
                BoundResource::CombinedImageSampler { .. } => {
                    write.p_image_info = &image_infos[ii];
                    ii += 1;
                }
            }
            vk_writes.push(write);
        }
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn create_command_pool(&mut self) -> FrameResult<CommandPoolHandle> {
        let pool = unsafe { create_command_pool_raw(&self.device, self.queue_family) }
            .map_err(|e| map_setup("create_command_pool", e))?;
        Ok(cmd_pool_handle(pool))
    }

    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> FrameResult<Vec<CommandBufferHandle>> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: vk_cmd_pool(pool),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        let cbs = unsafe { self.device.allocate_command_buffers(&ai) }
            .map_err(|r| map_vk("allocate_command_buffers", r))?;
        Ok(cbs.into_iter().map(cmd_buffer_handle).collect())
    }

    fn free_command_buffer(&mut self, pool: CommandPoolHandle, buffer: CommandBufferHandle) {
        unsafe {
            self.device
                .free_command_buffers(vk_cmd_pool(pool), &[vk_cmd_buffer(buffer)])
        };
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        unsafe { self.device.destroy_command_pool(vk_cmd_pool(pool), None) };
    }

    fn create_semaphores(&mut self, count: u32) -> FrameResult<Vec<SemaphoreHandle>> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let sem = unsafe { self.device.create_semaphore(&sem_ci, None) }
                .map_err(|r| map_vk("create_semaphore", r))?;
            out.push(semaphore_handle(sem));
        }
        Ok(out)
    }

    fn destroy_semaphores(&mut self, semaphores: &[SemaphoreHandle]) {
        for &s in semaphores {
            unsafe { self.device.destroy_semaphore(vk_semaphore(s), None) };
        }
    }

    fn create_fences(&mut self, count: u32, signaled: bool) -> FrameResult<Vec<FenceHandle>> {
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let fence = unsafe { self.device.create_fence(&fence_ci, None) }
                .map_err(|r| map_vk("create_fence", r))?;
            out.push(fence_handle(fence));
        }
        Ok(out)
    }

    fn destroy_fences(&mut self, fences: &[FenceHandle]) {
        for &f in fences {
            unsafe { self.device.destroy_fence(vk_fence(f), None) };
        }
    }

    fn fence_signaled(&mut self, fence: FenceHandle) -> FrameResult<bool> {
        unsafe { self.device.get_fence_status(vk_fence(fence)) }
            .map_err(|r| map_vk("get_fence_status", r))
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, timeout: Duration) -> FrameResult<FenceWait> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[vk_fence(fence)], true, nanos) } {
            Ok(()) => Ok(FenceWait::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
            Err(r) => Err(map_vk("wait_for_fences", r)),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> FrameResult<()> {
        unsafe { self.device.reset_fences(&[vk_fence(fence)]) }
            .map_err(|r| map_vk("reset_fences", r))
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> FrameResult<AcquiredImage> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                vk_semaphore(signal),
                vk::Fence::null(),
            )
        }
        .map_err(|r| map_vk("acquire_next_image", r))?;
        Ok(AcquiredImage { index, suboptimal })
    }

    fn record_commands(
        &mut self,
        buffer: CommandBufferHandle,
        commands: &CommandList,
    ) -> FrameResult<()> {
        let cb = vk_cmd_buffer(buffer);
        unsafe {
            self.device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|r| map_vk("reset_command_buffer", r))?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            self.device
                .begin_command_buffer(cb, &begin)
                .map_err(|r| map_vk("begin_command_buffer", r))?;
            for command in commands.commands() {
                self.replay(cb, command);
            }
            self.device
                .end_command_buffer(cb)
                .map_err(|r| map_vk("end_command_buffer", r))
        }
    }

    fn submit(&mut self, info: &SubmitInfo) -> FrameResult<()> {
        let wait_sems = [vk_semaphore(info.wait)];
        let wait_stages = [wait_stage(info.wait_stage)];
        let signal_sems = [vk_semaphore(info.signal)];
        let cbs = [vk_cmd_buffer(info.command_buffer)];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: wait_sems.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: cbs.as_ptr(),
            signal_semaphore_count: 1,
            p_signal_semaphores: signal_sems.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), vk_fence(info.fence))
        }
        .map_err(|r| map_vk("queue_submit", r))
    }

    fn queue_present(
        &mut self,
        wait: SemaphoreHandle,
        image_index: u32,
    ) -> FrameResult<PresentOutcome> {
        let wait_sems = [vk_semaphore(wait)];
        let swapchains = [self.swapchain.swapchain];
        let indices = [image_index];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: wait_sems.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.queue, &present) } {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(r) => Err(map_vk("queue_present", r)),
        }
    }

    fn wait_idle(&mut self) -> FrameResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|r| map_vk("device_wait_idle", r))
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain.images.len() as u32
    }
}

impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;

            // 1) QUIESCE DEVICE
            d.device_wait_idle().ok();

            // 2) PIPELINE & LAYOUTS
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            d.destroy_descriptor_set_layout(self.texture_set_layout, None);
            d.destroy_descriptor_set_layout(self.frame_set_layout, None);

            // 3) FRAMEBUFFERS BEFORE THE RENDER PASS AND VIEWS THEY REFERENCE
            for &fb in &self.framebuffers {
                d.destroy_framebuffer(fb, None);
            }
            d.destroy_render_pass(self.render_pass, None);
            if let Some(depth) = self.depth.take() {
                depth.destroy(d);
            }

            // 4) IMAGE VIEWS BEFORE SWAPCHAIN
            for &iv in &self.swapchain.image_views {
                d.destroy_image_view(iv, None);
            }
            self.swapchain_loader
                .destroy_swapchain(self.swapchain.swapchain, None);

            // 5) ANYTHING THE CALLER FORGOT TO RELEASE
            if !self.buffers.is_empty() || !self.textures.is_empty() {
                warn!(
                    "{} buffer(s) and {} texture(s) still alive at teardown",
                    self.buffers.len(),
                    self.textures.len()
                );
            }
            for (_, alloc) in self.buffers.drain() {
                alloc.destroy(d);
            }
            for (_, alloc) in self.textures.drain() {
                alloc.destroy(d);
            }
            d.destroy_command_pool(self.transfer_pool, None);

            // 6) DEVICE, SURFACE, DEBUG, INSTANCE
            d.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            destroy_debug_messenger(&self.entry, &self.instance, self.debug);
            self.instance.destroy_instance(None);
        }
        info!("Vulkan context destroyed");
    }
}
