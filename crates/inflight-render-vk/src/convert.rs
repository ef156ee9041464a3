// SPDX-License-Identifier: CEPL-1.0
//! Conversions between the core's opaque handles/flags and `ash` types.

use ash::vk::{self, Handle};
use inflight_render::{
    BufferUsage, DescriptorKind, Extent2D, IndexType, MemoryFlags, ScissorRect, TextureFormat,
    Viewport,
};

/// Wraps a native handle in one of the core's handle newtypes.
macro_rules! handle_conv {
    ($($fn_to:ident, $fn_from:ident: $core:ident <=> $native:ty;)*) => {
        $(
            #[inline]
            pub(crate) fn $fn_to(h: $native) -> inflight_render::$core {
                inflight_render::$core::from_raw(h.as_raw())
            }

            #[inline]
            pub(crate) fn $fn_from(h: inflight_render::$core) -> $native {
                <$native>::from_raw(h.as_raw())
            }
        )*
    };
}

handle_conv! {
    buffer_handle, vk_buffer: BufferHandle <=> vk::Buffer;
    image_handle, vk_image: ImageHandle <=> vk::Image;
    view_handle, vk_view: ImageViewHandle <=> vk::ImageView;
    sampler_handle, vk_sampler: SamplerHandle <=> vk::Sampler;
    set_handle, vk_set: DescriptorSetHandle <=> vk::DescriptorSet;
    set_layout_handle, vk_set_layout: DescriptorSetLayoutHandle <=> vk::DescriptorSetLayout;
    desc_pool_handle, vk_desc_pool: DescriptorPoolHandle <=> vk::DescriptorPool;
    cmd_pool_handle, vk_cmd_pool: CommandPoolHandle <=> vk::CommandPool;
    cmd_buffer_handle, vk_cmd_buffer: CommandBufferHandle <=> vk::CommandBuffer;
    semaphore_handle, vk_semaphore: SemaphoreHandle <=> vk::Semaphore;
    fence_handle, vk_fence: FenceHandle <=> vk::Fence;
    pipeline_handle, vk_pipeline: PipelineHandle <=> vk::Pipeline;
    pipeline_layout_handle, vk_pipeline_layout: PipelineLayoutHandle <=> vk::PipelineLayout;
    render_pass_handle, vk_render_pass: RenderPassHandle <=> vk::RenderPass;
    framebuffer_handle, vk_framebuffer: FramebufferHandle <=> vk::Framebuffer;
}

pub(crate) fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut out = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        out |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        out |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        out |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    out
}

pub(crate) fn memory_properties(memory: MemoryFlags) -> vk::MemoryPropertyFlags {
    let mut out = vk::MemoryPropertyFlags::empty();
    if memory.contains(MemoryFlags::DEVICE_LOCAL) {
        out |= vk::MemoryPropertyFlags::DEVICE_LOCAL;
    }
    if memory.contains(MemoryFlags::HOST_VISIBLE) {
        out |= vk::MemoryPropertyFlags::HOST_VISIBLE;
    }
    if memory.contains(MemoryFlags::HOST_COHERENT) {
        out |= vk::MemoryPropertyFlags::HOST_COHERENT;
    }
    out
}

pub(crate) fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub(crate) fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
    }
}

pub(crate) fn index_type(ty: IndexType) -> vk::IndexType {
    match ty {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

#[inline]
pub(crate) fn extent(e: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: e.width,
        height: e.height,
    }
}

#[inline]
pub(crate) fn core_extent(e: vk::Extent2D) -> Extent2D {
    Extent2D::new(e.width, e.height)
}

pub(crate) fn viewport(v: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: v.x,
        y: v.y,
        width: v.width,
        height: v.height,
        min_depth: v.min_depth,
        max_depth: v.max_depth,
    }
}

pub(crate) fn scissor(s: &ScissorRect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: s.x, y: s.y },
        extent: extent(s.extent),
    }
}
