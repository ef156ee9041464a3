// SPDX-License-Identifier: CEPL-1.0
//! Opaque GPU handles.
//!
//! Every handle is a raw `u64` that the backend converts to and from its own
//! native handle type. The core never interprets the value beyond comparing
//! it against [`NULL`](BufferHandle::NULL).

use crate::context::{BufferUsage, MemoryFlags};

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn as_raw(self) -> u64 {
                self.0
            }

            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

gpu_handle!(BufferHandle);
gpu_handle!(ImageHandle);
gpu_handle!(ImageViewHandle);
gpu_handle!(SamplerHandle);
gpu_handle!(DescriptorSetHandle);
gpu_handle!(DescriptorSetLayoutHandle);
gpu_handle!(DescriptorPoolHandle);
gpu_handle!(CommandPoolHandle);
gpu_handle!(CommandBufferHandle);
gpu_handle!(
    /// GPU-to-GPU ordering signal (a binary semaphore). Never read by the CPU.
    SemaphoreHandle
);
gpu_handle!(
    /// GPU-to-CPU completion signal, observed with explicit wait/reset calls.
    FenceHandle
);
gpu_handle!(PipelineHandle);
gpu_handle!(PipelineLayoutHandle);
gpu_handle!(RenderPassHandle);
gpu_handle!(FramebufferHandle);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Window size hint handed to swapchain creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// A device-resident buffer plus the metadata it was created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Buffer {
    pub handle: BufferHandle,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryFlags,
}

impl Buffer {
    pub fn is_host_visible(&self) -> bool {
        self.memory.contains(MemoryFlags::HOST_VISIBLE)
    }
}

/// Pixel formats the texture upload path understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8Srgb,
}

impl TextureFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8Srgb => 4,
        }
    }
}

/// CPU-side pixels waiting to be uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub pixels: Vec<u8>,
    pub extent: Extent2D,
    pub format: TextureFormat,
}

impl TextureData {
    pub fn expected_len(&self) -> usize {
        self.extent.width as usize * self.extent.height as usize * self.format.bytes_per_pixel()
    }
}

/// A sampled image: the image, its default view and what it holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Texture {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
    pub extent: Extent2D,
    pub format: TextureFormat,
}
