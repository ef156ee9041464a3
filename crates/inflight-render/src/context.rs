// SPDX-License-Identifier: CEPL-1.0
//! The graphics context collaborator.
//!
//! The frame scheduler does not own a device. Window, surface, device and
//! swapchain live behind [`GraphicsContext`]; the scheduler only needs the
//! operations below. A Vulkan implementation lives in `inflight-render-vk`,
//! a simulated one backs the unit tests.

use std::time::Duration;

use bitflags::bitflags;

use crate::command::CommandList;
use crate::descriptor::{DescriptorKind, DescriptorWrite};
use crate::error::FrameResult;
use crate::handle::{
    Buffer, CommandBufferHandle, CommandPoolHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, SamplerHandle,
    SemaphoreHandle, Texture, TextureData,
};

bitflags! {
    /// How a buffer is going to be used by the GPU.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
    }
}

bitflags! {
    /// Where a buffer's memory lives.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryFlags: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
    }
}

impl MemoryFlags {
    /// Mapped memory the CPU can write without explicit flushes.
    pub const HOST_SHARED: Self = Self::HOST_VISIBLE.union(Self::HOST_COHERENT);
}

/// Outcome of a bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
}

/// A successfully acquired presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The image is usable but the swapchain no longer matches the surface.
    pub suboptimal: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    Suboptimal,
}

/// Pipeline stage at which a submission waits on its acquire signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStage {
    ColorAttachmentOutput,
}

/// One command buffer submission and the signals around it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitInfo {
    pub command_buffer: CommandBufferHandle,
    pub wait: SemaphoreHandle,
    pub wait_stage: WaitStage,
    pub signal: SemaphoreHandle,
    pub fence: FenceHandle,
}

/// GPU operations the frame core depends on.
///
/// Calls that fail because the device went away return
/// [`FrameError::DeviceLost`](crate::FrameError::DeviceLost); swapchain
/// calls surface out-of-date as
/// [`FrameError::SwapchainOutOfDate`](crate::FrameError::SwapchainOutOfDate).
pub trait GraphicsContext {
    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryFlags,
    ) -> FrameResult<Buffer>;

    /// Writes `data` at offset 0. Host-visible buffers are written directly;
    /// anything else goes through a staging copy.
    fn update_buffer(&mut self, buffer: &Buffer, data: &[u8]) -> FrameResult<()>;

    fn destroy_buffer(&mut self, buffer: Buffer);

    fn create_texture(&mut self, data: &TextureData) -> FrameResult<Texture>;

    fn destroy_texture(&mut self, texture: Texture);

    /// `anisotropy` of `None` disables anisotropic filtering.
    fn create_texture_sampler(&mut self, anisotropy: Option<f32>) -> FrameResult<SamplerHandle>;

    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    fn create_descriptor_pool(
        &mut self,
        sizes: &[(DescriptorKind, u32)],
        max_sets: u32,
    ) -> FrameResult<DescriptorPoolHandle>;

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> FrameResult<DescriptorSetHandle>;

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);

    /// Applies a batch of descriptor writes in one call.
    fn write_descriptors(&mut self, writes: &[DescriptorWrite]) -> FrameResult<()>;

    /// Creates a pool whose command buffers can be reset individually.
    fn create_command_pool(&mut self) -> FrameResult<CommandPoolHandle>;

    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> FrameResult<Vec<CommandBufferHandle>>;

    fn free_command_buffer(&mut self, pool: CommandPoolHandle, buffer: CommandBufferHandle);

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle);

    fn create_semaphores(&mut self, count: u32) -> FrameResult<Vec<SemaphoreHandle>>;

    fn destroy_semaphores(&mut self, semaphores: &[SemaphoreHandle]);

    fn create_fences(&mut self, count: u32, signaled: bool) -> FrameResult<Vec<FenceHandle>>;

    fn destroy_fences(&mut self, fences: &[FenceHandle]);

    /// Non-blocking status query.
    fn fence_signaled(&mut self, fence: FenceHandle) -> FrameResult<bool>;

    /// Blocks until `fence` signals or `timeout` elapses.
    fn wait_for_fence(&mut self, fence: FenceHandle, timeout: Duration) -> FrameResult<FenceWait>;

    fn reset_fence(&mut self, fence: FenceHandle) -> FrameResult<()>;

    /// Asks the swapchain for the next presentable image; `signal` fires once
    /// the image may be written.
    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> FrameResult<AcquiredImage>;

    /// Resets `buffer`, begins it, replays `commands` and ends it.
    fn record_commands(
        &mut self,
        buffer: CommandBufferHandle,
        commands: &CommandList,
    ) -> FrameResult<()>;

    fn submit(&mut self, info: &SubmitInfo) -> FrameResult<()>;

    fn queue_present(&mut self, wait: SemaphoreHandle, image_index: u32)
        -> FrameResult<PresentOutcome>;

    /// Blocks until the device has no outstanding work.
    fn wait_idle(&mut self) -> FrameResult<()>;

    fn swapchain_image_count(&self) -> u32;
}
