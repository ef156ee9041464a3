// SPDX-License-Identifier: CEPL-1.0
//! A simulated GPU for unit tests.
//!
//! [`SimGpu`] implements [`GraphicsContext`] with a single in-order queue.
//! Submissions either complete immediately or stay pending until someone
//! waits on their fence (completing everything queued before it). Along the
//! way it records every call and counts protocol violations:
//!
//! - buffer hazards: a CPU write to a buffer still read by a pending submission
//! - image hazards: recording against an image a pending submission renders to
//! - signal violations: a semaphore signaled twice, or waited on while unsignaled

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::command::{Command, CommandList};
use crate::context::{
    AcquiredImage, BufferUsage, FenceWait, GraphicsContext, MemoryFlags, PresentOutcome,
    SubmitInfo,
};
use crate::descriptor::{BoundResource, DescriptorKind, DescriptorWrite};
use crate::error::{FrameError, FrameResult};
use crate::handle::{
    Buffer, BufferHandle, CommandBufferHandle, CommandPoolHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, ImageHandle, ImageViewHandle,
    SamplerHandle, SemaphoreHandle, Texture, TextureData,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Work finishes the moment it is submitted.
    Instant,
    /// Work finishes only when its fence (or a later one) is waited on.
    Deferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    AlreadySignaled,
    Blocked,
    TimedOut,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GpuEvent {
    UpdateBuffer { buffer: BufferHandle },
    CreateDescriptorPool { sizes: Vec<(DescriptorKind, u32)>, max_sets: u32 },
    WriteDescriptors { count: usize },
    WaitFence { fence: FenceHandle, outcome: WaitOutcome },
    ResetFence { fence: FenceHandle },
    Acquire { index: u32 },
    AcquireFailed,
    Record { buffer: CommandBufferHandle },
    Submit { buffer: CommandBufferHandle, fence: FenceHandle },
    Present { image_index: u32 },
    WaitIdle,
    DestroySemaphores { count: usize },
}

#[derive(Clone, Copy, Debug, Default)]
struct FenceSim {
    signaled: bool,
    pending: bool,
}

#[derive(Debug)]
pub struct SimGpu {
    next_id: u64,
    completion: Completion,
    image_count: u32,
    next_image: u32,
    current_image: Option<u32>,

    fences: HashMap<FenceHandle, FenceSim>,
    hung: HashSet<FenceHandle>,
    queue: VecDeque<FenceHandle>,
    semaphores: HashMap<SemaphoreHandle, bool>,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    textures: HashSet<ImageHandle>,
    samplers: HashSet<SamplerHandle>,
    descriptor_pools: HashMap<DescriptorPoolHandle, Vec<DescriptorSetHandle>>,
    bindings: HashMap<(DescriptorSetHandle, u32), BoundResource>,
    command_pools: HashSet<CommandPoolHandle>,
    command_buffers: HashMap<CommandBufferHandle, CommandPoolHandle>,
    recorded: HashMap<CommandBufferHandle, CommandList>,

    buffers_in_use: HashMap<BufferHandle, FenceHandle>,
    images_in_use: HashMap<u32, FenceHandle>,
    buffer_hazards: usize,
    image_hazards: usize,
    signal_violations: usize,
    max_pending: usize,

    acquire_calls: u64,
    present_calls: u64,
    acquire_script: HashMap<u64, FrameResult<()>>,
    suboptimal_acquires: HashSet<u64>,
    present_script: HashMap<u64, FrameResult<PresentOutcome>>,
    buffer_budget: Option<usize>,

    events: Vec<GpuEvent>,
}

impl SimGpu {
    /// A GPU with `image_count` swapchain images and instant completion.
    pub fn new(image_count: u32) -> Self {
        Self {
            next_id: 1,
            completion: Completion::Instant,
            image_count,
            next_image: 0,
            current_image: None,
            fences: HashMap::new(),
            hung: HashSet::new(),
            queue: VecDeque::new(),
            semaphores: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashSet::new(),
            samplers: HashSet::new(),
            descriptor_pools: HashMap::new(),
            bindings: HashMap::new(),
            command_pools: HashSet::new(),
            command_buffers: HashMap::new(),
            recorded: HashMap::new(),
            buffers_in_use: HashMap::new(),
            images_in_use: HashMap::new(),
            buffer_hazards: 0,
            image_hazards: 0,
            signal_violations: 0,
            max_pending: 0,
            acquire_calls: 0,
            present_calls: 0,
            acquire_script: HashMap::new(),
            suboptimal_acquires: HashSet::new(),
            present_script: HashMap::new(),
            buffer_budget: None,
            events: Vec::new(),
        }
    }

    pub fn deferred(image_count: u32) -> Self {
        let mut gpu = Self::new(image_count);
        gpu.completion = Completion::Deferred;
        gpu
    }

    /// Simulates a swapchain rebuild with `image_count` images.
    pub fn set_image_count(&mut self, image_count: u32) {
        self.image_count = image_count;
        self.next_image = 0;
        self.current_image = None;
        self.images_in_use.clear();
    }

    /// Makes the `call`-th acquire (0-based) fail with `error`.
    pub fn fail_acquire_on(&mut self, call: u64, error: FrameError) {
        self.acquire_script.insert(call, Err(error));
    }

    pub fn suboptimal_acquire_on(&mut self, call: u64) {
        self.suboptimal_acquires.insert(call);
    }

    pub fn present_result_on(&mut self, call: u64, result: FrameResult<PresentOutcome>) {
        self.present_script.insert(call, result);
    }

    /// Lets `count` more buffers be created; the next one fails.
    pub fn fail_buffers_after(&mut self, count: usize) {
        self.buffer_budget = Some(count);
    }

    /// The fence never signals; waits on it time out.
    pub fn hang(&mut self, fence: FenceHandle) {
        self.hung.insert(fence);
    }

    pub fn events(&self) -> &[GpuEvent] {
        &self.events
    }

    pub fn count(&self, pred: impl Fn(&GpuEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn bound(&self, set: DescriptorSetHandle, binding: u32) -> Option<BoundResource> {
        self.bindings.get(&(set, binding)).copied()
    }

    pub fn recorded(&self, buffer: CommandBufferHandle) -> Option<&CommandList> {
        self.recorded.get(&buffer)
    }

    pub fn contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|v| v.as_slice())
    }

    pub fn is_signaled(&self, fence: FenceHandle) -> bool {
        self.fences.get(&fence).is_some_and(|f| f.signaled)
    }

    pub fn semaphore_alive(&self, semaphore: SemaphoreHandle) -> bool {
        self.semaphores.contains_key(&semaphore)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    pub fn buffer_hazards(&self) -> usize {
        self.buffer_hazards
    }

    pub fn image_hazards(&self) -> usize {
        self.image_hazards
    }

    pub fn signal_violations(&self) -> usize {
        self.signal_violations
    }

    /// Objects created and not yet destroyed. Descriptor sets die with their pool.
    pub fn live_objects(&self) -> usize {
        self.fences.len()
            + self.semaphores.len()
            + self.buffers.len()
            + self.textures.len()
            + self.samplers.len()
            + self.descriptor_pools.len()
            + self.command_pools.len()
            + self.command_buffers.len()
    }

    /// Finishes all queued work.
    pub fn complete_all(&mut self) {
        while let Some(f) = self.queue.front().copied() {
            if self.hung.contains(&f) {
                break;
            }
            self.complete_through(f);
        }
    }

    fn id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn signal(&mut self, semaphore: SemaphoreHandle) {
        match self.semaphores.get_mut(&semaphore) {
            Some(s) if *s => self.signal_violations += 1,
            Some(s) => *s = true,
            None => self.signal_violations += 1,
        }
    }

    fn consume(&mut self, semaphore: SemaphoreHandle) {
        match self.semaphores.get_mut(&semaphore) {
            Some(s) if *s => *s = false,
            _ => self.signal_violations += 1,
        }
    }

    /// Completes every queued submission up to and including `fence`.
    fn complete_through(&mut self, fence: FenceHandle) {
        while let Some(f) = self.queue.pop_front() {
            if let Some(state) = self.fences.get_mut(&f) {
                state.signaled = true;
                state.pending = false;
            }
            self.buffers_in_use.retain(|_, owner| *owner != f);
            self.images_in_use.retain(|_, owner| *owner != f);
            if f == fence {
                break;
            }
        }
    }

    fn fence_pending(&self, fence: FenceHandle) -> bool {
        self.fences.get(&fence).is_some_and(|f| f.pending)
    }

    fn buffers_read_by(&self, list: &CommandList) -> Vec<BufferHandle> {
        let mut read = Vec::new();
        for cmd in list.commands() {
            match cmd {
                Command::BindDescriptorSets { sets, .. } => {
                    for (&(set, _), res) in &self.bindings {
                        if let BoundResource::UniformBuffer { buffer, .. } = res {
                            if sets.contains(&set) {
                                read.push(*buffer);
                            }
                        }
                    }
                }
                Command::BindVertexBuffer { buffer, .. }
                | Command::BindIndexBuffer { buffer, .. } => read.push(*buffer),
                _ => {}
            }
        }
        read
    }
}

impl GraphicsContext for SimGpu {
    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryFlags,
    ) -> FrameResult<Buffer> {
        if size == 0 {
            return Err(FrameError::ResourceCreation("zero-sized buffer".into()));
        }
        match self.buffer_budget.as_mut() {
            Some(0) => return Err(FrameError::ResourceCreation("out of device memory".into())),
            Some(left) => *left -= 1,
            None => {}
        }
        let handle = BufferHandle::from_raw(self.id());
        self.buffers.insert(handle, vec![0; size as usize]);
        Ok(Buffer {
            handle,
            size,
            usage,
            memory,
        })
    }

    fn update_buffer(&mut self, buffer: &Buffer, data: &[u8]) -> FrameResult<()> {
        if let Some(owner) = self.buffers_in_use.get(&buffer.handle) {
            if self.fence_pending(*owner) {
                self.buffer_hazards += 1;
            }
        }
        let store = self
            .buffers
            .get_mut(&buffer.handle)
            .ok_or_else(|| FrameError::InvalidHandle(format!("{:?}", buffer.handle)))?;
        if data.len() > store.len() {
            return Err(FrameError::InvalidHandle(format!(
                "{} bytes do not fit in a {} byte buffer",
                data.len(),
                store.len()
            )));
        }
        store[..data.len()].copy_from_slice(data);
        self.events.push(GpuEvent::UpdateBuffer {
            buffer: buffer.handle,
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: Buffer) {
        self.buffers.remove(&buffer.handle);
    }

    fn create_texture(&mut self, data: &TextureData) -> FrameResult<Texture> {
        if data.pixels.len() != data.expected_len() {
            return Err(FrameError::ResourceCreation("pixel data size mismatch".into()));
        }
        let image = ImageHandle::from_raw(self.id());
        let view = ImageViewHandle::from_raw(self.id());
        self.textures.insert(image);
        Ok(Texture {
            image,
            view,
            extent: data.extent,
            format: data.format,
        })
    }

    fn destroy_texture(&mut self, texture: Texture) {
        self.textures.remove(&texture.image);
    }

    fn create_texture_sampler(&mut self, _anisotropy: Option<f32>) -> FrameResult<SamplerHandle> {
        let sampler = SamplerHandle::from_raw(self.id());
        self.samplers.insert(sampler);
        Ok(sampler)
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler);
    }

    fn create_descriptor_pool(
        &mut self,
        sizes: &[(DescriptorKind, u32)],
        max_sets: u32,
    ) -> FrameResult<DescriptorPoolHandle> {
        let pool = DescriptorPoolHandle::from_raw(self.id());
        self.descriptor_pools.insert(pool, Vec::new());
        self.events.push(GpuEvent::CreateDescriptorPool {
            sizes: sizes.to_vec(),
            max_sets,
        });
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        _layout: DescriptorSetLayoutHandle,
    ) -> FrameResult<DescriptorSetHandle> {
        let set = DescriptorSetHandle::from_raw(self.id());
        self.descriptor_pools
            .get_mut(&pool)
            .ok_or_else(|| FrameError::InvalidHandle(format!("{pool:?}")))?
            .push(set);
        Ok(set)
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        if let Some(sets) = self.descriptor_pools.remove(&pool) {
            self.bindings.retain(|(set, _), _| !sets.contains(set));
        }
    }

    fn write_descriptors(&mut self, writes: &[DescriptorWrite]) -> FrameResult<()> {
        for w in writes {
            self.bindings.insert((w.set, w.binding), w.resource);
        }
        self.events.push(GpuEvent::WriteDescriptors {
            count: writes.len(),
        });
        Ok(())
    }

    fn create_command_pool(&mut self) -> FrameResult<CommandPoolHandle> {
        let pool = CommandPoolHandle::from_raw(self.id());
        self.command_pools.insert(pool);
        Ok(pool)
    }

    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> FrameResult<Vec<CommandBufferHandle>> {
        if !self.command_pools.contains(&pool) {
            return Err(FrameError::InvalidHandle(format!("{pool:?}")));
        }
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let cb = CommandBufferHandle::from_raw(self.id());
            self.command_buffers.insert(cb, pool);
            out.push(cb);
        }
        Ok(out)
    }

    fn free_command_buffer(&mut self, _pool: CommandPoolHandle, buffer: CommandBufferHandle) {
        self.command_buffers.remove(&buffer);
        self.recorded.remove(&buffer);
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        self.command_pools.remove(&pool);
        self.command_buffers.retain(|_, p| *p != pool);
    }

    fn create_semaphores(&mut self, count: u32) -> FrameResult<Vec<SemaphoreHandle>> {
        Ok((0..count)
            .map(|_| {
                let s = SemaphoreHandle::from_raw(self.id());
                self.semaphores.insert(s, false);
                s
            })
            .collect())
    }

    fn destroy_semaphores(&mut self, semaphores: &[SemaphoreHandle]) {
        for s in semaphores {
            self.semaphores.remove(s);
        }
        self.events.push(GpuEvent::DestroySemaphores {
            count: semaphores.len(),
        });
    }

    fn create_fences(&mut self, count: u32, signaled: bool) -> FrameResult<Vec<FenceHandle>> {
        Ok((0..count)
            .map(|_| {
                let f = FenceHandle::from_raw(self.id());
                self.fences.insert(
                    f,
                    FenceSim {
                        signaled,
                        pending: false,
                    },
                );
                f
            })
            .collect())
    }

    fn destroy_fences(&mut self, fences: &[FenceHandle]) {
        for f in fences {
            self.fences.remove(f);
        }
    }

    fn fence_signaled(&mut self, fence: FenceHandle) -> FrameResult<bool> {
        self.fences
            .get(&fence)
            .map(|f| f.signaled)
            .ok_or_else(|| FrameError::InvalidHandle(format!("{fence:?}")))
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, _timeout: Duration) -> FrameResult<FenceWait> {
        let state = *self
            .fences
            .get(&fence)
            .ok_or_else(|| FrameError::InvalidHandle(format!("{fence:?}")))?;
        let outcome = if state.signaled {
            WaitOutcome::AlreadySignaled
        } else if state.pending && !self.hung.contains(&fence) {
            self.complete_through(fence);
            WaitOutcome::Blocked
        } else {
            WaitOutcome::TimedOut
        };
        self.events.push(GpuEvent::WaitFence { fence, outcome });
        Ok(match outcome {
            WaitOutcome::TimedOut => FenceWait::TimedOut,
            _ => FenceWait::Signaled,
        })
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> FrameResult<()> {
        let state = self
            .fences
            .get_mut(&fence)
            .ok_or_else(|| FrameError::InvalidHandle(format!("{fence:?}")))?;
        state.signaled = false;
        self.events.push(GpuEvent::ResetFence { fence });
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> FrameResult<AcquiredImage> {
        let call = self.acquire_calls;
        self.acquire_calls += 1;
        if let Some(Err(e)) = self.acquire_script.remove(&call) {
            self.events.push(GpuEvent::AcquireFailed);
            return Err(e);
        }
        if self.image_count == 0 {
            return Err(FrameError::SwapchainOutOfDate);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        self.current_image = Some(index);
        self.signal(signal);
        self.events.push(GpuEvent::Acquire { index });
        Ok(AcquiredImage {
            index,
            suboptimal: self.suboptimal_acquires.contains(&call),
        })
    }

    fn record_commands(
        &mut self,
        buffer: CommandBufferHandle,
        commands: &CommandList,
    ) -> FrameResult<()> {
        if !self.command_buffers.contains_key(&buffer) {
            return Err(FrameError::InvalidHandle(format!("{buffer:?}")));
        }
        if let Some(image) = self.current_image {
            if let Some(owner) = self.images_in_use.get(&image) {
                if self.fence_pending(*owner) {
                    self.image_hazards += 1;
                }
            }
        }
        self.recorded.insert(buffer, commands.clone());
        self.events.push(GpuEvent::Record { buffer });
        Ok(())
    }

    fn submit(&mut self, info: &SubmitInfo) -> FrameResult<()> {
        let fence_state = self
            .fences
            .get(&info.fence)
            .copied()
            .ok_or_else(|| FrameError::InvalidHandle(format!("{:?}", info.fence)))?;
        if fence_state.signaled || fence_state.pending {
            return Err(FrameError::InvalidHandle(format!(
                "{:?} submitted while not reset",
                info.fence
            )));
        }
        let list = self
            .recorded
            .get(&info.command_buffer)
            .cloned()
            .ok_or_else(|| FrameError::InvalidHandle(format!("{:?}", info.command_buffer)))?;

        self.consume(info.wait);
        self.signal(info.signal);
        for buffer in self.buffers_read_by(&list) {
            self.buffers_in_use.insert(buffer, info.fence);
        }
        if let Some(image) = self.current_image {
            self.images_in_use.insert(image, info.fence);
        }
        if let Some(state) = self.fences.get_mut(&info.fence) {
            state.pending = true;
        }
        self.queue.push_back(info.fence);
        self.max_pending = self.max_pending.max(self.queue.len());
        self.events.push(GpuEvent::Submit {
            buffer: info.command_buffer,
            fence: info.fence,
        });

        if self.completion == Completion::Instant && !self.hung.contains(&info.fence) {
            self.complete_through(info.fence);
        }
        Ok(())
    }

    fn queue_present(
        &mut self,
        wait: SemaphoreHandle,
        image_index: u32,
    ) -> FrameResult<PresentOutcome> {
        let call = self.present_calls;
        self.present_calls += 1;
        self.consume(wait);
        self.events.push(GpuEvent::Present { image_index });
        self.present_script
            .remove(&call)
            .unwrap_or(Ok(PresentOutcome::Optimal))
    }

    fn wait_idle(&mut self) -> FrameResult<()> {
        self.complete_all();
        self.events.push(GpuEvent::WaitIdle);
        Ok(())
    }

    fn swapchain_image_count(&self) -> u32 {
        self.image_count
    }
}
