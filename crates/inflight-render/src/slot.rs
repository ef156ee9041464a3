// SPDX-License-Identifier: CEPL-1.0
//! Per-frame slot registry.
//!
//! Each frame in flight owns a private set of resources so that frame `k+1`
//! can be recorded while frame `k` is still executing:
//!
//! ```text
//! slot f: command buffer ─┐
//!         image available ├─ acquire → submit
//!         render finished ├─ submit  → present
//!         in-flight fence ├─ submit  → CPU (reuse gate)
//!         uniform buffer  ├─ CPU writes after the fence wait
//!         descriptor set ─┘  binding 0 = uniform buffer
//! ```

use tracing::{debug, info, warn};

use crate::context::{BufferUsage, GraphicsContext, MemoryFlags};
use crate::descriptor::{BoundResource, DescriptorBatch, DescriptorKind, DescriptorPoolBuilder};
use crate::error::{FrameError, FrameResult};
use crate::handle::{
    Buffer, CommandBufferHandle, CommandPoolHandle, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, FenceHandle, SemaphoreHandle,
};

/// Where a slot is in its frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
}

#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub(crate) command_buffer: CommandBufferHandle,
    pub(crate) image_available: SemaphoreHandle,
    pub(crate) render_finished: SemaphoreHandle,
    pub(crate) in_flight: FenceHandle,
    pub(crate) uniform_buffer: Buffer,
    pub(crate) descriptor_set: DescriptorSetHandle,
    pub(crate) state: SlotState,
}

impl FrameSlot {
    #[inline]
    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> SemaphoreHandle {
        self.image_available
    }

    #[inline]
    pub fn render_finished(&self) -> SemaphoreHandle {
        self.render_finished
    }

    #[inline]
    pub fn in_flight_fence(&self) -> FenceHandle {
        self.in_flight
    }

    #[inline]
    pub fn uniform_buffer(&self) -> &Buffer {
        &self.uniform_buffer
    }

    #[inline]
    pub fn descriptor_set(&self) -> DescriptorSetHandle {
        self.descriptor_set
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// Fixed array of frame slots plus the pools they were allocated from.
#[derive(Debug)]
pub struct SlotRegistry {
    slots: Vec<FrameSlot>,
    command_pool: CommandPoolHandle,
    descriptor_pool: DescriptorPoolHandle,
}

impl SlotRegistry {
    /// Creates `count` slots, each with a `uniform_size`-byte host-coherent
    /// uniform buffer bound at binding 0 of a set allocated from `frame_layout`.
    /// Fences start signaled so the first wait on each slot returns at once.
    /// On failure everything created so far is released.
    pub fn create<C: GraphicsContext + ?Sized>(
        ctx: &mut C,
        count: usize,
        uniform_size: u64,
        frame_layout: DescriptorSetLayoutHandle,
    ) -> FrameResult<Self> {
        if count == 0 {
            return Err(FrameError::ResourceCreation(
                "at least one frame slot is required".into(),
            ));
        }
        if uniform_size == 0 {
            return Err(FrameError::ResourceCreation(
                "per-frame uniform buffer size must be non-zero".into(),
            ));
        }
        if frame_layout.is_null() {
            return Err(FrameError::InvalidHandle(
                "per-frame descriptor set layout is null".into(),
            ));
        }
        let mut parts = SlotParts::default();
        if let Err(e) = parts.fill(ctx, count, uniform_size, frame_layout) {
            warn!("slot registry creation failed, releasing partial slots: {}", e);
            parts.release(ctx);
            return Err(e);
        }

        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            slots.push(FrameSlot {
                command_buffer: parts.command_buffers[i],
                image_available: parts.image_available[i],
                render_finished: parts.render_finished[i],
                in_flight: parts.fences[i],
                uniform_buffer: parts.uniform_buffers[i],
                descriptor_set: parts.descriptor_sets[i],
                state: SlotState::Idle,
            });
            debug!("frame slot {} ready", i);
        }

        info!(
            "slot registry created: {} slot(s), {} byte uniform buffer each",
            count, uniform_size
        );

        Ok(Self {
            slots,
            command_pool: parts.command_pool,
            descriptor_pool: parts.descriptor_pool,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        &mut self.slots[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSlot> {
        self.slots.iter()
    }

    pub fn fences(&self) -> Vec<FenceHandle> {
        self.slots.iter().map(|s| s.in_flight).collect()
    }

    /// Replaces every slot's semaphores with fresh ones.
    ///
    /// Only valid once all slot fences have signaled.
    pub fn recreate_signals<C: GraphicsContext + ?Sized>(&mut self, ctx: &mut C) -> FrameResult<()> {
        let n = self.slots.len() as u32;
        let image_available = ctx.create_semaphores(n)?;
        let render_finished = ctx.create_semaphores(n)?;

        let old: Vec<SemaphoreHandle> = self
            .slots
            .iter()
            .flat_map(|s| [s.image_available, s.render_finished])
            .collect();
        ctx.destroy_semaphores(&old);

        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.image_available = image_available[i];
            slot.render_finished = render_finished[i];
            slot.state = SlotState::Idle;
        }
        debug!("recreated signals for {} slot(s)", n);
        Ok(())
    }

    /// Releases every slot resource. The caller makes sure the device is idle.
    pub fn destroy<C: GraphicsContext + ?Sized>(self, ctx: &mut C) {
        let fences = self.fences();
        let semaphores: Vec<SemaphoreHandle> = self
            .slots
            .iter()
            .flat_map(|s| [s.image_available, s.render_finished])
            .collect();

        ctx.destroy_semaphores(&semaphores);
        ctx.destroy_fences(&fences);
        ctx.destroy_descriptor_pool(self.descriptor_pool);
        for slot in self.slots {
            ctx.destroy_buffer(slot.uniform_buffer);
            ctx.free_command_buffer(self.command_pool, slot.command_buffer);
        }
        ctx.destroy_command_pool(self.command_pool);
        debug!("slot registry destroyed");
    }
}

/// Whatever `SlotRegistry::create` has made so far.
#[derive(Default)]
struct SlotParts {
    command_pool: CommandPoolHandle,
    command_buffers: Vec<CommandBufferHandle>,
    image_available: Vec<SemaphoreHandle>,
    render_finished: Vec<SemaphoreHandle>,
    fences: Vec<FenceHandle>,
    uniform_buffers: Vec<Buffer>,
    descriptor_pool: DescriptorPoolHandle,
    descriptor_sets: Vec<DescriptorSetHandle>,
}

impl SlotParts {
    fn fill<C: GraphicsContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        count: usize,
        uniform_size: u64,
        frame_layout: DescriptorSetLayoutHandle,
    ) -> FrameResult<()> {
        let n = count as u32;

        self.command_pool = ctx.create_command_pool()?;
        self.command_buffers = ctx.allocate_command_buffers(self.command_pool, n)?;
        self.image_available = ctx.create_semaphores(n)?;
        self.render_finished = ctx.create_semaphores(n)?;
        self.fences = ctx.create_fences(n, true)?;

        for _ in 0..count {
            self.uniform_buffers.push(ctx.create_buffer(
                uniform_size,
                BufferUsage::UNIFORM,
                MemoryFlags::HOST_SHARED,
            )?);
        }

        self.descriptor_pool = DescriptorPoolBuilder::new()
            .add_pool_size(DescriptorKind::UniformBuffer, n)
            .max_sets(n)
            .build(ctx)?;

        let mut batch = DescriptorBatch::new();
        for buffer in &self.uniform_buffers {
            let set = ctx.allocate_descriptor_set(self.descriptor_pool, frame_layout)?;
            batch.push(set, 0, BoundResource::uniform(buffer));
            self.descriptor_sets.push(set);
        }
        batch.apply(ctx)?;
        Ok(())
    }

    /// Nothing here has been submitted yet, so no wait is needed.
    fn release<C: GraphicsContext + ?Sized>(self, ctx: &mut C) {
        if !self.descriptor_pool.is_null() {
            ctx.destroy_descriptor_pool(self.descriptor_pool);
        }
        for buffer in self.uniform_buffers {
            ctx.destroy_buffer(buffer);
        }
        ctx.destroy_fences(&self.fences);
        ctx.destroy_semaphores(&self.image_available);
        ctx.destroy_semaphores(&self.render_finished);
        if !self.command_pool.is_null() {
            for cb in self.command_buffers {
                ctx.free_command_buffer(self.command_pool, cb);
            }
            ctx.destroy_command_pool(self.command_pool);
        }
    }
}
