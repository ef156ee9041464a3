// SPDX-License-Identifier: CEPL-1.0
//! Frame-in-flight scheduling.
//!
//! [`FrameScheduler`] owns `N` frame slots and drives one frame per
//! [`render_frame`](FrameScheduler::render_frame) call:
//!
//! ```text
//! slot = counter % N
//! wait(slot fence) → acquire(image i) → wait(owner of i, if another slot)
//!   → build commands → reset fence, claim i → write uniforms → record
//!   → submit → present
//! counter += 1
//! ```
//!
//! At most `N` submissions are ever pending. Swapchain invalidation is
//! surfaced to the caller, who rebuilds the swapchain and calls
//! [`reset`](FrameScheduler::reset).

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::command::{CommandRecorder, DrawBatch, PipelineBinding, RecordInputs, RenderTargets};
use crate::context::{FenceWait, GraphicsContext, PresentOutcome, SubmitInfo, WaitStage};
use crate::descriptor::{BoundResource, DescriptorBatch};
use crate::error::{FrameError, FrameResult};
use crate::handle::{DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle};
use crate::slot::{FrameSlot, SlotRegistry, SlotState};
use crate::tracker::{ImageOwner, ImageTracker};

/// How long a blocking fence wait may take before it is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceWaitPolicy {
    /// Timeout of a single wait call.
    pub timeout: Duration,
    /// Consecutive timed-out waits tolerated before failing with
    /// [`FrameError::FenceTimeout`].
    pub max_timeouts: u32,
}

impl Default for FenceWaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            max_timeouts: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Frames in flight. `None` matches the swapchain image count.
    pub slot_count: Option<usize>,
    /// Size in bytes of each slot's uniform buffer.
    pub uniform_size: u64,
    pub fence_wait: FenceWaitPolicy,
}

impl SchedulerConfig {
    pub fn new(uniform_size: u64) -> Self {
        Self {
            slot_count: None,
            uniform_size,
            fence_wait: FenceWaitPolicy::default(),
        }
    }

    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = Some(slot_count);
        self
    }

    pub fn with_fence_wait(mut self, fence_wait: FenceWaitPolicy) -> Self {
        self.fence_wait = fence_wait;
        self
    }
}

/// What one frame draws.
#[derive(Clone, Copy, Debug)]
pub struct FrameInputs<'a> {
    pub pipeline: &'a PipelineBinding,
    pub targets: &'a RenderTargets,
    /// Bound after the per-frame set, in order.
    pub static_sets: &'a [DescriptorSetHandle],
    pub batches: &'a [DrawBatch],
    /// Copied into the slot's uniform buffer once its fence has signaled.
    pub uniforms: &'a [u8],
}

/// A frame that was submitted and presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub slot: usize,
    pub image_index: u32,
    /// Another slot still owned the acquired image and had to be waited on.
    pub waited_on_collision: bool,
}

#[derive(Debug)]
pub struct FrameScheduler {
    slots: SlotRegistry,
    tracker: ImageTracker,
    frame_counter: u64,
    uniform_size: u64,
    fence_wait: FenceWaitPolicy,
    recorder: CommandRecorder,
    sets: Vec<DescriptorSetHandle>,
}

impl FrameScheduler {
    /// Creates the slots and an empty image tracker sized to the context's
    /// current swapchain.
    pub fn new<C: GraphicsContext + ?Sized>(
        ctx: &mut C,
        config: SchedulerConfig,
        frame_layout: DescriptorSetLayoutHandle,
    ) -> FrameResult<Self> {
        let image_count = ctx.swapchain_image_count() as usize;
        let slot_count = config.slot_count.unwrap_or(image_count);
        let slots = SlotRegistry::create(ctx, slot_count, config.uniform_size, frame_layout)?;

        info!(
            "frame scheduler ready: {} frame(s) in flight, {} swapchain image(s)",
            slot_count, image_count
        );
        if slot_count > image_count {
            debug!("more slots than images; image collisions will be waited on");
        }

        Ok(Self {
            slots,
            tracker: ImageTracker::new(image_count),
            frame_counter: 0,
            uniform_size: config.uniform_size,
            fence_wait: config.fence_wait,
            recorder: CommandRecorder::new(),
            sets: Vec::new(),
        })
    }

    /// Renders and presents one frame.
    ///
    /// `SwapchainOutOfDate` from acquire returns before anything is reset or
    /// submitted. A suboptimal acquire still renders and presents; it and
    /// any out-of-date/suboptimal present are surfaced after the frame
    /// counter advances.
    ///
    /// Inputs that cannot be recorded (a missing framebuffer, a null handle)
    /// fail before the slot fence is reset, so the slot stays reusable. The
    /// acquired image is not presented in that case and its semaphore stays
    /// signaled; [`reset`](Self::reset) clears it.
    pub fn render_frame<C: GraphicsContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        inputs: &FrameInputs<'_>,
    ) -> FrameResult<FrameReport> {
        if inputs.uniforms.len() as u64 > self.uniform_size {
            return Err(FrameError::InvalidHandle(format!(
                "{} bytes of uniforms exceed the {} byte slot buffer",
                inputs.uniforms.len(),
                self.uniform_size
            )));
        }

        let frame = self.frame_counter;
        let index = self.current_slot();
        let slot = *self.slots.slot(index);

        self.wait(ctx, slot.in_flight)?;
        self.mark_idle(index);
        self.set_state(index, SlotState::Acquiring);

        let acquired = match ctx.acquire_next_image(slot.image_available) {
            Ok(acquired) => acquired,
            Err(e) => {
                self.set_state(index, SlotState::Idle);
                if e.is_recoverable() {
                    debug!("acquire on frame {}: {}", frame, e);
                }
                return Err(e);
            }
        };
        let image_index = acquired.index;

        let mut waited_on_collision = false;
        if let Some(owner) = self.tracker.current_owner(image_index) {
            if owner.slot != index && !ctx.fence_signaled(owner.fence)? {
                debug!(
                    "image {} still owned by slot {}; waiting before reuse",
                    image_index, owner.slot
                );
                self.wait(ctx, owner.fence)?;
                self.mark_idle(owner.slot);
                waited_on_collision = true;
            }
        }

        // Built before the fence reset so a bad input leaves the slot reusable.
        self.sets.clear();
        self.sets.push(slot.descriptor_set);
        self.sets.extend_from_slice(inputs.static_sets);
        let built = self.recorder.build(&RecordInputs {
            image_index,
            pipeline: inputs.pipeline,
            targets: inputs.targets,
            descriptor_sets: &self.sets,
            batches: inputs.batches,
        });
        let commands = match built {
            Ok(list) => list,
            Err(e) => {
                self.set_state(index, SlotState::Idle);
                warn!("frame {} dropped before submission: {}", frame, e);
                return Err(e);
            }
        };

        ctx.reset_fence(slot.in_flight)?;
        self.tracker.claim(
            image_index,
            ImageOwner {
                slot: index,
                fence: slot.in_flight,
            },
        )?;

        self.set_state(index, SlotState::Recording);
        ctx.update_buffer(&slot.uniform_buffer, inputs.uniforms)?;
        DescriptorBatch::new()
            .bind(
                slot.descriptor_set,
                0,
                BoundResource::uniform(&slot.uniform_buffer),
            )
            .apply(ctx)?;
        self.recorder.record_list(ctx, slot.command_buffer, &commands)?;

        ctx.submit(&SubmitInfo {
            command_buffer: slot.command_buffer,
            wait: slot.image_available,
            wait_stage: WaitStage::ColorAttachmentOutput,
            signal: slot.render_finished,
            fence: slot.in_flight,
        })?;
        self.set_state(index, SlotState::Submitted);

        let presented = ctx.queue_present(slot.render_finished, image_index);
        self.frame_counter += 1;

        match presented {
            Ok(PresentOutcome::Optimal) if !acquired.suboptimal => Ok(FrameReport {
                frame,
                slot: index,
                image_index,
                waited_on_collision,
            }),
            Ok(_) => {
                debug!("frame {} presented to a suboptimal swapchain", frame);
                Err(FrameError::SwapchainSuboptimal)
            }
            Err(e) => Err(e),
        }
    }

    /// Blocks until every slot's last submission has completed.
    pub fn drain<C: GraphicsContext + ?Sized>(&mut self, ctx: &mut C) -> FrameResult<()> {
        for (i, fence) in self.slots.fences().into_iter().enumerate() {
            self.wait(ctx, fence)?;
            self.set_state(i, SlotState::Idle);
        }
        debug!("drained {} slot(s)", self.slots.len());
        Ok(())
    }

    /// Prepares for a rebuilt swapchain with `image_count` images.
    ///
    /// Semaphores are recreated because an aborted acquire can leave one
    /// signaled with nobody waiting on it. A present may still be waiting on
    /// a `render_finished` semaphore after every fence has signaled, so the
    /// device is idled before they are destroyed.
    pub fn reset<C: GraphicsContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        image_count: usize,
    ) -> FrameResult<()> {
        self.drain(ctx)?;
        ctx.wait_idle()?;
        self.slots.recreate_signals(ctx)?;
        self.tracker.reset(image_count);
        self.frame_counter = 0;
        info!(
            "frame scheduler reset for {} swapchain image(s)",
            image_count
        );
        Ok(())
    }

    /// Waits for the GPU and releases every slot resource.
    ///
    /// Usable after a fatal error: a failed drain is logged and the device
    /// is idled directly.
    pub fn destroy<C: GraphicsContext + ?Sized>(mut self, ctx: &mut C) {
        if let Err(e) = self.drain(ctx) {
            warn!("drain before teardown failed: {}", e);
        }
        if let Err(e) = ctx.wait_idle() {
            warn!("wait idle before teardown failed: {}", e);
        }
        self.slots.destroy(ctx);
        info!("frame scheduler destroyed");
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// The slot the next frame will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(FrameSlot::state)
    }

    pub fn tracker(&self) -> &ImageTracker {
        &self.tracker
    }

    fn set_state(&mut self, index: usize, state: SlotState) {
        self.slots.slot_mut(index).state = state;
    }

    /// Called once the slot's fence is known to have signaled.
    fn mark_idle(&mut self, index: usize) {
        let slot = self.slots.slot_mut(index);
        if slot.state == SlotState::Submitted {
            slot.state = SlotState::Idle;
        }
    }

    /// Bounded wait with retries. A timeout on its own is a slow frame; only
    /// `max_timeouts` in a row is an error.
    fn wait<C: GraphicsContext + ?Sized>(&self, ctx: &mut C, fence: FenceHandle) -> FrameResult<()> {
        let policy = self.fence_wait;
        let limit = policy.max_timeouts.max(1);
        let mut timeouts = 0u32;
        loop {
            match ctx.wait_for_fence(fence, policy.timeout)? {
                FenceWait::Signaled => return Ok(()),
                FenceWait::TimedOut => {
                    timeouts += 1;
                    if timeouts >= limit {
                        let waited = policy.timeout * timeouts;
                        error!("fence {:?} not signaled after {:?}", fence, waited);
                        return Err(FrameError::FenceTimeout { waited });
                    }
                    warn!(
                        "slow frame: fence {:?} pending after {:?} ({}/{})",
                        fence,
                        policy.timeout * timeouts,
                        timeouts,
                        limit
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, IndexBinding, IndexType};
    use crate::context::{BufferUsage, MemoryFlags};
    use crate::descriptor::{DescriptorKind, DescriptorPoolBuilder};
    use crate::handle::{
        Extent2D, FramebufferHandle, PipelineHandle, PipelineLayoutHandle, RenderPassHandle,
        TextureData, TextureFormat,
    };
    use crate::testing::{GpuEvent, SimGpu, WaitOutcome};

    const LAYOUT: DescriptorSetLayoutHandle = DescriptorSetLayoutHandle::from_raw(500);
    const UNIFORM_SIZE: u64 = 64;

    struct Scene {
        pipeline: PipelineBinding,
        targets: RenderTargets,
        batches: Vec<DrawBatch>,
    }

    impl Scene {
        fn new(gpu: &mut SimGpu) -> Self {
            let vb = gpu
                .create_buffer(256, BufferUsage::VERTEX, MemoryFlags::DEVICE_LOCAL)
                .unwrap();
            let ib = gpu
                .create_buffer(12, BufferUsage::INDEX, MemoryFlags::DEVICE_LOCAL)
                .unwrap();
            let mut scene = Self {
                pipeline: PipelineBinding {
                    pipeline: PipelineHandle::from_raw(9001),
                    layout: PipelineLayoutHandle::from_raw(9002),
                },
                targets: RenderTargets {
                    render_pass: RenderPassHandle::from_raw(9003),
                    framebuffers: Vec::new(),
                    extent: Extent2D::new(800, 600),
                    clear_color: [0.0, 0.0, 0.0, 1.0],
                    clear_depth: Some(1.0),
                },
                batches: vec![DrawBatch::indexed(
                    vb.handle,
                    4,
                    IndexBinding {
                        buffer: ib.handle,
                        index_type: IndexType::U16,
                        count: 6,
                    },
                )],
            };
            scene.rebuild_targets(gpu.swapchain_image_count());
            scene
        }

        fn rebuild_targets(&mut self, image_count: u32) {
            self.targets.framebuffers = (0..image_count)
                .map(|i| FramebufferHandle::from_raw(9100 + u64::from(i)))
                .collect();
        }

        fn inputs<'a>(&'a self, uniforms: &'a [u8]) -> FrameInputs<'a> {
            FrameInputs {
                pipeline: &self.pipeline,
                targets: &self.targets,
                static_sets: &[],
                batches: &self.batches,
                uniforms,
            }
        }
    }

    fn scheduler(gpu: &mut SimGpu, slots: usize) -> FrameScheduler {
        FrameScheduler::new(
            gpu,
            SchedulerConfig::new(UNIFORM_SIZE).with_slot_count(slots),
            LAYOUT,
        )
        .unwrap()
    }

    fn blocked_waits(gpu: &SimGpu) -> usize {
        gpu.count(|e| {
            matches!(
                e,
                GpuEvent::WaitFence {
                    outcome: WaitOutcome::Blocked,
                    ..
                }
            )
        })
    }

    #[test]
    fn slot_count_defaults_to_image_count() {
        let mut gpu = SimGpu::new(3);
        let sched = FrameScheduler::new(&mut gpu, SchedulerConfig::new(UNIFORM_SIZE), LAYOUT).unwrap();
        assert_eq!(sched.slot_count(), 3);
        assert_eq!(sched.tracker().len(), 3);
        assert_eq!(sched.current_slot(), 0);
    }

    #[test]
    fn two_slots_instant_gpu_cycles_without_blocking() {
        let mut gpu = SimGpu::new(2);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        let slots: Vec<usize> = (0..5)
            .map(|_| sched.render_frame(&mut gpu, &scene.inputs(&[1; 16])).unwrap().slot)
            .collect();

        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(sched.frame_counter(), 5);
        assert_eq!(blocked_waits(&gpu), 0);
        assert_eq!(gpu.count(|e| matches!(e, GpuEvent::Present { .. })), 5);
        assert_eq!(gpu.signal_violations(), 0);
    }

    #[test]
    fn slot_assignment_repeats_every_n_frames() {
        let mut gpu = SimGpu::deferred(3);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 3);

        let reports: Vec<FrameReport> = (0..9)
            .map(|_| sched.render_frame(&mut gpu, &scene.inputs(&[0; 8])).unwrap())
            .collect();
        for k in 0..6 {
            assert_eq!(reports[k].slot, reports[k + 3].slot);
            assert_eq!(reports[k].frame as usize, k);
        }
    }

    #[test]
    fn never_more_than_n_frames_pending() {
        for n in 1..=4 {
            let mut gpu = SimGpu::deferred(n as u32);
            let scene = Scene::new(&mut gpu);
            let mut sched = scheduler(&mut gpu, n);

            for _ in 0..(3 * n + 2) {
                sched.render_frame(&mut gpu, &scene.inputs(&[7; 32])).unwrap();
                assert!(gpu.pending() <= n);
            }
            assert_eq!(gpu.max_pending(), n, "with {n} slot(s)");
        }
    }

    #[test]
    fn uniforms_are_written_only_after_the_gpu_is_done() {
        let mut gpu = SimGpu::deferred(2);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        for frame in 0..8u8 {
            let report = sched
                .render_frame(&mut gpu, &scene.inputs(&[frame; 16]))
                .unwrap();
            let ubo = sched.slot(report.slot).unwrap().uniform_buffer().handle;
            assert_eq!(&gpu.contents(ubo).unwrap()[..16], &[frame; 16]);
        }
        assert_eq!(gpu.buffer_hazards(), 0);
        assert_eq!(gpu.image_hazards(), 0);
        assert_eq!(gpu.signal_violations(), 0);

        // the simulator does catch a write into a buffer still being read
        let slot = *sched.slot(sched.current_slot() ^ 1).unwrap().uniform_buffer();
        gpu.update_buffer(&slot, &[0; 4]).unwrap();
        assert_eq!(gpu.buffer_hazards(), 1);
    }

    #[test]
    fn out_of_date_acquire_then_reset_restarts_at_slot_zero() {
        let mut gpu = SimGpu::new(2);
        gpu.fail_acquire_on(3, FrameError::SwapchainOutOfDate);
        let mut scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        for _ in 0..3 {
            sched.render_frame(&mut gpu, &scene.inputs(&[1; 4])).unwrap();
        }
        assert_eq!(sched.current_slot(), 1);

        let err = sched
            .render_frame(&mut gpu, &scene.inputs(&[1; 4]))
            .unwrap_err();
        assert_eq!(err, FrameError::SwapchainOutOfDate);
        assert!(err.is_recoverable());
        // nothing was reset or submitted for the aborted frame
        assert_eq!(sched.frame_counter(), 3);
        assert_eq!(gpu.count(|e| matches!(e, GpuEvent::Submit { .. })), 3);
        assert!(gpu.is_signaled(sched.slot(1).unwrap().in_flight_fence()));
        assert_eq!(sched.slot_state(1), Some(SlotState::Idle));

        gpu.set_image_count(3);
        scene.rebuild_targets(3);
        sched.reset(&mut gpu, 3).unwrap();
        assert_eq!(sched.frame_counter(), 0);
        assert_eq!(sched.tracker().len(), 3);
        assert!((0..3).all(|i| sched.tracker().current_owner(i).is_none()));

        let report = sched.render_frame(&mut gpu, &scene.inputs(&[1; 4])).unwrap();
        assert_eq!(report.slot, 0);
        assert_eq!(report.frame, 0);
        assert_eq!(gpu.signal_violations(), 0);
    }

    #[test]
    fn more_slots_than_images_waits_on_the_owner() {
        let mut gpu = SimGpu::deferred(1);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        let first = sched.render_frame(&mut gpu, &scene.inputs(&[1; 4])).unwrap();
        assert!(!first.waited_on_collision);
        let owner_fence = sched.slot(0).unwrap().in_flight_fence();
        assert!(!gpu.is_signaled(owner_fence));

        let second = sched.render_frame(&mut gpu, &scene.inputs(&[2; 4])).unwrap();
        assert_eq!(second.slot, 1);
        assert_eq!(second.image_index, 0);
        assert!(second.waited_on_collision);
        assert!(gpu.events().contains(&GpuEvent::WaitFence {
            fence: owner_fence,
            outcome: WaitOutcome::Blocked
        }));
        assert_eq!(
            sched.tracker().current_owner(0).map(|o| o.slot),
            Some(1)
        );
        // slot 0's fence was seen signaled during the collision wait
        assert_eq!(sched.slot_state(0), Some(SlotState::Idle));
        assert_eq!(sched.slot_state(1), Some(SlotState::Submitted));
        assert_eq!(gpu.image_hazards(), 0);
    }

    #[test]
    fn unrecordable_frame_leaves_the_slot_reusable() {
        let mut gpu = SimGpu::deferred(2);
        let mut scene = Scene::new(&mut gpu);
        scene.targets.framebuffers.truncate(1);
        let mut sched = scheduler(&mut gpu, 2);

        sched.render_frame(&mut gpu, &scene.inputs(&[1; 4])).unwrap();
        let fence = sched.slot(1).unwrap().in_flight_fence();

        // image 1 has no framebuffer
        let err = sched
            .render_frame(&mut gpu, &scene.inputs(&[2; 4]))
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidHandle(_)));
        assert_eq!(sched.frame_counter(), 1);
        assert_eq!(sched.slot_state(1), Some(SlotState::Idle));
        assert!(gpu.is_signaled(fence));
        assert!(!gpu.events().contains(&GpuEvent::ResetFence { fence }));
        assert!(sched.tracker().current_owner(1).is_none());

        gpu.clear_events();
        sched.drain(&mut gpu).unwrap();
        let timeouts = gpu.count(|e| {
            matches!(
                e,
                GpuEvent::WaitFence {
                    outcome: WaitOutcome::TimedOut,
                    ..
                }
            )
        });
        assert_eq!(timeouts, 0);
        assert_eq!(gpu.pending(), 0);
    }

    #[test]
    fn reset_idles_the_device_before_replacing_semaphores() {
        let mut gpu = SimGpu::deferred(2);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);
        for _ in 0..2 {
            sched.render_frame(&mut gpu, &scene.inputs(&[1; 4])).unwrap();
        }
        let old = sched.slot(0).unwrap().render_finished();

        gpu.clear_events();
        sched.reset(&mut gpu, 2).unwrap();
        let events = gpu.events();
        let idle = events.iter().position(|e| *e == GpuEvent::WaitIdle).unwrap();
        let destroyed = events
            .iter()
            .position(|e| matches!(e, GpuEvent::DestroySemaphores { .. }))
            .unwrap();
        assert!(idle < destroyed);
        assert!(!gpu.semaphore_alive(old));
        assert!((0..2).all(|i| sched.slot_state(i) == Some(SlotState::Idle)));
    }

    #[test]
    fn texture_and_uniform_bindings_reach_the_recorded_buffer() {
        let mut gpu = SimGpu::new(2);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        let pool = DescriptorPoolBuilder::new()
            .add_pool_size(DescriptorKind::CombinedImageSampler, 1)
            .max_sets(1)
            .build(&mut gpu)
            .unwrap();
        let texture_set = gpu.allocate_descriptor_set(pool, LAYOUT).unwrap();
        let texture = gpu
            .create_texture(&TextureData {
                pixels: vec![128; 2 * 2 * 4],
                extent: Extent2D::new(2, 2),
                format: TextureFormat::Rgba8Srgb,
            })
            .unwrap();
        let sampler = gpu.create_texture_sampler(None).unwrap();
        let mut batch = DescriptorBatch::new().bind(
            texture_set,
            0,
            BoundResource::sampled(&texture, sampler),
        );
        assert_eq!(batch.flush(&mut gpu).unwrap(), 1);
        batch.clear();
        assert_eq!(batch.flush(&mut gpu).unwrap(), 0);

        let static_sets = [texture_set];
        let uniforms = [3u8; 16];
        let inputs = FrameInputs {
            static_sets: &static_sets,
            ..scene.inputs(&uniforms)
        };
        let report = sched.render_frame(&mut gpu, &inputs).unwrap();

        let slot = sched.slot(report.slot).unwrap();
        let recorded = gpu.recorded(slot.command_buffer()).unwrap();
        let bound_sets = recorded
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::BindDescriptorSets { sets, .. } => Some(sets.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(bound_sets, vec![slot.descriptor_set(), texture_set]);
        assert_eq!(
            gpu.bound(slot.descriptor_set(), 0),
            Some(BoundResource::uniform(slot.uniform_buffer()))
        );
        assert_eq!(
            gpu.bound(texture_set, 0),
            Some(BoundResource::CombinedImageSampler {
                view: texture.view,
                sampler
            })
        );
    }

    #[test]
    fn same_slot_same_image_records_the_same_commands() {
        let mut gpu = SimGpu::new(2);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        sched.render_frame(&mut gpu, &scene.inputs(&[0; 4])).unwrap();
        let cb = sched.slot(0).unwrap().command_buffer();
        let first = gpu.recorded(cb).cloned().unwrap();
        sched.render_frame(&mut gpu, &scene.inputs(&[0; 4])).unwrap();
        sched.render_frame(&mut gpu, &scene.inputs(&[0; 4])).unwrap();
        assert_eq!(gpu.recorded(cb), Some(&first));
    }

    #[test]
    fn suboptimal_acquire_still_presents() {
        let mut gpu = SimGpu::new(2);
        gpu.suboptimal_acquire_on(1);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        sched.render_frame(&mut gpu, &scene.inputs(&[0; 4])).unwrap();
        let err = sched
            .render_frame(&mut gpu, &scene.inputs(&[0; 4]))
            .unwrap_err();
        assert_eq!(err, FrameError::SwapchainSuboptimal);
        assert_eq!(sched.frame_counter(), 2);
        assert_eq!(gpu.count(|e| matches!(e, GpuEvent::Present { .. })), 2);
    }

    #[test]
    fn present_errors_surface_after_the_counter_advances() {
        let mut gpu = SimGpu::new(2);
        gpu.present_result_on(0, Err(FrameError::SwapchainOutOfDate));
        gpu.present_result_on(1, Ok(PresentOutcome::Suboptimal));
        gpu.present_result_on(2, Err(FrameError::DeviceLost("gone".into())));
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        let r0 = sched.render_frame(&mut gpu, &scene.inputs(&[0; 4]));
        assert_eq!(r0, Err(FrameError::SwapchainOutOfDate));
        assert_eq!(sched.frame_counter(), 1);

        let r1 = sched.render_frame(&mut gpu, &scene.inputs(&[0; 4]));
        assert_eq!(r1, Err(FrameError::SwapchainSuboptimal));

        let r2 = sched.render_frame(&mut gpu, &scene.inputs(&[0; 4])).unwrap_err();
        assert!(r2.is_fatal());
        assert_eq!(sched.frame_counter(), 3);
    }

    #[test]
    fn hung_fence_times_out_after_the_retry_budget() {
        let mut gpu = SimGpu::deferred(1);
        let scene = Scene::new(&mut gpu);
        let policy = FenceWaitPolicy {
            timeout: Duration::from_millis(10),
            max_timeouts: 3,
        };
        let mut sched = FrameScheduler::new(
            &mut gpu,
            SchedulerConfig::new(UNIFORM_SIZE)
                .with_slot_count(1)
                .with_fence_wait(policy),
            LAYOUT,
        )
        .unwrap();

        sched.render_frame(&mut gpu, &scene.inputs(&[0; 4])).unwrap();
        gpu.hang(sched.slot(0).unwrap().in_flight_fence());

        let err = sched
            .render_frame(&mut gpu, &scene.inputs(&[0; 4]))
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::FenceTimeout {
                waited: Duration::from_millis(30)
            }
        );
        assert!(err.is_fatal());
        let timeouts = gpu.count(|e| {
            matches!(
                e,
                GpuEvent::WaitFence {
                    outcome: WaitOutcome::TimedOut,
                    ..
                }
            )
        });
        assert_eq!(timeouts, 3);
        assert_eq!(sched.frame_counter(), 1);
    }

    #[test]
    fn oversized_uniforms_are_rejected() {
        let mut gpu = SimGpu::new(1);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 1);
        let big = vec![0u8; UNIFORM_SIZE as usize + 1];
        let err = sched.render_frame(&mut gpu, &scene.inputs(&big)).unwrap_err();
        assert!(matches!(err, FrameError::InvalidHandle(_)));
        assert_eq!(gpu.count(|e| matches!(e, GpuEvent::Acquire { .. })), 0);
    }

    #[test]
    fn slot_states_follow_the_frame() {
        let mut gpu = SimGpu::deferred(2);
        let scene = Scene::new(&mut gpu);
        let mut sched = scheduler(&mut gpu, 2);

        sched.render_frame(&mut gpu, &scene.inputs(&[0; 4])).unwrap();
        assert_eq!(sched.slot_state(0), Some(SlotState::Submitted));
        assert_eq!(sched.slot_state(1), Some(SlotState::Idle));

        sched.drain(&mut gpu).unwrap();
        assert_eq!(sched.slot_state(0), Some(SlotState::Idle));
        assert_eq!(gpu.pending(), 0);
    }

    #[test]
    fn destroy_leaves_nothing_behind() {
        let mut gpu = SimGpu::deferred(2);
        let mut sched = scheduler(&mut gpu, 2);
        let scene = Scene::new(&mut gpu);
        for _ in 0..3 {
            sched.render_frame(&mut gpu, &scene.inputs(&[0; 4])).unwrap();
        }
        let before = gpu.live_objects();
        sched.destroy(&mut gpu);
        assert_eq!(gpu.pending(), 0);
        // only the scene's two geometry buffers remain
        assert_eq!(gpu.live_objects(), 2);
        assert!(before > 2);
    }
}
