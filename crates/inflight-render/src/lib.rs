// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame-in-flight core.
//!
//! The [`FrameScheduler`] keeps up to `N` frames in flight over any
//! [`GraphicsContext`]. Backends (see `inflight-render-vk`) provide the
//! context; everything here only ever sees opaque handles.

pub mod command;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod scheduler;
pub mod slot;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use command::{
    Command, CommandList, CommandRecorder, DrawBatch, IndexBinding, IndexType, PipelineBinding,
    RecordInputs, RenderTargets, ScissorRect, Viewport,
};
pub use context::{
    AcquiredImage, BufferUsage, FenceWait, GraphicsContext, MemoryFlags, PresentOutcome,
    SubmitInfo, WaitStage,
};
pub use descriptor::{
    BoundResource, DescriptorBatch, DescriptorKind, DescriptorPoolBuilder, DescriptorWrite,
};
pub use error::{FrameError, FrameResult};
pub use handle::*;
pub use scheduler::{FenceWaitPolicy, FrameInputs, FrameReport, FrameScheduler, SchedulerConfig};
pub use slot::{FrameSlot, SlotRegistry, SlotState};
pub use tracker::{ImageOwner, ImageTracker};
