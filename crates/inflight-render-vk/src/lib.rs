// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for the frame scheduler.

mod context;
mod convert;
mod error;
mod instance;
mod memory;
mod pipeline;
mod swapchain;

pub use context::{VkContext, VkOptions};
pub use pipeline::{CameraUniforms, Vertex};
pub use swapchain::VkVsyncMode;
