// SPDX-License-Identifier: CEPL-1.0
//! Frame scheduling error types.

use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while driving frames.
///
/// Only the two swapchain conditions are recoverable: the caller rebuilds
/// the swapchain-dependent objects, resets the scheduler and carries on.
/// The rest terminate rendering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The device is gone (or returned a code we cannot interpret).
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// The surface changed and the swapchain can no longer be used.
    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    /// The swapchain still works but no longer matches the surface.
    #[error("swapchain suboptimal")]
    SwapchainSuboptimal,

    /// A GPU object could not be created.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),

    /// A null or unknown handle reached a call that needs a live one.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// A fence never signaled within the configured retry budget.
    #[error("fence not signaled after {waited:?}")]
    FenceTimeout { waited: Duration },
}

impl FrameError {
    /// The caller can rebuild the swapchain and keep rendering.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::SwapchainOutOfDate | FrameError::SwapchainSuboptimal
        )
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

/// Result type alias for frame operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;
