// SPDX-License-Identifier: CEPL-1.0
//! Vulkan result codes to [`FrameError`].

use ash::vk;
use inflight_render::FrameError;

/// Maps a failed call. Swapchain codes stay recoverable, allocation
/// failures become `ResourceCreation`, anything else is treated as a lost
/// device.
pub(crate) fn map_vk(what: &str, r: vk::Result) -> FrameError {
    match r {
        vk::Result::ERROR_OUT_OF_DATE_KHR => FrameError::SwapchainOutOfDate,
        vk::Result::SUBOPTIMAL_KHR => FrameError::SwapchainSuboptimal,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY
        | vk::Result::ERROR_FRAGMENTED_POOL
        | vk::Result::ERROR_TOO_MANY_OBJECTS => {
            FrameError::ResourceCreation(format!("{what}: {r:?}"))
        }
        _ => FrameError::DeviceLost(format!("{what}: {r:?}")),
    }
}

/// Maps a setup helper's error, looking through context for a `vk::Result`.
pub(crate) fn map_setup(what: &str, e: anyhow::Error) -> FrameError {
    match e.downcast_ref::<vk::Result>() {
        Some(&r) => map_vk(what, r),
        None => FrameError::ResourceCreation(format!("{what}: {e:#}")),
    }
}
