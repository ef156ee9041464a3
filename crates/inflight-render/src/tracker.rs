// SPDX-License-Identifier: CEPL-1.0
//! Swapchain image ownership bookkeeping.
//!
//! Maps each presentable image to the frame slot (and that slot's fence)
//! that last rendered into it. The scheduler consults it right after
//! acquisition: if a different slot still owns the image, that slot's fence
//! must be observed signaled before the image is written again.
//!
//! Pure bookkeeping, no GPU calls.

use crate::error::{FrameError, FrameResult};
use crate::handle::FenceHandle;

/// The slot currently rendering into an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageOwner {
    pub slot: usize,
    pub fence: FenceHandle,
}

#[derive(Debug, Default)]
pub struct ImageTracker {
    owners: Vec<Option<ImageOwner>>,
}

impl ImageTracker {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Assigns `image_index` to `owner`, returning whoever held it before.
    pub fn claim(&mut self, image_index: u32, owner: ImageOwner) -> FrameResult<Option<ImageOwner>> {
        let len = self.owners.len();
        let entry = self.owners.get_mut(image_index as usize).ok_or_else(|| {
            FrameError::InvalidHandle(format!(
                "swapchain image {image_index} out of range ({len} images)"
            ))
        })?;
        Ok(entry.replace(owner))
    }

    pub fn current_owner(&self, image_index: u32) -> Option<ImageOwner> {
        self.owners.get(image_index as usize).copied().flatten()
    }

    /// Forgets all owners and resizes for a rebuilt swapchain.
    pub fn reset(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
