// SPDX-License-Identifier: CEPL-1.0
//! Descriptor pool construction and batched descriptor set updates.
//!
//! A [`DescriptorBatch`] collects bindings and applies them to the device in
//! a single [`GraphicsContext::write_descriptors`] call:
//!
//! ```ignore
//! DescriptorBatch::new()
//!     .bind(set, 0, BoundResource::uniform(&ubo))
//!     .apply(ctx)?;
//! ```

use tracing::debug;

use crate::context::GraphicsContext;
use crate::error::{FrameError, FrameResult};
use crate::handle::{
    Buffer, BufferHandle, DescriptorPoolHandle, DescriptorSetHandle, ImageViewHandle,
    SamplerHandle, Texture,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

/// The resource a binding points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundResource {
    UniformBuffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    CombinedImageSampler {
        view: ImageViewHandle,
        sampler: SamplerHandle,
    },
}

impl BoundResource {
    /// The whole of `buffer` as a uniform block.
    pub fn uniform(buffer: &Buffer) -> Self {
        BoundResource::UniformBuffer {
            buffer: buffer.handle,
            offset: 0,
            range: buffer.size,
        }
    }

    /// A shader-readable texture sampled through `sampler`.
    pub fn sampled(texture: &Texture, sampler: SamplerHandle) -> Self {
        BoundResource::CombinedImageSampler {
            view: texture.view,
            sampler,
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            BoundResource::UniformBuffer { .. } => DescriptorKind::UniformBuffer,
            BoundResource::CombinedImageSampler { .. } => DescriptorKind::CombinedImageSampler,
        }
    }
}

/// One pending binding: `resource` goes to `binding` of `set`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: DescriptorSetHandle,
    pub binding: u32,
    pub resource: BoundResource,
}

/// Accumulates descriptor writes and applies them together.
///
/// Binding the same `(set, binding)` twice before a flush is not supported;
/// both writes are forwarded in order.
#[derive(Debug, Default)]
pub struct DescriptorBatch {
    writes: Vec<DescriptorWrite>,
}

impl DescriptorBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, set: DescriptorSetHandle, binding: u32, resource: BoundResource) -> Self {
        self.push(set, binding, resource);
        self
    }

    pub fn push(&mut self, set: DescriptorSetHandle, binding: u32, resource: BoundResource) {
        self.writes.push(DescriptorWrite {
            set,
            binding,
            resource,
        });
    }

    /// Applies every pending write and returns how many were sent. An empty
    /// batch makes no device call.
    pub fn flush<C: GraphicsContext + ?Sized>(&self, ctx: &mut C) -> FrameResult<usize> {
        if self.writes.is_empty() {
            return Ok(0);
        }
        if let Some(w) = self.writes.iter().find(|w| w.set.is_null()) {
            return Err(FrameError::InvalidHandle(format!(
                "descriptor write to null set (binding {})",
                w.binding
            )));
        }
        ctx.write_descriptors(&self.writes)?;
        debug!("flushed {} descriptor write(s)", self.writes.len());
        Ok(self.writes.len())
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Flushes and drops the batch.
    pub fn apply<C: GraphicsContext + ?Sized>(self, ctx: &mut C) -> FrameResult<usize> {
        self.flush(ctx)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[DescriptorWrite] {
        &self.writes
    }
}

/// Collects pool sizes and builds a descriptor pool.
#[derive(Debug, Default)]
pub struct DescriptorPoolBuilder {
    sizes: Vec<(DescriptorKind, u32)>,
    max_sets: u32,
}

impl DescriptorPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds room for `count` descriptors of `kind`. Repeated kinds accumulate.
    pub fn add_pool_size(mut self, kind: DescriptorKind, count: u32) -> Self {
        match self.sizes.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, n)) => *n += count,
            None => self.sizes.push((kind, count)),
        }
        self
    }

    pub fn max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    pub fn build<C: GraphicsContext + ?Sized>(&self, ctx: &mut C) -> FrameResult<DescriptorPoolHandle> {
        if self.max_sets == 0 || self.sizes.is_empty() {
            return Err(FrameError::ResourceCreation(
                "descriptor pool needs at least one set and one pool size".into(),
            ));
        }
        let pool = ctx.create_descriptor_pool(&self.sizes, self.max_sets)?;
        debug!(
            "descriptor pool created (max_sets={}, sizes={:?})",
            self.max_sets, self.sizes
        );
        Ok(pool)
    }
}
