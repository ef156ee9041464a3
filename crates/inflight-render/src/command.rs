// SPDX-License-Identifier: CEPL-1.0
//! Command recording.
//!
//! [`CommandRecorder`] turns the frame's pipeline, render targets,
//! descriptor sets and geometry into a [`CommandList`], then hands it to the
//! context, which resets the command buffer, begins it, replays the list and
//! ends it. Recording is a pure function of its inputs, so identical inputs
//! always produce identical lists.

use tracing::debug;

use crate::context::GraphicsContext;
use crate::error::{FrameError, FrameResult};
use crate::handle::{
    BufferHandle, CommandBufferHandle, DescriptorSetHandle, Extent2D, FramebufferHandle,
    PipelineHandle, PipelineLayoutHandle, RenderPassHandle,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-extent viewport with the standard 0..1 depth range.
    pub fn covering(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub extent: Extent2D,
}

impl ScissorRect {
    pub fn covering(extent: Extent2D) -> Self {
        Self { x: 0, y: 0, extent }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

/// One recorded GPU command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2D,
        clear_color: [f32; 4],
        clear_depth: Option<f32>,
    },
    BindPipeline(PipelineHandle),
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindDescriptorSets {
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    BindVertexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    EndRenderPass,
}

/// The body of a command buffer, between begin and end.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of draw commands in the list.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. } | Command::DrawIndexed { .. }))
            .count()
    }

    fn push(&mut self, command: Command) {
        self.commands.push(command);
    }
}

/// A graphics pipeline and the layout its descriptor sets are bound through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineBinding {
    pub pipeline: PipelineHandle,
    pub layout: PipelineLayoutHandle,
}

/// Render pass, one framebuffer per swapchain image, and the shared extent.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderTargets {
    pub render_pass: RenderPassHandle,
    pub framebuffers: Vec<FramebufferHandle>,
    pub extent: Extent2D,
    pub clear_color: [f32; 4],
    /// `Some` when the render pass carries a depth attachment.
    pub clear_depth: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBinding {
    pub buffer: BufferHandle,
    pub index_type: IndexType,
    pub count: u32,
}

/// One draw worth of geometry: a vertex buffer and optional indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawBatch {
    pub vertex_buffer: BufferHandle,
    pub vertex_count: u32,
    pub indices: Option<IndexBinding>,
    pub instance_count: u32,
}

impl DrawBatch {
    pub fn indexed(vertex_buffer: BufferHandle, vertex_count: u32, indices: IndexBinding) -> Self {
        Self {
            vertex_buffer,
            vertex_count,
            indices: Some(indices),
            instance_count: 1,
        }
    }

    pub fn non_indexed(vertex_buffer: BufferHandle, vertex_count: u32) -> Self {
        Self {
            vertex_buffer,
            vertex_count,
            indices: None,
            instance_count: 1,
        }
    }
}

/// Everything a single recording needs besides the command buffer itself.
#[derive(Clone, Copy, Debug)]
pub struct RecordInputs<'a> {
    pub image_index: u32,
    pub pipeline: &'a PipelineBinding,
    pub targets: &'a RenderTargets,
    /// Bound in order starting at set 0; the per-frame set comes first.
    pub descriptor_sets: &'a [DescriptorSetHandle],
    pub batches: &'a [DrawBatch],
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRecorder;

impl CommandRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Builds the command list for `inputs` without touching the device.
    pub fn build(&self, inputs: &RecordInputs<'_>) -> FrameResult<CommandList> {
        let RecordInputs {
            image_index,
            pipeline,
            targets,
            descriptor_sets,
            batches,
        } = *inputs;

        if pipeline.pipeline.is_null() {
            return Err(invalid("pipeline is null at record time"));
        }
        if pipeline.layout.is_null() {
            return Err(invalid("pipeline layout is null at record time"));
        }
        if targets.render_pass.is_null() {
            return Err(invalid("render pass is null at record time"));
        }
        let framebuffer = targets
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                invalid(format!(
                    "no framebuffer for swapchain image {image_index} ({} available)",
                    targets.framebuffers.len()
                ))
            })?;
        if framebuffer.is_null() {
            return Err(invalid(format!("framebuffer[{image_index}] is null")));
        }
        if let Some(i) = descriptor_sets.iter().position(|s| s.is_null()) {
            return Err(invalid(format!("descriptor set {i} is null")));
        }

        let mut list = CommandList::default();
        list.push(Command::BeginRenderPass {
            render_pass: targets.render_pass,
            framebuffer,
            extent: targets.extent,
            clear_color: targets.clear_color,
            clear_depth: targets.clear_depth,
        });
        list.push(Command::BindPipeline(pipeline.pipeline));
        list.push(Command::SetViewport(Viewport::covering(targets.extent)));
        list.push(Command::SetScissor(ScissorRect::covering(targets.extent)));
        if !descriptor_sets.is_empty() {
            list.push(Command::BindDescriptorSets {
                layout: pipeline.layout,
                first_set: 0,
                sets: descriptor_sets.to_vec(),
            });
        }

        for (i, batch) in batches.iter().enumerate() {
            if batch.vertex_buffer.is_null() {
                return Err(invalid(format!("vertex buffer of batch {i} is null")));
            }
            list.push(Command::BindVertexBuffer {
                buffer: batch.vertex_buffer,
                offset: 0,
            });
            match batch.indices {
                Some(indices) => {
                    if indices.buffer.is_null() {
                        return Err(invalid(format!("index buffer of batch {i} is null")));
                    }
                    list.push(Command::BindIndexBuffer {
                        buffer: indices.buffer,
                        offset: 0,
                        index_type: indices.index_type,
                    });
                    list.push(Command::DrawIndexed {
                        index_count: indices.count,
                        instance_count: batch.instance_count,
                        first_index: 0,
                        vertex_offset: 0,
                        first_instance: 0,
                    });
                }
                None => list.push(Command::Draw {
                    vertex_count: batch.vertex_count,
                    instance_count: batch.instance_count,
                    first_vertex: 0,
                    first_instance: 0,
                }),
            }
        }

        list.push(Command::EndRenderPass);
        Ok(list)
    }

    /// Re-records `command_buffer` for `inputs`, replacing its previous contents.
    pub fn record<C: GraphicsContext + ?Sized>(
        &self,
        ctx: &mut C,
        command_buffer: CommandBufferHandle,
        inputs: &RecordInputs<'_>,
    ) -> FrameResult<CommandList> {
        let list = self.build(inputs)?;
        self.record_list(ctx, command_buffer, &list)?;
        Ok(list)
    }

    /// Writes an already built list into `command_buffer`.
    pub fn record_list<C: GraphicsContext + ?Sized>(
        &self,
        ctx: &mut C,
        command_buffer: CommandBufferHandle,
        list: &CommandList,
    ) -> FrameResult<()> {
        if command_buffer.is_null() {
            return Err(invalid("command buffer is null"));
        }
        ctx.record_commands(command_buffer, list)?;
        debug!(
            "recorded {} command(s), {} draw(s)",
            list.len(),
            list.draw_count()
        );
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> FrameError {
    FrameError::InvalidHandle(msg.into())
}
