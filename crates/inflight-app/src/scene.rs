// SPDX-License-Identifier: CEPL-1.0
//! The demo scene: one textured quad, its texture and a spinning camera.

use std::path::Path;

use anyhow::{anyhow, Result};
use glam::{Mat4, Vec3};
use inflight_render::{
    BoundResource, Buffer, BufferUsage, DescriptorBatch, DescriptorKind, DescriptorPoolBuilder,
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, DrawBatch, Extent2D,
    FrameResult, GraphicsContext, IndexBinding, IndexType, MemoryFlags, SamplerHandle, Texture,
    TextureData, TextureFormat,
};
use inflight_render_vk::{CameraUniforms, Vertex};
use tracing::{debug, info, warn};

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

const CHECKER_CELLS: u32 = 8;
/// Largest generated checkerboard edge; every Vulkan device supports it.
pub const MAX_CHECKER_SIZE: u32 = 4096;

pub fn quad_vertices() -> [Vertex; 4] {
    let normal = [0.0, 0.0, 1.0];
    [
        Vertex {
            pos: [-0.5, -0.5, 0.0],
            color: [1.0, 0.3, 0.3],
            normal,
            uv: [0.0, 0.0],
        },
        Vertex {
            pos: [0.5, -0.5, 0.0],
            color: [0.3, 1.0, 0.3],
            normal,
            uv: [1.0, 0.0],
        },
        Vertex {
            pos: [0.5, 0.5, 0.0],
            color: [0.3, 0.3, 1.0],
            normal,
            uv: [1.0, 1.0],
        },
        Vertex {
            pos: [-0.5, 0.5, 0.0],
            color: [1.0, 1.0, 1.0],
            normal,
            uv: [0.0, 1.0],
        },
    ]
}

/// Requested checkerboard edge, clamped to `1..=MAX_CHECKER_SIZE`.
pub fn checker_size(requested: u32) -> u32 {
    requested.clamp(1, MAX_CHECKER_SIZE)
}

/// `size`×`size` RGBA8 checkerboard with `cells` squares per edge.
pub fn checkerboard(size: u32, cells: u32) -> TextureData {
    let size = checker_size(size);
    let cell = (size / cells.max(1)).max(1);
    let edge = size as usize;
    let mut pixels = Vec::with_capacity(edge * edge * 4);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let v = if light { 235 } else { 40 };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    TextureData {
        pixels,
        extent: Extent2D::new(size, size),
        format: TextureFormat::Rgba8Srgb,
    }
}

/// Decodes an image file into sRGB RGBA8 texels.
pub fn load_texture(path: &Path) -> Result<TextureData> {
    let img = image::open(path)
        .map_err(|e| anyhow!("failed to open texture image '{}': {}", path.display(), e))?
        .into_rgba8();
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("texture image '{}' is empty", path.display()));
    }
    Ok(TextureData {
        pixels: img.into_raw(),
        extent: Extent2D::new(width, height),
        format: TextureFormat::Rgba8Srgb,
    })
}

/// The image at `path` if there is one and it decodes, else a checkerboard
/// of `fallback_size`.
pub fn texture_data(path: Option<&Path>, fallback_size: u32) -> TextureData {
    if let Some(path) = path {
        match load_texture(path) {
            Ok(data) => {
                info!("texture loaded from {}", path.display());
                return data;
            }
            Err(e) => warn!("{e:#}; using a checkerboard"),
        }
    }
    checkerboard(fallback_size, CHECKER_CELLS)
}

/// Camera block for time `t` (seconds). Clip space Y points down, so the
/// projection is flipped.
pub fn camera_uniforms(t: f32, spin_speed: f32, extent: Extent2D) -> CameraUniforms {
    let aspect = if extent.is_empty() {
        1.0
    } else {
        extent.width as f32 / extent.height as f32
    };
    let model = Mat4::from_rotation_y(t * spin_speed);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y) * model;
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    proj.y_axis.y *= -1.0;
    CameraUniforms {
        view: view.to_cols_array_2d(),
        proj: proj.to_cols_array_2d(),
    }
}

/// GPU side of the scene. Everything here outlives swapchain rebuilds.
pub struct Scene {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    texture: Texture,
    sampler: SamplerHandle,
    pool: DescriptorPoolHandle,
    texture_set: DescriptorSetHandle,
}

impl Scene {
    pub fn upload<C: GraphicsContext + ?Sized>(
        ctx: &mut C,
        texture_layout: DescriptorSetLayoutHandle,
        image: &TextureData,
        anisotropy: Option<f32>,
    ) -> FrameResult<Self> {
        let vertices = quad_vertices();
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex_buffer = ctx.create_buffer(
            vertex_bytes.len() as u64,
            BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
            MemoryFlags::DEVICE_LOCAL,
        )?;
        ctx.update_buffer(&vertex_buffer, vertex_bytes)?;

        let index_bytes: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);
        let index_buffer = ctx.create_buffer(
            index_bytes.len() as u64,
            BufferUsage::INDEX | BufferUsage::TRANSFER_DST,
            MemoryFlags::DEVICE_LOCAL,
        )?;
        ctx.update_buffer(&index_buffer, index_bytes)?;

        let texture = ctx.create_texture(image)?;
        let sampler = ctx.create_texture_sampler(anisotropy)?;

        let pool = DescriptorPoolBuilder::new()
            .add_pool_size(DescriptorKind::CombinedImageSampler, 1)
            .max_sets(1)
            .build(ctx)?;
        let texture_set = ctx.allocate_descriptor_set(pool, texture_layout)?;
        DescriptorBatch::new()
            .bind(texture_set, 0, BoundResource::sampled(&texture, sampler))
            .apply(ctx)?;

        info!(
            "scene uploaded: {} vertices, {} indices, {}x{} texture",
            vertices.len(),
            QUAD_INDICES.len(),
            texture.extent.width,
            texture.extent.height
        );
        Ok(Self {
            vertex_buffer,
            index_buffer,
            texture,
            sampler,
            pool,
            texture_set,
        })
    }

    pub fn batch(&self) -> DrawBatch {
        DrawBatch::indexed(
            self.vertex_buffer.handle,
            quad_vertices().len() as u32,
            IndexBinding {
                buffer: self.index_buffer.handle,
                index_type: IndexType::U16,
                count: QUAD_INDICES.len() as u32,
            },
        )
    }

    /// Sets bound after the per-frame set.
    pub fn static_sets(&self) -> [DescriptorSetHandle; 1] {
        [self.texture_set]
    }

    /// Texture, sampler and pool go before the geometry.
    pub fn destroy<C: GraphicsContext + ?Sized>(self, ctx: &mut C) {
        ctx.destroy_texture(self.texture);
        ctx.destroy_sampler(self.sampler);
        ctx.destroy_descriptor_pool(self.pool);
        ctx.destroy_buffer(self.index_buffer);
        ctx.destroy_buffer(self.vertex_buffer);
        debug!("scene destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn quad_indices_cover_two_triangles() {
        let verts = quad_vertices();
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < verts.len()));
        assert_eq!(bytemuck::cast_slice::<u16, u8>(&QUAD_INDICES).len(), 12);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&verts).len(), 4 * 44);
    }

    #[test]
    fn checkerboard_alternates() {
        let tex = checkerboard(16, 4);
        assert_eq!(tex.pixels.len(), tex.expected_len());
        let px = |x: usize, y: usize| tex.pixels[(y * 16 + x) * 4];
        assert_eq!(px(0, 0), 235);
        assert_eq!(px(4, 0), 40);
        assert_eq!(px(4, 4), 235);
        assert_eq!(px(3, 3), 235);
        assert_eq!(tex.pixels[3], 255);
    }

    #[test]
    fn checkerboard_tolerates_tiny_sizes() {
        let tex = checkerboard(0, 0);
        assert_eq!(tex.extent, Extent2D::new(1, 1));
        assert_eq!(tex.pixels.len(), 4);
    }

    #[test]
    fn checker_size_is_clamped() {
        assert_eq!(checker_size(0), 1);
        assert_eq!(checker_size(256), 256);
        assert_eq!(checker_size(40_000), MAX_CHECKER_SIZE);
        assert_eq!(checker_size(u32::MAX), MAX_CHECKER_SIZE);
    }

    #[test]
    fn image_files_decode_to_rgba8() {
        let path =
            std::env::temp_dir().join(format!("inflight-texture-{}.png", std::process::id()));
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let tex = load_texture(&path).unwrap();
        assert_eq!(tex.extent, Extent2D::new(3, 2));
        assert_eq!(tex.format, TextureFormat::Rgba8Srgb);
        assert_eq!(tex.pixels.len(), tex.expected_len());
        assert_eq!(&tex.pixels[..4], &[10, 20, 30, 255]);

        assert_eq!(texture_data(Some(path.as_path()), 16), tex);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unreadable_texture_falls_back_to_the_checkerboard() {
        let missing = Path::new("/definitely/not/here/texture.png");
        assert!(load_texture(missing).is_err());
        assert_eq!(texture_data(Some(missing), 16), checkerboard(16, CHECKER_CELLS));
        assert_eq!(texture_data(None, 16), checkerboard(16, CHECKER_CELLS));
    }

    #[test]
    fn projection_corrects_aspect_and_flips_y() {
        let wide = camera_uniforms(0.0, 1.0, Extent2D::new(1600, 800));
        let square = camera_uniforms(0.0, 1.0, Extent2D::new(800, 800));
        let wide_proj = Mat4::from_cols_array_2d(&wide.proj);
        let square_proj = Mat4::from_cols_array_2d(&square.proj);
        assert!((square_proj.x_axis.x / wide_proj.x_axis.x - 2.0).abs() < 1e-5);
        assert!(wide_proj.y_axis.y < 0.0);

        let empty = camera_uniforms(0.0, 1.0, Extent2D::new(0, 0));
        assert_eq!(empty.proj, square.proj);
    }

    #[test]
    fn view_spins_over_time() {
        let at_rest = camera_uniforms(0.0, 1.0, Extent2D::new(800, 600));
        let quarter = camera_uniforms(std::f32::consts::FRAC_PI_2, 1.0, Extent2D::new(800, 600));
        assert_ne!(at_rest.view, quarter.view);

        // A quarter turn about Y maps +X onto -Z before the camera offset.
        let view = Mat4::from_cols_array_2d(&quarter.view);
        let p = view * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!((p.x).abs() < 1e-5);
        assert!((p.z - (-3.0)).abs() < 1e-5);

        let still = camera_uniforms(10.0, 0.0, Extent2D::new(800, 600));
        assert_eq!(still.view, at_rest.view);
    }
}
