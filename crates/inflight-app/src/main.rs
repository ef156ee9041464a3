// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod scene;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::Parser;
use inflight_core::init_tracing;
use inflight_render::{
    FrameError, FrameInputs, FrameReport, FrameResult, FrameScheduler, GraphicsContext,
    PipelineBinding, RenderSize, RenderTargets, SchedulerConfig,
};
use inflight_render_vk::{CameraUniforms, VkContext, VkOptions};
use tracing::{debug, error, info, warn};

use inflight_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use crate::config::{load_cfg, AppCfg};
use crate::scene::Scene;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "inflight.toml")]
    config: PathBuf,
    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,
    /// Frames in flight, overrides the config file (0 = swapchain image count)
    #[arg(long)]
    frames_in_flight: Option<usize>,
}

/// Device, scheduler and scene. Dropping it tears down in order: scheduler,
/// scene, then the context.
struct Gpu {
    ctx: VkContext,
    scheduler: Option<FrameScheduler>,
    scene: Option<Scene>,
    pipeline: PipelineBinding,
    targets: RenderTargets,
    spin_speed: f32,
}

impl Gpu {
    fn new(window: &Window, size: RenderSize, cfg: &AppCfg) -> Result<Self> {
        let options = VkOptions {
            app_name: cfg.window.title.clone(),
            vsync: cfg.render.vsync,
            vsync_mode: cfg.render.vk_vsync_mode(),
            clear_color: cfg.render.clear_color,
        };
        let ctx = VkContext::new(window, window, size, options)?;
        let mut gpu = Gpu {
            pipeline: ctx.pipeline_binding(),
            targets: ctx.render_targets(),
            ctx,
            scheduler: None,
            scene: None,
            spin_speed: cfg.render.spin_speed,
        };

        let mut sched_cfg = SchedulerConfig::new(std::mem::size_of::<CameraUniforms>() as u64)
            .with_fence_wait(cfg.render.fence_wait());
        if let Some(n) = cfg.render.slot_count() {
            sched_cfg = sched_cfg.with_slot_count(n);
        }
        let frame_layout = gpu.ctx.frame_set_layout();
        gpu.scheduler = Some(FrameScheduler::new(&mut gpu.ctx, sched_cfg, frame_layout)?);

        let texture_layout = gpu.ctx.texture_set_layout();
        let texture = scene::texture_data(
            cfg.render.texture_path.as_deref(),
            cfg.render.texture_size,
        );
        gpu.scene = Some(Scene::upload(
            &mut gpu.ctx,
            texture_layout,
            &texture,
            cfg.render.anisotropy(),
        )?);
        Ok(gpu)
    }

    fn render_frame(&mut self, t: f32) -> FrameResult<FrameReport> {
        let (Some(scheduler), Some(scene)) = (self.scheduler.as_mut(), self.scene.as_ref()) else {
            return Err(FrameError::InvalidHandle("renderer not initialised".into()));
        };
        let uniforms = scene::camera_uniforms(t, self.spin_speed, self.targets.extent);
        let static_sets = scene.static_sets();
        let batches = [scene.batch()];
        scheduler.render_frame(
            &mut self.ctx,
            &FrameInputs {
                pipeline: &self.pipeline,
                targets: &self.targets,
                static_sets: &static_sets,
                batches: &batches,
                uniforms: bytemuck::bytes_of(&uniforms),
            },
        )
    }

    /// Rebuilds the swapchain for `size` and restarts the scheduler on it.
    fn rebuild(&mut self, size: RenderSize) -> Result<()> {
        self.ctx.wait_idle()?;
        self.ctx.recreate_swapchain(size)?;
        self.pipeline = self.ctx.pipeline_binding();
        self.targets = self.ctx.render_targets();
        let image_count = self.ctx.swapchain_image_count() as usize;
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.reset(&mut self.ctx, image_count)?;
        }
        Ok(())
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("wait idle before teardown failed: {}", e);
        }
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.destroy(&mut self.ctx);
        }
        if let Some(scene) = self.scene.take() {
            scene.destroy(&mut self.ctx);
        }
    }
}

/// A suboptimal swapchain still shows the frame; out-of-date does not.
fn reached_the_screen(result: &FrameResult<FrameReport>) -> bool {
    matches!(result, Ok(_) | Err(FrameError::SwapchainSuboptimal))
}

struct App {
    cfg: AppCfg,
    max_frames: Option<u64>,
    window: Option<Window>,
    gpu: Option<Gpu>,
    render_size: RenderSize,

    exiting: bool,
    failed: bool,
    paused: bool,
    presented: u64,
    frames: u32,
    started: Instant,
    last_fps_instant: Instant,
}

impl App {
    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.gpu = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: impl std::fmt::Display) {
        error!("fatal: {e}");
        self.failed = true;
        self.stop(event_loop);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let t = self.started.elapsed().as_secs_f32();
        let size = self.render_size;
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };

        let result = gpu.render_frame(t);
        if reached_the_screen(&result) {
            self.presented += 1;
            self.frames = self.frames.saturating_add(1);
        }

        match result {
            Ok(report) => {
                debug!(
                    "frame {} slot {} image {}{}",
                    report.frame,
                    report.slot,
                    report.image_index,
                    if report.waited_on_collision {
                        " (waited on image owner)"
                    } else {
                        ""
                    }
                );
            }
            Err(e) if e.is_recoverable() => {
                warn!("{e}; rebuilding swapchain");
                if let Err(e) = gpu.rebuild(size) {
                    self.fail(event_loop, format!("swapchain rebuild failed: {e:#}"));
                    return;
                }
            }
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        if self.max_frames.is_some_and(|n| self.presented >= n) {
            info!("{} frame(s) presented, exiting", self.presented);
            self.stop(event_loop);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match inflight_platform::create_window(
            event_loop,
            &self.cfg.window.title,
            self.cfg.window.width,
            self.cfg.window.height,
        ) {
            Ok(w) => w,
            Err(e) => return self.fail(event_loop, format!("{e:#}")),
        };

        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };
        self.paused = size.width == 0 || size.height == 0;

        match Gpu::new(&window, self.render_size, &self.cfg) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => return self.fail(event_loop, format!("vk init failed: {e:#}")),
        }
        info!("resumed → paused={}", self.paused);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.stop(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                let now_paused = new_size.width == 0 || new_size.height == 0;
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        new_size.width, new_size.height, self.paused
                    );
                }
                if self.paused {
                    return;
                }
                if let Some(gpu) = self.gpu.as_mut() {
                    if let Err(e) = gpu.rebuild(self.render_size) {
                        return self.fail(event_loop, format!("resize failed: {e:#}"));
                    }
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting && !self.paused {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            // zero-sized window → sleep until resized
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if let Some(n) = args.frames_in_flight {
        cfg.render.frames_in_flight = n;
    }
    info!(
        "frames in flight: {}",
        cfg.render
            .slot_count()
            .map_or_else(|| "swapchain image count".to_string(), |n| n.to_string())
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let now = Instant::now();
    let mut app = App {
        cfg,
        max_frames: args.frames,
        window: None,
        gpu: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        exiting: false,
        failed: false,
        paused: false,
        presented: 0,
        frames: 0,
        started: now,
        last_fps_instant: now,
    };

    event_loop.run_app(&mut app)?;
    if app.failed {
        return Err(anyhow!("rendering stopped after a fatal error"));
    }
    Ok(())
}
