// SPDX-License-Identifier: CEPL-1.0
//! `inflight.toml`. Every field has a default; a missing file is the
//! all-defaults config.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use inflight_render::FenceWaitPolicy;
use inflight_render_vk::VkVsyncMode;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WindowCfg {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_vsync")]
    pub vsync: bool,
    #[serde(default)]
    pub vsync_mode: VsyncMode,
    /// 0 = one slot per swapchain image
    #[serde(default)]
    pub frames_in_flight: usize,
    #[serde(default = "default_fence_timeout_ms")]
    pub fence_timeout_ms: u64,
    #[serde(default = "default_max_fence_timeouts")]
    pub max_fence_timeouts: u32,
    /// Requested sampler anisotropy, clamped to the device limit. 1 disables it.
    #[serde(default = "default_anisotropy")]
    pub anisotropy: f32,
    /// Image file for the quad. Unset means a generated checkerboard.
    #[serde(default)]
    pub texture_path: Option<PathBuf>,
    /// Edge length of the generated checkerboard, in texels.
    #[serde(default = "default_texture_size")]
    pub texture_size: u32,
    /// Quad rotation, radians per second.
    #[serde(default = "default_spin_speed")]
    pub spin_speed: f32,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: default_vsync(),
            vsync_mode: VsyncMode::default(),
            frames_in_flight: 0,
            fence_timeout_ms: default_fence_timeout_ms(),
            max_fence_timeouts: default_max_fence_timeouts(),
            anisotropy: default_anisotropy(),
            texture_path: None,
            texture_size: default_texture_size(),
            spin_speed: default_spin_speed(),
        }
    }
}

impl RenderCfg {
    pub fn slot_count(&self) -> Option<usize> {
        (self.frames_in_flight > 0).then_some(self.frames_in_flight)
    }

    pub fn fence_wait(&self) -> FenceWaitPolicy {
        FenceWaitPolicy {
            timeout: Duration::from_millis(self.fence_timeout_ms.max(1)),
            max_timeouts: self.max_fence_timeouts.max(1),
        }
    }

    pub fn vk_vsync_mode(&self) -> VkVsyncMode {
        match self.vsync_mode {
            VsyncMode::Fifo => VkVsyncMode::Fifo,
            VsyncMode::Mailbox => VkVsyncMode::Mailbox,
        }
    }

    /// `None` when anisotropic filtering is not wanted.
    pub fn anisotropy(&self) -> Option<f32> {
        (self.anisotropy > 1.0).then_some(self.anisotropy)
    }
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_title() -> String {
    "inflight".to_string()
}
fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_vsync() -> bool {
    true
}
fn default_fence_timeout_ms() -> u64 {
    1000
}
fn default_max_fence_timeouts() -> u32 {
    5
}
fn default_anisotropy() -> f32 {
    16.0
}
fn default_texture_size() -> u32 {
    256
}
fn default_spin_speed() -> f32 {
    0.8
}

pub fn parse_cfg(s: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(s)
}

/// Reads `path`. A missing file means defaults; a malformed one is reported
/// and defaults are used.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("{} is malformed, using defaults: {}", path.display(), e);
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("no {} found, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("cannot read {}, using defaults: {}", path.display(), e);
            AppCfg::default()
        }
    }
}
