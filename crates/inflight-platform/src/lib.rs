// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use anyhow::{Context, Result};
use tracing::info;
use winit::dpi::LogicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// Creates the application window with the requested inner size.
pub fn create_window(
    event_loop: &ActiveEventLoop,
    title: &str,
    width: u32,
    height: u32,
) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width.max(1), height.max(1)));
    let window = event_loop.create_window(attrs).context("create_window")?;
    let size = window.inner_size();
    info!("window '{}' created ({}x{})", title, size.width, size.height);
    Ok(window)
}
