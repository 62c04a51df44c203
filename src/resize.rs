//! Keeping every render target in step with the window.
//!
//! Three kinds of targets react differently to a window resize:
//!
//! | target            | new size                                       |
//! |-------------------|------------------------------------------------|
//! | model/light buffer| the window size                                |
//! | forward buffer    | `window * forward ratio`                       |
//! | filter stages     | `new_window * current_size / previous_window`  |
//!
//! Filter stages resize relative to their *current* size, so a stage that
//! was resized by hand keeps its ratio to the window.

use glam::UVec2;
use winit::event::WindowEvent;

use crate::error::Result;
use crate::filter_graph::FilterGraph;
use crate::forward_stage::ForwardStage;
use crate::geometry_stage::GeometryStage;
use crate::host::RenderHost;

/// `round(window * factor)` per axis, at least one pixel.
pub fn scaled_size(window: UVec2, factor: f32) -> UVec2 {
    let scale = |axis: u32| ((axis as f64 * factor as f64).round() as u32).max(1);
    UVec2::new(scale(window.x), scale(window.y))
}

/// `round(new_window * current / old_window)` per axis, at least one pixel.
pub fn proportional_size(new_window: UVec2, current: UVec2, old_window: UVec2) -> UVec2 {
    let scale = |new: u32, current: u32, old: u32| {
        if old == 0 {
            return new.max(1);
        }
        ((new as f64 * current as f64 / old as f64).round() as u32).max(1)
    };
    UVec2::new(
        scale(new_window.x, current.x, old_window.x),
        scale(new_window.y, current.y, old_window.y),
    )
}

/// Watches window size changes and resizes every pipeline target once per
/// actual change.
#[derive(Debug, Clone)]
pub struct WindowResizeResponder {
    last_window_size: UVec2,
}

impl WindowResizeResponder {
    pub fn new(window_size: UVec2) -> Self {
        Self {
            last_window_size: window_size,
        }
    }

    pub fn last_window_size(&self) -> UVec2 {
        self.last_window_size
    }

    /// Returns the new size if it differs from the last one seen.
    ///
    /// Zero-sized windows (minimised) are ignored.
    pub fn observe(&self, size: UVec2) -> Option<UVec2> {
        if size.x == 0 || size.y == 0 || size == self.last_window_size {
            None
        } else {
            Some(size)
        }
    }

    /// Extracts a size change from a `winit` window event.
    pub fn observe_event(&self, event: &WindowEvent) -> Option<UVec2> {
        match event {
            WindowEvent::Resized(size) => self.observe(UVec2::new(size.width, size.height)),
            _ => None,
        }
    }

    /// Resizes the G-buffer, the forward buffer and every filter stage.
    ///
    /// Returns `false` when the size did not change.
    pub fn apply<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        size: UVec2,
        geometry: &GeometryStage,
        forward: &ForwardStage,
        filters: &mut FilterGraph,
    ) -> Result<bool> {
        let Some(size) = self.observe(size) else {
            return Ok(false);
        };
        log::debug!(
            "Window resized {}x{} -> {}x{}",
            self.last_window_size.x,
            self.last_window_size.y,
            size.x,
            size.y
        );
        geometry.resize(host, size)?;
        forward.resize(host, size)?;
        filters.resize(host, size)?;
        self.last_window_size = size;
        Ok(true)
    }
}
