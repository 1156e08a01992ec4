//! Device-pixel ↔ grid-cell mapping under zoom and pan.
//!
//! Pan offsets are measured in grid cells: `pan_x == 10.0` means the left edge
//! of the canvas shows column 10. At any zoom the visible window
//! `[pan, pan + n/zoom)` stays inside `[0, n)` on both axes.

use std::ops::Range;

pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 40.0;
/// Multiplier applied per wheel notch or key press.
pub const ZOOM_STEP: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

impl ZoomDirection {
    /// Wheel convention: scrolling up (negative delta) zooms in.
    pub fn from_wheel_delta(delta_y: f64) -> Option<Self> {
        if delta_y < 0.0 {
            Some(ZoomDirection::In)
        } else if delta_y > 0.0 {
            Some(ZoomDirection::Out)
        } else {
            None
        }
    }
}

/// Half-open cell ranges a renderer has to paint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRange {
    pub x: Range<u32>,
    pub y: Range<u32>,
}

impl CellRange {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.x.contains(&x) && self.y.contains(&y)
    }

    pub fn cell_count(&self) -> usize {
        self.x.len() * self.y.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    zoom: f64,
    pan_x: f64,
    pan_y: f64,
    grid_size: usize,
    canvas_px: f64,
}

impl Viewport {
    /// `canvas_px` is the side of the square drawing surface in device pixels.
    pub fn new(grid_size: usize, canvas_px: f64) -> Self {
        let canvas_px = if canvas_px.is_finite() && canvas_px > 0.0 {
            canvas_px
        } else {
            grid_size as f64
        };
        Self {
            zoom: MIN_ZOOM,
            pan_x: 0.0,
            pan_y: 0.0,
            grid_size,
            canvas_px,
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn pan(&self) -> (f64, f64) {
        (self.pan_x, self.pan_y)
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn canvas_px(&self) -> f64 {
        self.canvas_px
    }

    /// Device pixels per cell at zoom 1.
    pub fn scale(&self) -> f64 {
        self.canvas_px / self.grid_size.max(1) as f64
    }

    /// Cell under a device point, or `None` when the point is off the grid.
    pub fn screen_to_grid(&self, dx: f64, dy: f64) -> Option<(u32, u32)> {
        let cell_px = self.scale() * self.zoom;
        let x = (dx / cell_px + self.pan_x).floor();
        let y = (dy / cell_px + self.pan_y).floor();
        let n = self.grid_size as f64;
        if !(0.0..n).contains(&x) || !(0.0..n).contains(&y) {
            return None;
        }
        Some((x as u32, y as u32))
    }

    /// Device position of the top-left corner of cell `(x, y)`.
    pub fn grid_to_screen(&self, x: f64, y: f64) -> (f64, f64) {
        let cell_px = self.scale() * self.zoom;
        ((x - self.pan_x) * cell_px, (y - self.pan_y) * cell_px)
    }

    /// Zooms one step while keeping the cell under `(dx, dy)` fixed on screen.
    pub fn zoom_at(&mut self, dx: f64, dy: f64, direction: ZoomDirection) {
        let old_zoom = self.zoom;
        let new_zoom = match direction {
            ZoomDirection::In => old_zoom * ZOOM_STEP,
            ZoomDirection::Out => old_zoom / ZOOM_STEP,
        }
        .clamp(MIN_ZOOM, MAX_ZOOM);

        let scale = self.scale();
        let (cx, cy) = (dx / scale, dy / scale);
        self.zoom = new_zoom;
        self.pan_x = self.clamp_pan(self.pan_x + cx / old_zoom - cx / new_zoom);
        self.pan_y = self.clamp_pan(self.pan_y + cy / old_zoom - cy / new_zoom);
    }

    /// Keyboard zoom, anchored at the canvas centre.
    pub fn zoom_by(&mut self, direction: ZoomDirection) {
        let centre = self.canvas_px / 2.0;
        self.zoom_at(centre, centre, direction);
    }

    /// Drag by a device-pixel delta. Dragging right moves the view left.
    pub fn pan_by(&mut self, ddx: f64, ddy: f64) {
        let scale = self.scale();
        self.pan_x = self.clamp_pan(self.pan_x - (ddx / scale) / self.zoom);
        self.pan_y = self.clamp_pan(self.pan_y - (ddy / scale) / self.zoom);
    }

    pub fn visible_cells(&self) -> CellRange {
        let n = self.grid_size as f64;
        let span = n / self.zoom;
        let range = |pan: f64| {
            let start = pan.floor().clamp(0.0, n) as u32;
            let end = (pan + span).ceil().clamp(0.0, n) as u32;
            start..end
        };
        CellRange {
            x: range(self.pan_x),
            y: range(self.pan_y),
        }
    }

    pub fn reset(&mut self) {
        self.zoom = MIN_ZOOM;
        self.pan_x = 0.0;
        self.pan_y = 0.0;
    }

    /// Adopts a new drawing-surface size. Non-positive sizes are ignored.
    pub fn resize(&mut self, canvas_px: f64) {
        if !(canvas_px.is_finite() && canvas_px > 0.0) {
            return;
        }
        self.canvas_px = canvas_px;
        self.pan_x = self.clamp_pan(self.pan_x);
        self.pan_y = self.clamp_pan(self.pan_y);
    }

    fn clamp_pan(&self, pan: f64) -> f64 {
        clamp_pan(pan, self.grid_size, self.zoom)
    }
}

/// Clamps a pan offset into `[0, n - n/zoom]`.
pub fn clamp_pan(pan: f64, grid_size: usize, zoom: f64) -> f64 {
    let n = grid_size as f64;
    let max = (n - n / zoom).max(0.0);
    if pan.is_nan() {
        return 0.0;
    }
    pan.clamp(0.0, max)
}
