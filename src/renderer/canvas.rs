//! RenderFrame, an rgb24 pixel buffer plus the few fill primitives the
//! keyboard and block painters need.
//!
//! Rectangles use fractional pixel coordinates; a pixel is covered when its
//! centre lies inside the shape. Everything is integer-exact after rounding,
//! so the same drawing calls always produce the same bytes.

use crate::model::{Rect, Rgb};

/// One rendered video frame, rows top to bottom, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RenderFrame {
    /// A frame filled with a solid color.
    pub fn new(width: u32, height: u32, fill: Rgb) -> Self {
        let mut data = vec![0u8; Self::byte_len(width, height)];
        for px in data.chunks_exact_mut(3) {
            px.copy_from_slice(&[fill.0, fill.1, fill.2]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Size in bytes of a frame with the given resolution.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some(Rgb(self.data[i], self.data[i + 1], self.data[i + 2]))
    }

    /// Pixel ranges `(x0..x1, y0..y1)` covered by `rect`, clipped to the frame.
    fn span(&self, rect: Rect) -> Option<(usize, usize, usize, usize)> {
        let clamp_x = |v: f64| v.round().clamp(0.0, self.width as f64) as usize;
        let clamp_y = |v: f64| v.round().clamp(0.0, self.height as f64) as usize;
        let (x0, x1) = (clamp_x(rect.x), clamp_x(rect.right()));
        let (y0, y1) = (clamp_y(rect.y), clamp_y(rect.bottom()));
        (x0 < x1 && y0 < y1).then_some((x0, x1, y0, y1))
    }

    fn put(&mut self, x: usize, y: usize, color: Rgb) {
        let i = (y * self.width as usize + x) * 3;
        self.data[i] = color.0;
        self.data[i + 1] = color.1;
        self.data[i + 2] = color.2;
    }

    fn fill_row(&mut self, y: usize, x0: usize, x1: usize, color: Rgb) {
        let row = y * self.width as usize * 3;
        for px in self.data[row + x0 * 3..row + x1 * 3].chunks_exact_mut(3) {
            px.copy_from_slice(&[color.0, color.1, color.2]);
        }
    }

    pub(crate) fn fill_rect(&mut self, rect: Rect, color: Rgb) {
        let Some((x0, x1, y0, y1)) = self.span(rect) else {
            return;
        };
        for y in y0..y1 {
            self.fill_row(y, x0, x1, color);
        }
    }

    /// Fill with a top-to-bottom linear blend.
    pub(crate) fn fill_vertical_gradient(&mut self, rect: Rect, top: Rgb, bottom: Rgb) {
        let Some((x0, x1, y0, y1)) = self.span(rect) else {
            return;
        };
        for y in y0..y1 {
            let t = (y as f64 + 0.5 - rect.y) / rect.height;
            self.fill_row(y, x0, x1, top.lerp(bottom, t));
        }
    }

    /// Fill a rounded rectangle, painting only pixels inside `clip`.
    pub(crate) fn fill_rounded_rect(&mut self, rect: Rect, radius: f64, color: Rgb, clip: Rect) {
        let visible = Rect::new(
            rect.x.max(clip.x),
            rect.y.max(clip.y),
            rect.right().min(clip.right()) - rect.x.max(clip.x),
            rect.bottom().min(clip.bottom()) - rect.y.max(clip.y),
        );
        if visible.width <= 0.0 || visible.height <= 0.0 {
            return;
        }
        let Some((x0, x1, y0, y1)) = self.span(visible) else {
            return;
        };
        for y in y0..y1 {
            let ly = y as f64 + 0.5 - rect.y;
            for x in x0..x1 {
                let lx = x as f64 + 0.5 - rect.x;
                if inside_rounded_rect(lx, ly, rect.width, rect.height, radius) {
                    self.put(x, y, color);
                }
            }
        }
    }
}

/// Is the local point `(lx, ly)` inside a `w` x `h` rectangle with corner
/// radius `r`?
fn inside_rounded_rect(lx: f64, ly: f64, w: f64, h: f64, r: f64) -> bool {
    if lx < 0.0 || ly < 0.0 || lx > w || ly > h {
        return false;
    }
    let r = r.min(w / 2.0).min(h / 2.0).max(0.0);
    let cx = if lx < r {
        r
    } else if lx > w - r {
        w - r
    } else {
        return true;
    };
    let cy = if ly < r {
        r
    } else if ly > h - r {
        h - r
    } else {
        return true;
    };
    (lx - cx).powi(2) + (ly - cy).powi(2) <= r * r
}
