//! Frame renderer: turns a frame number into a pixel buffer.
//!
//! `render(frame)` is a pure function of the frame number and the immutable
//! timelines it was built from: no caches, no interior mutability. That is
//! what lets export workers render disjoint frame ranges independently and
//! still produce exactly the bytes a single pass would.
//!
//! Tracks are stacked vertically, each in an equal horizontal slice of the
//! frame. Within a slice the keyboard sits at the bottom and the falling
//! blocks use the space above it.

mod blocks;
mod canvas;
mod constants;
mod keys;
mod layout;

pub use canvas::RenderFrame;
pub use layout::{is_black_key, white_key_height, KeyboardLayout};

pub(crate) use blocks::block_span;

use crate::config::{ColorMode, TrackStyle, VideoConfig};
use crate::error::{Error, Result};
use crate::model::{Rect, Rgb};
use crate::timeline::{KeySet, Timeline};
use constants::{RAINBOW_SATURATION, RAINBOW_VALUE};

// ═══════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════

/// Renders frames of a composition. Cheap to share across threads.
#[derive(Debug)]
pub struct FrameRenderer<'a> {
    width: u32,
    height: u32,
    fps: u32,
    background: Rgb,
    panels: Vec<TrackPanel<'a>>,
}

/// Precomputed geometry of one track slice.
#[derive(Debug)]
struct TrackPanel<'a> {
    timeline: &'a Timeline,
    keyboard: KeyboardLayout,
    block_area: Rect,
}

impl<'a> FrameRenderer<'a> {
    pub fn new(video: &VideoConfig, timelines: &'a [Timeline]) -> Result<Self> {
        video.validate()?;
        if timelines.is_empty() {
            return Err(Error::RenderFault("nothing to render: no tracks".into()));
        }
        for t in timelines {
            t.style().validate()?;
        }

        let width = video.width as f64;
        let height = video.height as f64;
        let slice = height / timelines.len() as f64;
        let panels = timelines
            .iter()
            .enumerate()
            .map(|(i, timeline)| {
                let panel = Rect::new(0.0, slice * i as f64, width, slice);
                let keyboard = KeyboardLayout::new(panel, timelines.len(), height);
                let block_area = Rect::new(panel.x, panel.y, panel.width, keyboard.top - panel.y);
                TrackPanel {
                    timeline,
                    keyboard,
                    block_area,
                }
            })
            .collect();

        Ok(Self {
            width: video.width,
            height: video.height,
            fps: video.fps,
            background: video.background,
            panels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes in one rendered frame.
    pub fn frame_len(&self) -> usize {
        RenderFrame::byte_len(self.width, self.height)
    }

    /// Keys held on `frame`, per track. Frames outside every note range
    /// simply have no active keys.
    pub fn active_keys(&self, frame: i64) -> Vec<KeySet> {
        self.panels
            .iter()
            .map(|p| p.timeline.active_keys(frame))
            .collect()
    }

    /// Keyboard geometry of track `track`.
    pub fn keyboard(&self, track: usize) -> Option<&KeyboardLayout> {
        self.panels.get(track).map(|p| &p.keyboard)
    }

    /// Render `frame`. Never fails; out-of-range frames show idle keys.
    pub fn render(&self, frame: i64) -> RenderFrame {
        let mut out = RenderFrame::new(self.width, self.height, self.background);
        for panel in &self.panels {
            let style = panel.timeline.style();
            if style.blocks {
                blocks::render_blocks(
                    &mut out,
                    &panel.keyboard,
                    style,
                    panel.timeline.notes(),
                    frame,
                    self.fps,
                    panel.block_area,
                );
            }
            let active = panel.timeline.active_keys(frame);
            keys::render_keyboard(&mut out, &panel.keyboard, style, &active);
        }
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════

/// Color of a hit key or block: the fixed palette color, or in rainbow mode
/// a hue taken from the horizontal position `x` across `width`.
pub(crate) fn accent_color(style: &TrackStyle, x: f64, width: f64, fixed: Rgb) -> Rgb {
    match style.color_mode {
        ColorMode::Flat => fixed,
        ColorMode::Rainbow => rainbow(x, width),
    }
}

/// Hue ramp across the keyboard width.
pub fn rainbow(x: f64, width: f64) -> Rgb {
    let hue = if width > 0.0 { x / width } else { 0.0 };
    Rgb::from_hsv(hue.clamp(0.0, 1.0), RAINBOW_SATURATION, RAINBOW_VALUE)
}
