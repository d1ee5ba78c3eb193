//! Strongly typed configuration surface.
//!
//! All structs deserialize from JSON with defaults for every field, so a
//! project file only has to name what it changes. `validate` turns bad
//! values into [`Error::RenderFault`] before any work starts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Rgb;

/// Output video parameters shared by every track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames of padding before the first note.
    pub start_offset: u32,
    /// Frames of padding after the last note.
    pub end_offset: u32,
    pub background: Rgb,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            start_offset: 0,
            end_offset: 0,
            background: Rgb::BLACK,
        }
    }
}

impl VideoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::RenderFault(format!(
                "resolution must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(Error::RenderFault("fps must be positive".into()));
        }
        Ok(())
    }

    /// Milliseconds covered by `frames` frames.
    pub fn frames_to_ms(&self, frames: i64) -> f64 {
        frames as f64 / self.fps as f64 * 1000.0
    }
}

/// How hit keys and falling blocks are colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Fixed colors from the palette.
    Flat,
    /// Hue derived from the horizontal position on the keyboard.
    #[default]
    Rainbow,
}

/// Key and block colors of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub white: Rgb,
    pub white_hit: Rgb,
    pub black: Rgb,
    pub black_hit: Rgb,
    pub block: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            white: Rgb::WHITE,
            white_hit: Rgb::RED,
            black: Rgb::BLACK,
            black_hit: Rgb::RED,
            block: Rgb::WHITE,
        }
    }
}

/// Per-track visualization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackStyle {
    /// Draw falling note blocks above the keyboard.
    pub blocks: bool,
    pub color_mode: ColorMode,
    pub palette: Palette,
    /// Block fall speed in pixels per second.
    pub block_speed: f64,
    /// Corner radius of note blocks in pixels.
    pub block_rounding: f64,
}

impl Default for TrackStyle {
    fn default() -> Self {
        Self {
            blocks: true,
            color_mode: ColorMode::Rainbow,
            palette: Palette::default(),
            block_speed: 200.0,
            block_rounding: 5.0,
        }
    }
}

impl TrackStyle {
    pub fn validate(&self) -> Result<()> {
        if !(self.block_speed > 0.0) {
            return Err(Error::RenderFault(format!(
                "block speed must be positive, got {}",
                self.block_speed
            )));
        }
        if self.block_rounding < 0.0 {
            return Err(Error::RenderFault("block rounding must not be negative".into()));
        }
        Ok(())
    }
}

/// Knobs of a single export run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Number of parallel render workers. 1 renders in a single pass.
    pub workers: usize,
    /// Render only this leading fraction of the note range (previews).
    pub preview_fraction: f64,
    /// Parent directory for transient export files. System temp dir if unset.
    pub work_dir: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            preview_fraction: 1.0,
            work_dir: None,
        }
    }
}

impl ExportOptions {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::RenderFault("worker count must be at least 1".into()));
        }
        if !(self.preview_fraction > 0.0 && self.preview_fraction <= 1.0) {
            return Err(Error::RenderFault(format!(
                "preview fraction must be in (0, 1], got {}",
                self.preview_fraction
            )));
        }
        Ok(())
    }
}

/// One track of a project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub style: TrackStyle,
}

/// A whole export described as a JSON document.
///
/// ```json
/// {
///   "video": { "width": 1280, "height": 720, "start_offset": 30 },
///   "tracks": [ { "sources": ["song.mid"], "style": { "color_mode": "flat" } } ],
///   "audio": ["default"],
///   "export": { "workers": 8 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub video: VideoConfig,
    pub tracks: Vec<TrackConfig>,
    /// `"default"` synthesizes from the tracks, anything else is an audio file.
    #[serde(default = "default_audio")]
    pub audio: Vec<String>,
    #[serde(default)]
    pub export: ExportOptions,
}

fn default_audio() -> Vec<String> {
    vec![crate::audio::DEFAULT_AUDIO.to_string()]
}

impl ProjectConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ProjectConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a project file. Relative source paths resolve against the
    /// file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&json)?;
        if let Some(dir) = path.parent() {
            for track in &mut config.tracks {
                for source in &mut track.sources {
                    if source.is_relative() {
                        *source = dir.join(&*source);
                    }
                }
            }
            for audio in &mut config.audio {
                if audio != crate::audio::DEFAULT_AUDIO && Path::new(audio.as_str()).is_relative() {
                    *audio = dir.join(audio.as_str()).to_string_lossy().into_owned();
                }
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        self.export.validate()?;
        if self.tracks.is_empty() {
            return Err(Error::RenderFault("project has no tracks".into()));
        }
        for track in &self.tracks {
            track.style.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn project_defaults_fill_missing_fields() {
        let config = ProjectConfig::from_json(
            r#"{ "tracks": [ { "sources": ["a.mid"], "style": { "color_mode": "flat", "palette": { "white_hit": [0, 128, 255] } } } ] }"#,
        )
        .unwrap();
        assert_eq!(config.video, VideoConfig::default());
        assert_eq!(config.audio, vec!["default".to_string()]);
        assert_eq!(config.export.workers, 4);
        let style = &config.tracks[0].style;
        assert_eq!(style.color_mode, ColorMode::Flat);
        assert_eq!(style.palette.white_hit, Rgb(0, 128, 255));
        assert_eq!(style.palette.black, Rgb::BLACK);
        assert!(style.blocks);
    }

    #[test]
    fn zero_tracks_is_a_render_fault() {
        let err = ProjectConfig::from_json(r#"{ "tracks": [] }"#).unwrap_err();
        assert!(matches!(err, Error::RenderFault(_)));
    }

    #[test]
    fn zero_resolution_is_a_render_fault() {
        let err = ProjectConfig::from_json(
            r#"{ "video": { "width": 0 }, "tracks": [ { "sources": [] } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::RenderFault(_)));
    }

    #[test]
    fn preview_fraction_bounds() {
        let mut opts = ExportOptions::default();
        opts.preview_fraction = 0.0;
        assert!(opts.validate().is_err());
        opts.preview_fraction = 0.25;
        assert!(opts.validate().is_ok());
        opts.preview_fraction = 1.5;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ProjectConfig::from_json("{ tracks: ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
