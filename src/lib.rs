//! pianovis: turns MIDI files into piano-keyboard videos.
//!
//! Event sources are resolved into per-track frame timelines, every frame
//! is rendered as a pure function of its number, and the frame range is
//! rendered by parallel workers whose output is reassembled in order and
//! muxed with a matching audio track.
//!
//! # Example
//! ```no_run
//! use pianovis::{Composition, ExportJob, ExportOptions, TrackStyle, VideoConfig};
//!
//! let mut video = Composition::new(VideoConfig { start_offset: 30, end_offset: 30, ..VideoConfig::default() });
//! video.add_track(["song.mid"], TrackStyle::default());
//! video.register().unwrap();
//!
//! let report = ExportJob::new(&video, ExportOptions::default())
//!     .run("song.mp4".as_ref())
//!     .unwrap();
//! println!("{} frames", report.frames);
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod media;
pub mod model;
pub mod plan;
pub mod renderer;
pub mod scheduler;
pub mod tempo;
pub mod timeline;

use std::path::Path;

pub use audio::{AudioClip, AudioSource, AudioWindow};
pub use config::{
    ColorMode, ExportOptions, Palette, ProjectConfig, TrackConfig, TrackStyle, VideoConfig,
};
pub use error::{Error, Result, SourcePosition};
pub use events::{parse_bytes, parse_file, parse_files};
pub use export::{Composition, ExportJob, ExportReport};
pub use model::{NoteEvent, Rect, Rgb};
pub use plan::{plan_to_json, ExportPlan};
pub use renderer::{is_black_key, FrameRenderer, KeyboardLayout, RenderFrame};
pub use scheduler::{partition, CancelToken, ExportChunk, ExportProgress};
pub use timeline::{KeySet, Timeline};

/// Load a project file and build its registered composition.
pub fn load_project<P: AsRef<Path>>(path: P) -> Result<(Composition, ExportOptions)> {
    let config = ProjectConfig::load(path)?;
    let mut composition = Composition::from_project(&config);
    composition.register()?;
    Ok((composition, config.export))
}

/// Export a project file to `dest` using the system tools.
pub fn export_project_file<P: AsRef<Path>, Q: AsRef<Path>>(
    config_path: P,
    dest: Q,
) -> Result<ExportReport> {
    let (composition, options) = load_project(config_path)?;
    ExportJob::new(&composition, options).run(dest.as_ref())
}

/// Load a project file and return its export plan as JSON.
pub fn plan_project_file<P: AsRef<Path>>(config_path: P) -> Result<String> {
    let (composition, options) = load_project(config_path)?;
    let plan = ExportJob::new(&composition, options).plan()?;
    Ok(plan_to_json(&plan))
}

// ═══════════════════════════════════════════════════════════════════════
// C FFI for embedding hosts
// ═══════════════════════════════════════════════════════════════════════

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Status codes returned by [`pianovis_export_project`].
pub const PIANOVIS_OK: i32 = 0;
pub const PIANOVIS_ERR_ARGUMENT: i32 = 1;
pub const PIANOVIS_ERR_PARSE: i32 = 2;
pub const PIANOVIS_ERR_CONFIG: i32 = 3;
pub const PIANOVIS_ERR_RENDER: i32 = 4;
pub const PIANOVIS_ERR_AUDIO: i32 = 5;
pub const PIANOVIS_ERR_MUX: i32 = 6;
pub const PIANOVIS_ERR_CANCELLED: i32 = 7;
pub const PIANOVIS_ERR_IO: i32 = 8;

fn status_code(err: &Error) -> i32 {
    match err {
        Error::Parse { .. } => PIANOVIS_ERR_PARSE,
        Error::Config(_) => PIANOVIS_ERR_CONFIG,
        Error::RenderFault(_) | Error::WorkerFailure { .. } | Error::FrameSink(_) => {
            PIANOVIS_ERR_RENDER
        }
        Error::SynthesisUnavailable { .. } | Error::Audio(_) => PIANOVIS_ERR_AUDIO,
        Error::MuxFailure(_) => PIANOVIS_ERR_MUX,
        Error::Cancelled => PIANOVIS_ERR_CANCELLED,
        Error::Io(_) => PIANOVIS_ERR_IO,
    }
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Export the project described by a JSON file to `dest_path`.
/// Returns `PIANOVIS_OK` or one of the `PIANOVIS_ERR_*` codes.
///
/// # Safety
/// Both arguments must be valid null-terminated UTF-8 C strings.
#[no_mangle]
pub unsafe extern "C" fn pianovis_export_project(
    config_path: *const c_char,
    dest_path: *const c_char,
) -> i32 {
    let config = unsafe { c_str(config_path) };
    let dest = unsafe { c_str(dest_path) };
    let (Some(config), Some(dest)) = (config, dest) else {
        return PIANOVIS_ERR_ARGUMENT;
    };
    match export_project_file(config, dest) {
        Ok(_) => PIANOVIS_OK,
        Err(e) => {
            tracing::error!(error = %e, "export failed");
            status_code(&e)
        }
    }
}

/// Compute the export plan of a project file and return it as JSON.
/// The caller must free the returned string with `pianovis_free_string`.
/// Returns null on failure.
///
/// # Safety
/// `config_path` must be a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn pianovis_plan_project(config_path: *const c_char) -> *mut c_char {
    let Some(config) = (unsafe { c_str(config_path) }) else {
        return std::ptr::null_mut();
    };
    match plan_project_file(config) {
        Ok(json) => CString::new(json).unwrap_or_default().into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by pianovis functions.
///
/// # Safety
/// `ptr` must be a string previously returned by a pianovis function, or null.
#[no_mangle]
pub unsafe extern "C" fn pianovis_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
