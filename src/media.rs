//! External collaborators of an export: note synthesis, video encoding,
//! audio transcoding and the final audio/video mux.
//!
//! Each one is a small trait so hosts (and tests) can swap the system tools
//! for their own. [`MediaServices::default`] wires up `timidity` and
//! `ffmpeg` from `PATH`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tracing::debug;

use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════════════════

/// Receives rendered frames, in order, and turns them into a video stream.
pub trait FrameSink {
    /// Append one rgb24 frame.
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;
    /// Flush and close the stream. Must be called for the output to be valid.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens frame sinks, and joins the streams they wrote.
pub trait VideoEncoder: Send + Sync {
    /// Extension of the files this encoder writes, without the dot.
    fn extension(&self) -> &str;
    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn FrameSink>>;
    /// Join streams written by this encoder, in order, into one stream at `out`.
    fn concat(&self, parts: &[PathBuf], out: &Path) -> Result<()>;
}

/// Renders an event-source file to a WAV file.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, source: &Path, wav_out: &Path) -> Result<()>;
}

/// Converts an arbitrary audio file to WAV.
pub trait Transcoder: Send + Sync {
    fn to_wav(&self, input: &Path, wav_out: &Path) -> Result<()>;
}

/// Combines one video stream and one audio stream into a container,
/// copying the video and re-encoding the audio.
pub trait Muxer: Send + Sync {
    fn mux(&self, video: &Path, audio: &Path, out: &Path) -> Result<()>;
}

/// The full set of external services an export talks to.
pub struct MediaServices {
    pub synthesizer: Box<dyn Synthesizer>,
    pub encoder: Box<dyn VideoEncoder>,
    pub transcoder: Box<dyn Transcoder>,
    pub muxer: Box<dyn Muxer>,
}

impl Default for MediaServices {
    fn default() -> Self {
        Self {
            synthesizer: Box::new(Timidity::default()),
            encoder: Box::new(Ffmpeg::default()),
            transcoder: Box::new(Ffmpeg::default()),
            muxer: Box::new(Ffmpeg::default()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// System tools
// ═══════════════════════════════════════════════════════════════════════

/// `timidity` as a synthesizer.
#[derive(Debug, Clone)]
pub struct Timidity {
    pub binary: PathBuf,
}

impl Default for Timidity {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("timidity"),
        }
    }
}

impl Synthesizer for Timidity {
    fn synthesize(&self, source: &Path, wav_out: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(source).arg("-Ow").arg("-o").arg(wav_out);
        run_tool(&mut cmd, &self.binary)
            .map_err(|reason| Error::SynthesisUnavailable {
                path: source.to_path_buf(),
                reason,
            })
    }
}

/// `ffmpeg` as encoder, transcoder and muxer.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    pub binary: PathBuf,
    /// Video codec for encoded frame streams.
    pub video_codec: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            video_codec: "libx264".into(),
        }
    }
}

impl Ffmpeg {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
        cmd
    }
}

impl VideoEncoder for Ffmpeg {
    fn extension(&self) -> &str {
        "mp4"
    }

    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn FrameSink>> {
        let mut cmd = self.command();
        cmd.args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(fps.to_string())
            .args(["-i", "-", "-c:v"])
            .arg(&self.video_codec)
            .args(["-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        debug!(?cmd, "starting video encoder");
        let mut child = cmd.spawn().map_err(|e| {
            Error::FrameSink(format!("failed to start {}: {e}", self.binary.display()))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::FrameSink("encoder stdin unavailable".into()))?;
        Ok(Box::new(PipeSink { child, stdin }))
    }

    /// Stream-copies the parts through the concat demuxer.
    fn concat(&self, parts: &[PathBuf], out: &Path) -> Result<()> {
        let list = out.with_extension("concat.txt");
        let mut entries = String::new();
        for part in parts {
            let quoted = part.display().to_string().replace('\'', "'\\''");
            entries.push_str(&format!("file '{quoted}'\n"));
        }
        fs::write(&list, entries)
            .map_err(|e| Error::FrameSink(format!("{}: {e}", list.display())))?;

        let mut cmd = self.command();
        cmd.args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list)
            .args(["-c", "copy"])
            .arg(out);
        let joined = run_tool(&mut cmd, &self.binary).map_err(Error::FrameSink);
        let _ = fs::remove_file(&list);
        joined
    }
}

impl Transcoder for Ffmpeg {
    fn to_wav(&self, input: &Path, wav_out: &Path) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("-i").arg(input).arg(wav_out);
        run_tool(&mut cmd, &self.binary).map_err(|reason| {
            Error::Audio(format!("cannot transcode {}: {reason}", input.display()))
        })
    }
}

impl Muxer for Ffmpeg {
    fn mux(&self, video: &Path, audio: &Path, out: &Path) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac"])
            .arg(out);
        run_tool(&mut cmd, &self.binary).map_err(Error::MuxFailure)
    }
}

/// Frames piped into a running encoder process.
struct PipeSink {
    child: Child,
    stdin: ChildStdin,
}

impl FrameSink for PipeSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.stdin
            .write_all(frame)
            .map_err(|e| Error::FrameSink(format!("encoder rejected frame: {e}")))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let PipeSink { child, stdin } = *self;
        drop(stdin);
        let output = child
            .wait_with_output()
            .map_err(|e| Error::FrameSink(e.to_string()))?;
        if !output.status.success() {
            return Err(Error::FrameSink(format!(
                "encoder exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Run a tool to completion. The error string carries its stderr.
fn run_tool(cmd: &mut Command, binary: &Path) -> std::result::Result<(), String> {
    debug!(?cmd, "running external tool");
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("failed to start {}: {e}", binary.display()))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{} exited with {}: {}",
            binary.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Raw rgb24 stream
// ═══════════════════════════════════════════════════════════════════════

/// Writes frames as one headerless rgb24 stream. Needs no external tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawVideoEncoder;

impl VideoEncoder for RawVideoEncoder {
    fn extension(&self) -> &str {
        "rgb"
    }

    fn open(
        &self,
        path: &Path,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> Result<Box<dyn FrameSink>> {
        let file = File::create(path)
            .map_err(|e| Error::FrameSink(format!("{}: {e}", path.display())))?;
        Ok(Box::new(RawSink(BufWriter::new(file))))
    }

    /// Headerless streams join by plain concatenation.
    fn concat(&self, parts: &[PathBuf], out: &Path) -> Result<()> {
        let sink_err =
            |path: &Path, e: io::Error| Error::FrameSink(format!("{}: {e}", path.display()));
        let mut joined = BufWriter::new(File::create(out).map_err(|e| sink_err(out, e))?);
        for part in parts {
            let mut reader = File::open(part).map_err(|e| sink_err(part, e))?;
            io::copy(&mut reader, &mut joined).map_err(|e| sink_err(out, e))?;
        }
        joined.flush().map_err(|e| sink_err(out, e))
    }
}

struct RawSink(BufWriter<File>);

impl FrameSink for RawSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.0
            .write_all(frame)
            .map_err(|e| Error::FrameSink(e.to_string()))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.0.flush().map_err(|e| Error::FrameSink(e.to_string()))
    }
}
