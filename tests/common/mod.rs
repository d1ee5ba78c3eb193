//! Shared fixtures: in-memory MIDI files, WAV files and fake media services.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use midly::num::{u15, u24, u28, u4, u7};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};

use pianovis::media::{
    FrameSink, MediaServices, Muxer, RawVideoEncoder, Synthesizer, Transcoder, VideoEncoder,
};
use pianovis::{AudioClip, Error, Result};

// ═══════════════════════════════════════════════════════════════════════
// MIDI
// ═══════════════════════════════════════════════════════════════════════

/// One event at an absolute tick.
#[derive(Debug, Clone, Copy)]
pub enum Ev {
    On(u8, u8),
    Off(u8),
    Tempo(u32),
}

/// Build a Standard MIDI File. Each track is a list of `(absolute tick, event)`.
pub fn smf_bytes(ticks_per_quarter: u16, tracks: &[Vec<(u32, Ev)>]) -> Vec<u8> {
    let tracks: Vec<Track> = tracks.iter().map(|t| track(t)).collect();
    let format = if tracks.len() == 1 {
        Format::SingleTrack
    } else {
        Format::Parallel
    };
    let smf = Smf {
        header: Header {
            format,
            timing: Timing::Metrical(u15::new(ticks_per_quarter)),
        },
        tracks,
    };
    let mut buffer = Vec::new();
    smf.write_std(&mut buffer).unwrap();
    buffer
}

fn track(events: &[(u32, Ev)]) -> Track<'static> {
    let mut events = events.to_vec();
    events.sort_by_key(|(tick, _)| *tick);
    let mut out: Track = Vec::new();
    let mut last = 0;
    for (tick, ev) in events {
        let kind = match ev {
            Ev::On(key, vel) => TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            },
            Ev::Off(key) => TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                },
            },
            Ev::Tempo(us) => TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us))),
        };
        out.push(TrackEvent {
            delta: u28::new(tick - last),
            kind,
        });
        last = tick;
    }
    out.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    out
}

/// Write a MIDI file into `dir` and return its path.
pub fn write_midi(
    dir: &Path,
    name: &str,
    ticks_per_quarter: u16,
    tracks: &[Vec<(u32, Ev)>],
) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, smf_bytes(ticks_per_quarter, tracks)).unwrap();
    path
}

/// A single-track file holding one note of `quarters` quarter notes at 120 bpm.
pub fn single_note(dir: &Path, name: &str, key: u8, start_quarter: u32, quarters: u32) -> PathBuf {
    write_midi(
        dir,
        name,
        480,
        &[vec![
            (start_quarter * 480, Ev::On(key, 80)),
            ((start_quarter + quarters) * 480, Ev::Off(key)),
        ]],
    )
}

// ═══════════════════════════════════════════════════════════════════════
// Audio
// ═══════════════════════════════════════════════════════════════════════

/// A constant-level clip written as WAV.
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, duration_ms: f64, level: f32) {
    let mut clip = AudioClip::silent(sample_rate, channels, duration_ms);
    clip.samples.iter_mut().for_each(|s| *s = level);
    clip.write_wav(path).unwrap();
}

// ═══════════════════════════════════════════════════════════════════════
// Fake services
// ═══════════════════════════════════════════════════════════════════════

/// Writes a fixed-length constant tone for every source.
pub struct ToneSynth {
    pub duration_ms: f64,
    pub calls: Arc<AtomicUsize>,
}

impl Synthesizer for ToneSynth {
    fn synthesize(&self, _source: &Path, wav_out: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        write_wav(wav_out, 8000, 1, self.duration_ms, 0.25);
        Ok(())
    }
}

/// A synthesizer that is never available.
pub struct MissingSynth;

impl Synthesizer for MissingSynth {
    fn synthesize(&self, source: &Path, _wav_out: &Path) -> Result<()> {
        Err(Error::SynthesisUnavailable {
            path: source.to_path_buf(),
            reason: "not installed".into(),
        })
    }
}

/// Copies the input when it already is a WAV file; rejects everything else.
pub struct CopyTranscoder;

impl Transcoder for CopyTranscoder {
    fn to_wav(&self, input: &Path, wav_out: &Path) -> Result<()> {
        std::fs::copy(input, wav_out)?;
        Ok(())
    }
}

/// "Muxes" by concatenating the video bytes and the audio bytes.
pub struct ConcatMuxer;

impl Muxer for ConcatMuxer {
    fn mux(&self, video: &Path, audio: &Path, out: &Path) -> Result<()> {
        let mut bytes = std::fs::read(video)?;
        bytes.extend(std::fs::read(audio)?);
        std::fs::write(out, bytes)?;
        Ok(())
    }
}

/// Always fails, after leaving a partial file behind.
pub struct BrokenMuxer;

impl Muxer for BrokenMuxer {
    fn mux(&self, _video: &Path, _audio: &Path, out: &Path) -> Result<()> {
        std::fs::write(out, b"partial")?;
        Err(Error::MuxFailure("container rejected".into()))
    }
}

/// Raw frames, but the sink breaks after `fail_after` frames.
pub struct FlakyEncoder {
    pub fail_after: usize,
}

struct FlakySink {
    inner: Box<dyn FrameSink>,
    left: usize,
}

impl VideoEncoder for FlakyEncoder {
    fn extension(&self) -> &str {
        "rgb"
    }

    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FlakySink {
            inner: RawVideoEncoder.open(path, width, height, fps)?,
            left: self.fail_after,
        }))
    }

    fn concat(&self, parts: &[PathBuf], out: &Path) -> Result<()> {
        RawVideoEncoder.concat(parts, out)
    }
}

impl FrameSink for FlakySink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.left == 0 {
            return Err(Error::FrameSink("disk full".into()));
        }
        self.left -= 1;
        self.inner.write_frame(frame)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.inner.finish()
    }
}

/// Raw video, tone synthesis and concatenating mux: no external tools.
pub fn fake_services(synth_ms: f64) -> (MediaServices, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let services = MediaServices {
        synthesizer: Box::new(ToneSynth {
            duration_ms: synth_ms,
            calls: Arc::clone(&calls),
        }),
        encoder: Box::new(RawVideoEncoder),
        transcoder: Box::new(CopyTranscoder),
        muxer: Box::new(ConcatMuxer),
    };
    (services, calls)
}

/// Number of entries in a directory.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
