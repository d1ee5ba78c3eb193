//! Audio track assembly.
//!
//! Every audio source of a composition yields one clip: synthesized from
//! the event sources, or read from an external file. Each clip is cut to
//! the exported content window, the clips are mixed additively on top of
//! the longest one, and the mix is padded with silence for the lead-in and
//! lead-out frames so it lasts exactly as long as the video.

use std::fmt;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::media::MediaServices;

/// Audio source name that means "synthesize from the tracks".
pub const DEFAULT_AUDIO: &str = "default";

/// Format of the silence substituted for unavailable synthesis.
pub const FALLBACK_SAMPLE_RATE: u32 = 44_100;
pub const FALLBACK_CHANNELS: u16 = 2;

/// Smallest block handed to the resampler.
const RESAMPLE_CHUNK: usize = 1024;

/// Where a composition's sound comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Synthesize from every track's event sources.
    Synthesized,
    /// An external audio file. Non-WAV files are transcoded first.
    File(PathBuf),
}

impl AudioSource {
    /// `"default"` or a file path, as written in project files.
    pub fn parse(name: &str) -> Self {
        if name == DEFAULT_AUDIO {
            AudioSource::Synthesized
        } else {
            AudioSource::File(PathBuf::from(name))
        }
    }
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Synthesized => f.write_str(DEFAULT_AUDIO),
            AudioSource::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// How source audio lines up with the exported frames, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioWindow {
    /// Audio to drop from the start of every source.
    pub skip_ms: f64,
    /// Length of the note content after the skip.
    pub content_ms: f64,
    /// Silence before the content.
    pub lead_ms: f64,
    /// Silence after the content.
    pub tail_ms: f64,
}

impl AudioWindow {
    pub fn total_ms(&self) -> f64 {
        self.lead_ms + self.content_ms + self.tail_ms
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Clips
// ═══════════════════════════════════════════════════════════════════════

/// Decoded audio: interleaved samples in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn silent(sample_rate: u32, channels: u16, duration_ms: f64) -> Self {
        let frames = ms_to_frames(duration_ms, sample_rate);
        Self {
            sample_rate,
            channels,
            samples: vec![0.0; frames * channels as usize],
        }
    }

    /// Sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> f64 {
        self.frames() as f64 * 1000.0 / self.sample_rate as f64
    }

    pub fn read_wav(path: &Path) -> Result<Self> {
        let mut reader = WavReader::open(path).map_err(|e| audio_error(path, e))?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| audio_error(path, e))?,
            SampleFormat::Int => {
                let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_val))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| audio_error(path, e))?
            }
        };
        Ok(Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Write as 16-bit PCM.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).map_err(|e| audio_error(path, e))?;
        for &sample in &self.samples {
            let quantized = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            writer.write_sample(quantized).map_err(|e| audio_error(path, e))?;
        }
        writer.finalize().map_err(|e| audio_error(path, e))
    }

    /// At most `len_ms` of audio starting at `start_ms`. Never longer than
    /// what the clip actually holds.
    pub fn slice_ms(&self, start_ms: f64, len_ms: f64) -> Self {
        let ch = self.channels as usize;
        let total = self.frames();
        let start = ms_to_frames(start_ms, self.sample_rate).min(total);
        let end = (start + ms_to_frames(len_ms, self.sample_rate)).min(total);
        Self {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples: self.samples[start * ch..end * ch].to_vec(),
        }
    }

    /// Extend with silence (or cut) to exactly `duration_ms`.
    pub fn fit_ms(mut self, duration_ms: f64) -> Self {
        let frames = ms_to_frames(duration_ms, self.sample_rate);
        self.samples.resize(frames * self.channels as usize, 0.0);
        self
    }

    /// Surround with `lead_ms` and `tail_ms` of silence.
    pub fn padded(&self, lead_ms: f64, tail_ms: f64) -> Self {
        let ch = self.channels as usize;
        let lead = ms_to_frames(lead_ms, self.sample_rate) * ch;
        let tail = ms_to_frames(tail_ms, self.sample_rate) * ch;
        let mut samples = Vec::with_capacity(lead + self.samples.len() + tail);
        samples.resize(lead, 0.0);
        samples.extend_from_slice(&self.samples);
        samples.resize(lead + self.samples.len() + tail, 0.0);
        Self {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples,
        }
    }

    /// Convert to `sample_rate` and `channels`: band-limited sinc
    /// resampling, mono duplicated to every channel, anything else averaged
    /// down.
    pub fn conform(&self, sample_rate: u32, channels: u16) -> Result<Self> {
        let mixed = self.remix(channels);
        if mixed.sample_rate == sample_rate || mixed.samples.is_empty() {
            return Ok(Self { sample_rate, ..mixed });
        }
        mixed.resample(sample_rate)
    }

    fn remix(&self, channels: u16) -> Self {
        if self.channels == channels {
            return self.clone();
        }
        let from = self.channels.max(1) as usize;
        let to = channels.max(1) as usize;
        let mut samples = Vec::with_capacity(self.frames() * to);
        for frame in self.samples.chunks_exact(from) {
            if from == 1 {
                samples.extend(std::iter::repeat(frame[0]).take(to));
            } else if to == 1 {
                samples.push(frame.iter().sum::<f32>() / from as f32);
            } else {
                samples.extend((0..to).map(|c| frame[c.min(from - 1)]));
            }
        }
        Self {
            sample_rate: self.sample_rate,
            channels,
            samples,
        }
    }

    fn resample(&self, sample_rate: u32) -> Result<Self> {
        let ch = self.channels.max(1) as usize;
        let src_frames = self.frames();
        let ratio = sample_rate as f64 / self.sample_rate as f64;
        let dst_frames = (src_frames as f64 * ratio).round() as usize;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let chunk = src_frames.max(RESAMPLE_CHUNK);
        let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, ch)
            .map_err(|e| Error::Audio(format!("resampler init: {e}")))?;

        let planar: Vec<Vec<f32>> = (0..ch)
            .map(|c| self.samples.iter().skip(c).step_by(ch).copied().collect())
            .collect();
        let resample_err = |e: rubato::ResampleError| Error::Audio(format!("resample: {e}"));

        // The sinc filter delays its output; flush with silence until the
        // delayed tail of the clip has come out.
        let delay = resampler.output_delay();
        let mut out = resampler
            .process_partial(Some(planar.as_slice()), None)
            .map_err(resample_err)?;
        while out[0].len() < delay + dst_frames {
            let tail = resampler
                .process_partial::<Vec<f32>>(None, None)
                .map_err(resample_err)?;
            if tail[0].is_empty() {
                break;
            }
            for (o, t) in out.iter_mut().zip(tail) {
                o.extend(t);
            }
        }

        let mut samples = Vec::with_capacity(dst_frames * ch);
        for i in delay..delay + dst_frames {
            samples.extend(out.iter().map(|c| c.get(i).copied().unwrap_or(0.0)));
        }
        debug!(from = self.sample_rate, to = sample_rate, frames = dst_frames, "resampled clip");
        Ok(Self {
            sample_rate,
            channels: self.channels,
            samples,
        })
    }

    /// Mix `other` into this clip from its start. Whatever of `other`
    /// extends past the end of this clip is dropped.
    pub fn overlay(&mut self, other: &AudioClip) -> Result<()> {
        let other = other.conform(self.sample_rate, self.channels)?;
        for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
            *dst = (*dst + src).clamp(-1.0, 1.0);
        }
        Ok(())
    }
}

fn ms_to_frames(ms: f64, sample_rate: u32) -> usize {
    (ms.max(0.0) * sample_rate as f64 / 1000.0).round() as usize
}

fn audio_error(path: &Path, e: hound::Error) -> Error {
    Error::Audio(format!("{}: {e}", path.display()))
}

/// Mix clips on top of the longest one. `None` when there is nothing to mix.
pub fn mix(mut clips: Vec<AudioClip>) -> Result<Option<AudioClip>> {
    let Some(longest) = clips
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.duration_ms().total_cmp(&b.duration_ms()))
        .map(|(i, _)| i)
    else {
        return Ok(None);
    };
    let mut base = clips.swap_remove(longest);
    for clip in &clips {
        base.overlay(clip)?;
    }
    Ok(Some(base))
}

// ═══════════════════════════════════════════════════════════════════════
// Assembly
// ═══════════════════════════════════════════════════════════════════════

/// The mixed, padded audio track of an export.
#[derive(Debug)]
pub struct AudioTrack {
    pub clip: AudioClip,
    /// Recovered problems, e.g. synthesis that fell back to silence.
    pub warnings: Vec<Error>,
}

/// Builds an audio track from a composition's audio sources.
pub struct AudioAssembler<'a> {
    services: &'a MediaServices,
    scratch: &'a Path,
}

impl<'a> AudioAssembler<'a> {
    /// Intermediate files are written to `scratch`, which the caller removes.
    pub fn new(services: &'a MediaServices, scratch: &'a Path) -> Self {
        Self { services, scratch }
    }

    /// `event_sources` are the files synthesized for [`AudioSource::Synthesized`].
    #[instrument(skip_all, fields(sources = sources.len(), total_ms = window.total_ms()))]
    pub fn assemble(
        &self,
        sources: &[AudioSource],
        event_sources: &[PathBuf],
        window: &AudioWindow,
    ) -> Result<AudioTrack> {
        let mut clips = Vec::new();
        let mut warnings = Vec::new();

        for (i, source) in sources.iter().enumerate() {
            match source {
                AudioSource::Synthesized => {
                    for (j, path) in event_sources.iter().enumerate() {
                        let clip = match self.synthesize(path, i, j) {
                            Ok(clip) => clip.slice_ms(window.skip_ms, window.content_ms),
                            Err(e) => {
                                warn!(
                                    source = %path.display(),
                                    error = %e,
                                    "synthesis unavailable, using silence"
                                );
                                warnings.push(Error::SynthesisUnavailable {
                                    path: path.clone(),
                                    reason: e.to_string(),
                                });
                                AudioClip::silent(
                                    FALLBACK_SAMPLE_RATE,
                                    FALLBACK_CHANNELS,
                                    window.content_ms,
                                )
                            }
                        };
                        clips.push(clip);
                    }
                }
                AudioSource::File(path) => {
                    let clip = self.load_file(path, i)?;
                    clips.push(clip.slice_ms(window.skip_ms, window.content_ms));
                }
            }
        }

        let mixed = mix(clips)?
            .unwrap_or_else(|| AudioClip::silent(FALLBACK_SAMPLE_RATE, FALLBACK_CHANNELS, 0.0))
            .fit_ms(window.content_ms);
        let clip = mixed.padded(window.lead_ms, window.tail_ms);
        info!(
            duration_ms = clip.duration_ms(),
            sample_rate = clip.sample_rate,
            channels = clip.channels,
            warnings = warnings.len(),
            "audio track assembled"
        );
        Ok(AudioTrack { clip, warnings })
    }

    fn synthesize(
        &self,
        source: &Path,
        audio_index: usize,
        file_index: usize,
    ) -> Result<AudioClip> {
        let out = self.scratch.join(format!("synth_{audio_index}_{file_index}.wav"));
        debug!(source = %source.display(), out = %out.display(), "synthesizing");
        self.services.synthesizer.synthesize(source, &out)?;
        AudioClip::read_wav(&out)
    }

    fn load_file(&self, path: &Path, audio_index: usize) -> Result<AudioClip> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            return AudioClip::read_wav(path);
        }
        let out = self.scratch.join(format!("audio_{audio_index}.wav"));
        debug!(input = %path.display(), out = %out.display(), "transcoding audio");
        self.services.transcoder.to_wav(path, &out)?;
        AudioClip::read_wav(&out)
    }
}
