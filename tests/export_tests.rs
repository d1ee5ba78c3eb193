//! Integration tests for the export pipeline: scheduling, audio assembly,
//! muxing and cleanup. External tools are replaced by the fakes in `common`.

mod common;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use common::{
    entries, fake_services, single_note, write_wav, BrokenMuxer, FlakyEncoder, MissingSynth,
};
use pianovis::audio::{AudioAssembler, AudioWindow};
use pianovis::media::{FrameSink, RawVideoEncoder, VideoEncoder};
use pianovis::scheduler::{FrameSource, Scheduler, StreamFormat};
use pianovis::{
    partition, AudioSource, CancelToken, Composition, Error, ExportJob, ExportOptions,
    ExportProgress, FrameRenderer, NoteEvent, RenderFrame, Result, Timeline, TrackStyle,
    VideoConfig,
};
use pretty_assertions::assert_eq;

fn tiny_video(start_offset: u32, end_offset: u32) -> VideoConfig {
    VideoConfig {
        width: 64,
        height: 36,
        fps: 30,
        start_offset,
        end_offset,
        ..VideoConfig::default()
    }
}

fn busy_tracks() -> Vec<Timeline> {
    let notes = vec![
        NoteEvent::new(39, 0, 20),
        NoteEvent::new(43, 5, 40),
        NoteEvent::new(46, 30, 31),
        NoteEvent::new(87, 12, 60),
    ];
    vec![
        Timeline::from_notes(notes, 30, 0, TrackStyle::default()).unwrap(),
        Timeline::from_notes(vec![NoteEvent::new(0, 10, 50)], 30, 0, TrackStyle::default())
            .unwrap(),
    ]
}

const TINY: StreamFormat = StreamFormat {
    width: 64,
    height: 36,
    fps: 30,
};

fn scheduler<'a>(
    chunk_dir: &'a Path,
    encoder: &'a dyn VideoEncoder,
    cancel: CancelToken,
    progress: Arc<ExportProgress>,
) -> Scheduler<'a> {
    Scheduler::new(chunk_dir, encoder, TINY, cancel, progress)
}

/// Render `[lo, hi]` with `workers` workers into a raw stream and return its bytes.
fn render_stream(source: &dyn FrameSource, lo: i64, hi: i64, workers: usize) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.rgb");
    let chunks = dir.path().join("chunks");
    std::fs::create_dir(&chunks).unwrap();

    let progress = Arc::new(ExportProgress::new());
    scheduler(&chunks, &RawVideoEncoder, CancelToken::new(), Arc::clone(&progress))
        .run(&partition(lo, hi, workers), source, &out)
        .unwrap();

    assert_eq!(progress.frames_done(), (hi - lo + 1) as u64);
    assert_eq!(entries(&chunks), 0, "chunk files left behind");
    std::fs::read(out).unwrap()
}

/// Raw encoder that records every stream it opens and every join.
#[derive(Default)]
struct RecordingEncoder {
    opened: Mutex<Vec<PathBuf>>,
    joined: Mutex<Vec<Vec<PathBuf>>>,
}

impl VideoEncoder for RecordingEncoder {
    fn extension(&self) -> &str {
        "rgb"
    }

    fn open(&self, path: &Path, width: u32, height: u32, fps: u32) -> Result<Box<dyn FrameSink>> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        RawVideoEncoder.open(path, width, height, fps)
    }

    fn concat(&self, parts: &[PathBuf], out: &Path) -> Result<()> {
        self.joined.lock().unwrap().push(parts.to_vec());
        RawVideoEncoder.concat(parts, out)
    }
}

/// Fails on one frame, otherwise renders normally.
struct FailingSource<'a> {
    inner: FrameRenderer<'a>,
    fail_at: i64,
}

impl FrameSource for FailingSource<'_> {
    fn frame_len(&self) -> usize {
        self.inner.frame_len()
    }

    fn render_frame(&self, frame: i64) -> Result<RenderFrame> {
        if frame == self.fail_at {
            return Err(Error::Io(std::io::Error::other("out of memory")));
        }
        Ok(self.inner.render(frame))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn parallel_output_matches_serial_output() {
    let tracks = busy_tracks();
    let renderer = FrameRenderer::new(&tiny_video(0, 0), &tracks).unwrap();
    let serial = render_stream(&renderer, -3, 64, 1);
    assert_eq!(serial.len(), 68 * renderer.frame_len());

    for workers in [2, 3, 5, 68] {
        let parallel = render_stream(&renderer, -3, 64, workers);
        assert!(parallel == serial, "{workers} workers differ from a single pass");
    }
    println!("✓ parallel export matches serial for 2, 3, 5 and 68 workers");
}

#[test]
fn chunks_are_reassembled_in_frame_order() {
    let tracks = busy_tracks();
    let renderer = FrameRenderer::new(&tiny_video(0, 0), &tracks).unwrap();
    let stream = render_stream(&renderer, 0, 29, 4);
    let len = renderer.frame_len();
    for (i, frame) in stream.chunks_exact(len).enumerate() {
        assert!(frame == renderer.render(i as i64).as_bytes(), "frame {i} out of place");
    }
}

#[test]
fn every_worker_encodes_its_own_chunk() {
    let tracks = busy_tracks();
    let renderer = FrameRenderer::new(&tiny_video(0, 0), &tracks).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("video.rgb");
    let encoder = RecordingEncoder::default();

    scheduler(dir.path(), &encoder, CancelToken::new(), Arc::new(ExportProgress::new()))
        .run(&partition(0, 29, 3), &renderer, &out)
        .unwrap();

    let mut opened = encoder.opened.lock().unwrap().clone();
    opened.sort();
    let expected: Vec<PathBuf> = (0..3)
        .map(|i| dir.path().join(format!("chunk_{i:04}.rgb")))
        .collect();
    assert_eq!(opened, expected);
    assert_eq!(*encoder.joined.lock().unwrap(), vec![expected]);
    assert_eq!(entries(dir.path()), 1, "only the joined stream remains");
    assert_eq!(std::fs::metadata(&out).unwrap().len(), 30 * renderer.frame_len() as u64);
}

#[test]
fn single_chunk_encodes_straight_into_the_output() {
    let tracks = busy_tracks();
    let renderer = FrameRenderer::new(&tiny_video(0, 0), &tracks).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("video.rgb");
    let encoder = RecordingEncoder::default();

    scheduler(dir.path(), &encoder, CancelToken::new(), Arc::new(ExportProgress::new()))
        .run(&partition(0, 9, 1), &renderer, &out)
        .unwrap();

    assert_eq!(*encoder.opened.lock().unwrap(), vec![out]);
    assert!(encoder.joined.lock().unwrap().is_empty());
}

#[test]
fn worker_failure_discards_every_chunk() {
    let tracks = busy_tracks();
    let source = FailingSource {
        inner: FrameRenderer::new(&tiny_video(0, 0), &tracks).unwrap(),
        fail_at: 40,
    };
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.rgb");
    let chunks = dir.path().join("chunks");
    std::fs::create_dir(&chunks).unwrap();

    let cancel = CancelToken::new();
    let err = scheduler(&chunks, &RawVideoEncoder, cancel.clone(), Arc::new(ExportProgress::new()))
        .run(&partition(0, 59, 4), &source, &out)
        .unwrap_err();

    match err {
        Error::WorkerFailure { chunk, reason } => {
            assert_eq!(chunk, 2);
            assert!(reason.contains("out of memory"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(cancel.is_cancelled());
    assert_eq!(entries(&chunks), 0);
    assert!(!out.exists());
}

#[test]
fn serial_failure_is_a_worker_failure() {
    let tracks = busy_tracks();
    let source = FailingSource {
        inner: FrameRenderer::new(&tiny_video(0, 0), &tracks).unwrap(),
        fail_at: 3,
    };
    let dir = tempfile::tempdir().unwrap();
    let progress = Arc::new(ExportProgress::new());
    let err = scheduler(dir.path(), &RawVideoEncoder, CancelToken::new(), progress)
        .run(&partition(0, 9, 1), &source, &dir.path().join("out.rgb"))
        .unwrap_err();
    assert!(matches!(err, Error::WorkerFailure { chunk: 0, .. }), "{err}");
}

#[test]
fn cancelled_scheduler_leaves_nothing_behind() {
    let tracks = busy_tracks();
    let renderer = FrameRenderer::new(&tiny_video(0, 0), &tracks).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let chunks = dir.path().join("chunks");
    std::fs::create_dir(&chunks).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = scheduler(&chunks, &RawVideoEncoder, cancel, Arc::new(ExportProgress::new()))
        .run(&partition(0, 59, 3), &renderer, &dir.path().join("out.rgb"))
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err}");
    assert_eq!(entries(&chunks), 0);
}

// ═══════════════════════════════════════════════════════════════════════
// Audio
// ═══════════════════════════════════════════════════════════════════════

fn window(lead_ms: f64, tail_ms: f64) -> AudioWindow {
    AudioWindow {
        skip_ms: 0.0,
        content_ms: 2000.0,
        lead_ms,
        tail_ms,
    }
}

#[test]
fn offsets_add_exactly_two_seconds_of_silence() {
    let dir = tempfile::tempdir().unwrap();
    let midi = single_note(dir.path(), "a.mid", 60, 0, 4);
    let (services, calls) = fake_services(5000.0);
    let assembler = AudioAssembler::new(&services, dir.path());

    // start_offset = end_offset = 30 frames at 30 fps
    let video = tiny_video(30, 30);
    let lead = video.frames_to_ms(30);
    let tail = video.frames_to_ms(30);
    let padded = assembler
        .assemble(&[AudioSource::Synthesized], &[midi.clone()], &window(lead, tail))
        .unwrap();
    let unpadded = assembler
        .assemble(&[AudioSource::Synthesized], &[midi], &window(0.0, 0.0))
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(padded.warnings.is_empty());
    let diff = padded.clip.duration_ms() - unpadded.clip.duration_ms();
    assert!((diff - 2000.0).abs() < 1e-9, "{diff}");
    assert!((padded.clip.duration_ms() - 4000.0).abs() < 1e-9);
}

#[test]
fn missing_synthesizer_falls_back_to_silence() {
    let dir = tempfile::tempdir().unwrap();
    let midi = single_note(dir.path(), "a.mid", 60, 0, 4);
    let (mut services, _) = fake_services(0.0);
    services.synthesizer = Box::new(MissingSynth);

    let track = AudioAssembler::new(&services, dir.path())
        .assemble(&[AudioSource::Synthesized], &[midi.clone()], &window(500.0, 500.0))
        .unwrap();

    assert_eq!(track.warnings.len(), 1);
    assert!(matches!(
        &track.warnings[0],
        Error::SynthesisUnavailable { path, .. } if *path == midi
    ));
    assert!((track.clip.duration_ms() - 3000.0).abs() < 1e-9);
    assert!(track.clip.samples.iter().all(|s| *s == 0.0));
}

#[test]
fn external_files_are_mixed_on_the_longest_clip() {
    let dir = tempfile::tempdir().unwrap();
    let short = dir.path().join("short.wav");
    let long = dir.path().join("long.flac");
    write_wav(&short, 8000, 1, 500.0, 0.25);
    write_wav(&long, 16000, 2, 2500.0, 0.5);
    let (services, calls) = fake_services(0.0);

    let track = AudioAssembler::new(&services, dir.path())
        .assemble(
            &[AudioSource::File(short), AudioSource::File(long)],
            &[],
            &window(0.0, 0.0),
        )
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let clip = track.clip;
    assert_eq!((clip.sample_rate, clip.channels), (16000, 2));
    assert!((clip.duration_ms() - 2000.0).abs() < 1e-9);
    // Both clips in the first half second, only the long one after it.
    let early = clip.samples[2 * 4000];
    assert!((early - 0.75).abs() < 1e-2, "{early}");
    let late = clip.samples[2 * 16000];
    assert!((late - 0.5).abs() < 1e-3, "{late}");
}

#[test]
fn undecodable_audio_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.wav");
    std::fs::write(&bad, b"RIFF nonsense").unwrap();
    let (services, _) = fake_services(0.0);
    let err = AudioAssembler::new(&services, dir.path())
        .assemble(&[AudioSource::File(bad)], &[], &window(0.0, 0.0))
        .unwrap_err();
    assert!(matches!(err, Error::Audio(_)), "{err}");
}

// ═══════════════════════════════════════════════════════════════════════
// Export job
// ═══════════════════════════════════════════════════════════════════════

struct Project {
    _dir: tempfile::TempDir,
    composition: Composition,
    work: PathBuf,
    dest: PathBuf,
}

/// One two-quarter note with one second of padding at either end.
fn project() -> Project {
    let dir = tempfile::tempdir().unwrap();
    let midi = single_note(dir.path(), "song.mid", 60, 0, 2);
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();

    let mut composition = Composition::new(tiny_video(30, 30));
    composition.add_track([midi], TrackStyle::default());
    composition.register().unwrap();
    Project {
        dest: dir.path().join("song.mp4"),
        _dir: dir,
        composition,
        work,
    }
}

fn options(work: &Path, workers: usize) -> ExportOptions {
    ExportOptions {
        workers,
        preview_fraction: 1.0,
        work_dir: Some(work.to_path_buf()),
    }
}

#[test]
fn export_writes_destination_and_cleans_up() {
    let p = project();
    let (services, calls) = fake_services(3000.0);
    let job = ExportJob::new(&p.composition, options(&p.work, 2)).with_services(services);
    let progress = job.progress();
    let report = job.run(&p.dest).unwrap();

    // Notes span frames 30..=60; 30 frames of padding on each side.
    assert_eq!(report.frames, 91);
    assert!((report.duration_ms - 91.0 / 30.0 * 1000.0).abs() < 1e-9);
    assert!(report.warnings.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(progress.frames_done(), 91);

    let frame_len = 64 * 36 * 3;
    let bytes = std::fs::read(&p.dest).unwrap();
    assert!(bytes.len() > 91 * frame_len);
    let renderer = p.composition.renderer().unwrap();
    assert!(&bytes[..frame_len] == renderer.render(0).as_bytes());
    assert!(&bytes[45 * frame_len..46 * frame_len] == renderer.render(45).as_bytes());
    assert_eq!(entries(&p.work), 0);
}

#[test]
fn failed_mux_leaves_destination_untouched() {
    let p = project();
    std::fs::write(&p.dest, b"previous export").unwrap();
    let (mut services, _) = fake_services(3000.0);
    services.muxer = Box::new(BrokenMuxer);

    let err = ExportJob::new(&p.composition, options(&p.work, 2))
        .with_services(services)
        .run(&p.dest)
        .unwrap_err();

    assert!(matches!(err, Error::MuxFailure(_)), "{err}");
    assert_eq!(std::fs::read(&p.dest).unwrap(), b"previous export");
    assert_eq!(entries(&p.work), 0);
}

#[test]
fn failed_frame_sink_leaves_no_residue() {
    let p = project();
    let (mut services, calls) = fake_services(3000.0);
    services.encoder = Box::new(FlakyEncoder { fail_after: 5 });

    let err = ExportJob::new(&p.composition, options(&p.work, 1))
        .with_services(services)
        .run(&p.dest)
        .unwrap_err();

    assert!(matches!(err, Error::FrameSink(_)), "{err}");
    assert!(!p.dest.exists());
    assert_eq!(entries(&p.work), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0, "audio must not be assembled");
}

#[test]
fn worker_failure_mid_export_leaves_no_residue() {
    let p = project();
    std::fs::write(&p.dest, b"previous export").unwrap();
    let (services, calls) = fake_services(3000.0);
    let source = FailingSource {
        inner: p.composition.renderer().unwrap(),
        fail_at: 50,
    };

    let err = ExportJob::new(&p.composition, options(&p.work, 3))
        .with_services(services)
        .run_with(&p.dest, &source)
        .unwrap_err();

    match err {
        Error::WorkerFailure { reason, .. } => {
            assert!(reason.contains("out of memory"), "{reason}")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(entries(&p.work), 0);
    assert_eq!(std::fs::read(&p.dest).unwrap(), b"previous export");
    assert_eq!(calls.load(Ordering::SeqCst), 0, "audio must not be assembled");
}

#[test]
fn cancelled_export_leaves_no_residue() {
    let p = project();
    let (services, _) = fake_services(3000.0);
    let job = ExportJob::new(&p.composition, options(&p.work, 3)).with_services(services);
    job.cancel_token().cancel();

    let err = job.run(&p.dest).unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err}");
    assert!(!p.dest.exists());
    assert_eq!(entries(&p.work), 0);
}

#[test]
fn preview_renders_a_leading_fraction() {
    let p = project();
    let (services, _) = fake_services(3000.0);
    let opts = ExportOptions {
        preview_fraction: 0.5,
        ..options(&p.work, 1)
    };
    let report = ExportJob::new(&p.composition, opts)
        .with_services(services)
        .run(&p.dest)
        .unwrap();
    // Note range 30..=60 trimmed to 30..=45, plus the padding.
    assert_eq!(report.frames, 76);
}

#[test]
fn empty_composition_is_a_render_fault() {
    let composition = Composition::new(tiny_video(0, 0));
    let dir = tempfile::tempdir().unwrap();
    let (services, _) = fake_services(0.0);
    let err = ExportJob::new(&composition, options(dir.path(), 1))
        .with_services(services)
        .run(&dir.path().join("out.mp4"))
        .unwrap_err();
    assert!(matches!(err, Error::RenderFault(_)), "{err}");
}
