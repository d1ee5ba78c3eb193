//! Tick-to-frame conversion for event sources with variable tempo.
//!
//! This is the bridge between the event stream's musical time (ticks) and
//! the video's frame grid. Tempo changes are piecewise: a change affects
//! only the ticks that come after it, never time already accumulated.

/// Tempo assumed until the first tempo-change event (120 BPM).
pub const DEFAULT_US_PER_QUARTER: u32 = 500_000;

/// How the source header defines a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickBase {
    /// Ticks are fractions of a quarter note; wall-clock length depends on tempo.
    Metrical { ticks_per_quarter: u16 },
    /// Ticks are fixed fractions of a second (SMPTE timecode); tempo is ignored.
    Timecode { ticks_per_second: f64 },
}

/// One tempo change, at an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    pub tick: u64,
    pub us_per_quarter: u32,
}

/// Ordered tempo changes of one track.
///
/// Built while scanning the source, consumed by [`FrameClock`]s while notes
/// are resolved, then dropped together with the parser state.
#[derive(Debug, Clone)]
pub struct TempoMap {
    base: TickBase,
    changes: Vec<TempoChange>,
}

impl TempoMap {
    pub fn new(base: TickBase) -> Self {
        Self {
            base,
            changes: Vec::new(),
        }
    }

    pub fn base(&self) -> TickBase {
        self.base
    }

    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    /// Record a tempo change. The map is kept sorted by tick, and a later
    /// change at the same tick replaces the earlier one.
    pub fn insert(&mut self, tick: u64, us_per_quarter: u32) {
        let change = TempoChange {
            tick,
            us_per_quarter,
        };
        match self.changes.binary_search_by_key(&tick, |c| c.tick) {
            Ok(i) => self.changes[i] = change,
            Err(i) => self.changes.insert(i, change),
        }
    }

    /// Elapsed frames at an absolute tick.
    pub fn frames_at(&self, tick: u64, fps: u32) -> f64 {
        let mut clock = FrameClock::new(self, fps);
        clock.advance(tick);
        clock.frames()
    }
}

/// Frames spanned by `delta_ticks` at a constant tempo.
///
/// `delta_ticks / ticks_per_quarter * tempo_us / 1_000_000 * fps`
pub fn delta_frames(
    delta_ticks: u64,
    ticks_per_quarter: u16,
    us_per_quarter: u32,
    fps: u32,
) -> f64 {
    if ticks_per_quarter == 0 {
        return 0.0;
    }
    delta_ticks as f64 / ticks_per_quarter as f64 * us_per_quarter as f64 / 1_000_000.0
        * fps as f64
}

/// Running frame counter that walks a [`TempoMap`] forward.
///
/// Each track of a source gets its own clock over its own tempo map.
#[derive(Debug)]
pub struct FrameClock<'a> {
    map: &'a TempoMap,
    fps: u32,
    tick: u64,
    tempo: u32,
    next_change: usize,
    frames: f64,
}

impl<'a> FrameClock<'a> {
    pub fn new(map: &'a TempoMap, fps: u32) -> Self {
        Self {
            map,
            fps,
            tick: 0,
            tempo: DEFAULT_US_PER_QUARTER,
            next_change: 0,
            frames: 0.0,
        }
    }

    /// Move the clock forward by `delta_ticks`, splitting the interval at
    /// every tempo change it crosses.
    pub fn advance(&mut self, delta_ticks: u64) {
        let target = self.tick.saturating_add(delta_ticks);
        match self.map.base {
            TickBase::Timecode { ticks_per_second } => {
                if ticks_per_second > 0.0 {
                    self.frames += delta_ticks as f64 / ticks_per_second * self.fps as f64;
                }
            }
            TickBase::Metrical { ticks_per_quarter } => {
                while let Some(change) = self.map.changes.get(self.next_change) {
                    if change.tick > target {
                        break;
                    }
                    let span = change.tick.saturating_sub(self.tick);
                    self.frames += delta_frames(span, ticks_per_quarter, self.tempo, self.fps);
                    self.tick = self.tick.max(change.tick);
                    self.tempo = change.us_per_quarter;
                    self.next_change += 1;
                }
                self.frames +=
                    delta_frames(target - self.tick, ticks_per_quarter, self.tempo, self.fps);
            }
        }
        self.tick = target;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Accumulated (unrounded) frames since tick 0.
    pub fn frames(&self) -> f64 {
        self.frames
    }

    /// Accumulated frames rounded to the frame grid.
    pub fn frame(&self) -> i64 {
        self.frames.round() as i64
    }
}
