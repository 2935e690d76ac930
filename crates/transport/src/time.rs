use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.numerator
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl From<(u32, u32)> for TimeSignature {
    fn from((numerator, denominator): (u32, u32)) -> Self {
        Self::new(numerator, denominator)
    }
}

/// Tempo and meter. All conversions are between seconds on the transport
/// timeline and quarter-note beats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeContext {
    pub bpm: f64,
    pub time_signature: TimeSignature,
}

impl TimeContext {
    pub const MIN_BPM: f64 = 20.0;
    pub const MAX_BPM: f64 = 300.0;

    pub fn new(bpm: f64, time_signature: impl Into<TimeSignature>) -> Self {
        let bpm = if bpm.is_finite() {
            bpm.clamp(Self::MIN_BPM, Self::MAX_BPM)
        } else {
            120.0
        };
        Self {
            bpm,
            time_signature: time_signature.into(),
        }
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds / self.seconds_per_beat()
    }

    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        beats * self.seconds_per_beat()
    }

    pub fn seconds_per_bar(&self) -> f64 {
        self.seconds_per_beat() * self.time_signature.beats_per_bar() as f64
    }

    /// One sixteenth note.
    pub fn grid_step(&self) -> f64 {
        self.seconds_per_beat() / 4.0
    }

    /// Snap to the nearest grid step.
    pub fn snap(&self, seconds: f64) -> f64 {
        let step = self.grid_step();
        (seconds / step).round() * step
    }

    pub fn format_position(&self, seconds: f64) -> MusicalPosition {
        let seconds = seconds.max(0.0);
        let total_sixteenths = (seconds / self.grid_step()).floor() as u64;
        let beats_per_bar = self.time_signature.beats_per_bar() as u64;
        let total_beats = total_sixteenths / 4;

        MusicalPosition {
            bar: (total_beats / beats_per_bar) as u32 + 1,
            beat: (total_beats % beats_per_bar) as u32 + 1,
            sixteenth: (total_sixteenths % 4) as u32 + 1,
        }
    }
}

impl Default for TimeContext {
    fn default() -> Self {
        Self::new(120.0, TimeSignature::default())
    }
}

/// 1-based bar / beat / sixteenth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalPosition {
    pub bar: u32,
    pub beat: u32,
    pub sixteenth: u32,
}

impl std::fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.bar, self.beat, self.sixteenth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub enabled: bool,
    pub start: f64,
    pub end: f64,
}

impl LoopRegion {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            enabled: true,
            start,
            end,
        }
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0.0
    }

    /// A region must start at or after zero and span more than one grid step.
    pub fn is_valid(&self, time: &TimeContext) -> bool {
        self.start.is_finite()
            && self.end.is_finite()
            && self.start >= 0.0
            && self.end > self.start + time.grid_step()
    }

    /// Fold a timeline position past the loop end back into the loop.
    pub fn wrap(&self, seconds: f64) -> f64 {
        if seconds < self.end || self.is_empty() {
            return seconds;
        }
        self.start + (seconds - self.start) % self.len()
    }
}
