// Musical time - tempo, time signature and bar arithmetic
// All engine positions are expressed in bars (f64)

use std::fmt;

/// Tolerance used when comparing positions that went through float arithmetic
pub const BAR_EPSILON: f64 = 1e-9;

/// Meter of the loop window; one bar holds `numerator` notes of value `1/denominator`
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    pub const FOUR_FOUR: Self = Self {
        numerator: 4,
        denominator: 4,
    };

    /// `None` unless the numerator is 1..=32 and the denominator a power of two up to 32
    pub fn try_new(numerator: u8, denominator: u8) -> Option<Self> {
        Self::is_valid(numerator, denominator).then_some(Self {
            numerator,
            denominator,
        })
    }

    pub fn is_valid(numerator: u8, denominator: u8) -> bool {
        (1..=32).contains(&numerator) && denominator.is_power_of_two() && denominator <= 32
    }

    pub const fn four_four() -> Self {
        Self::FOUR_FOUR
    }

    pub const fn three_four() -> Self {
        Self {
            numerator: 3,
            denominator: 4,
        }
    }

    pub const fn six_eight() -> Self {
        Self {
            numerator: 6,
            denominator: 8,
        }
    }

    /// Length of one bar counted in quarter notes (4/4 = 4, 6/8 = 3)
    pub fn quarters_per_bar(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator as f64
    }

    /// Fraction of a bar taken by one beat
    pub fn beat_in_bars(&self) -> f64 {
        1.0 / self.numerator as f64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::FOUR_FOUR
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Quarter-note tempo; only constructible inside [MIN_BPM, MAX_BPM]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    pub const MIN_BPM: f64 = 20.0;
    pub const MAX_BPM: f64 = 999.0;
    pub const DEFAULT_BPM: f64 = 120.0;

    pub fn try_new(bpm: f64) -> Option<Self> {
        Self::is_valid_bpm(bpm).then_some(Self { bpm })
    }

    pub fn is_valid_bpm(bpm: f64) -> bool {
        bpm.is_finite() && (Self::MIN_BPM..=Self::MAX_BPM).contains(&bpm)
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Seconds per bar under `time_signature`
    pub fn bar_seconds(&self, time_signature: &TimeSignature) -> f64 {
        60.0 / self.bpm * time_signature.quarters_per_bar()
    }

    pub fn seconds_to_bars(&self, seconds: f64, time_signature: &TimeSignature) -> f64 {
        seconds / self.bar_seconds(time_signature)
    }

    pub fn bars_to_seconds(&self, bars: f64, time_signature: &TimeSignature) -> f64 {
        bars * self.bar_seconds(time_signature)
    }

    /// Audio frames at `sample_rate` converted to bars
    pub fn samples_to_bars(
        &self,
        samples: u64,
        sample_rate: f64,
        time_signature: &TimeSignature,
    ) -> f64 {
        self.seconds_to_bars(samples as f64 / sample_rate, time_signature)
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            bpm: Self::DEFAULT_BPM,
        }
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

/// Snap a position to the nearest bar boundary (round half up)
pub fn nearest_bar(position: f64) -> f64 {
    (position + BAR_EPSILON).round().max(0.0)
}

/// First bar boundary at or after `position`
///
/// A position sitting on a boundary (within float noise) returns that boundary.
pub fn next_bar(position: f64) -> f64 {
    (position - BAR_EPSILON).ceil().max(0.0)
}

/// Format a bar position as `bar:beat:fraction` (1-based, for logs and UI)
pub fn format_position(position: f64, time_signature: &TimeSignature) -> String {
    let bar = position.floor();
    let beats = (position - bar) / time_signature.beat_in_bars();
    let beat = beats.floor();
    let frac = ((beats - beat) * 1000.0).floor();
    format!("{}:{:02}:{:03}", bar as u64 + 1, beat as u64 + 1, frac as u64)
}
