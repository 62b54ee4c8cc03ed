// Note events for the sequencer
// A note event is a pitch (or rest) placed at a bar position with a length and velocity

use crate::sequencer::time::TimeSignature;
use std::fmt;
use std::str::FromStr;

/// Unique identifier for note events (unique within one timeline)
pub type NoteId = u64;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Errors raised while parsing note names or lengths
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PitchError {
    #[error("Empty note name")]
    Empty,

    #[error("Invalid note name: {0}")]
    InvalidName(String),

    #[error("Note {0} is outside the MIDI range (0-127)")]
    OutOfRange(String),

    #[error("Invalid note length: {0}")]
    InvalidLength(String),
}

/// A sounding pitch, stored as a MIDI note number (60 = C4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Note(u8);

impl Note {
    /// Create from a MIDI number, `None` above 127
    pub fn from_midi(number: u8) -> Option<Self> {
        (number <= 127).then_some(Self(number))
    }

    /// MIDI note number
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Canonical sharp-spelled name (e.g. "C4", "A#5")
    pub fn name(&self) -> String {
        let octave = (self.0 / 12) as i32 - 1;
        let note_index = (self.0 % 12) as usize;
        format!("{}{}", NOTE_NAMES[note_index], octave)
    }

    /// Equal-tempered frequency with A4 = 440 Hz
    pub fn frequency(&self) -> f64 {
        440.0 * 2f64.powf((self.0 as f64 - 69.0) / 12.0)
    }

    /// Transpose by semitones, `None` when leaving the MIDI range
    pub fn transpose(&self, semitones: i32) -> Option<Self> {
        let n = self.0 as i32 + semitones;
        u8::try_from(n).ok().and_then(Self::from_midi)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Note {
    type Err = PitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PitchError::Empty);
        }

        // Bare MIDI numbers are accepted as well
        if s.chars().all(|c| c.is_ascii_digit()) {
            return s
                .parse::<u8>()
                .ok()
                .and_then(Note::from_midi)
                .ok_or_else(|| PitchError::OutOfRange(s.to_string()));
        }

        let mut chars = s.chars();
        let letter = chars
            .next()
            .ok_or(PitchError::Empty)?
            .to_ascii_uppercase();
        let semitone: i32 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(PitchError::InvalidName(s.to_string())),
        };

        let rest = chars.as_str();
        let (accidental, octave_str) = match rest.chars().next() {
            Some('#') => (1, &rest[1..]),
            Some('b') => (-1, &rest[1..]),
            _ => (0, rest),
        };

        let octave: i32 = octave_str
            .parse()
            .map_err(|_| PitchError::InvalidName(s.to_string()))?;

        let number = (octave + 1) * 12 + semitone + accidental;
        u8::try_from(number)
            .ok()
            .and_then(Note::from_midi)
            .ok_or_else(|| PitchError::OutOfRange(s.to_string()))
    }
}

/// Pitch of a note event: a note or a rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pitch {
    Note(Note),
    #[default]
    Rest,
}

impl Pitch {
    /// Parse a note name; the empty string is a rest
    pub fn parse(s: &str) -> Result<Self, PitchError> {
        if s.trim().is_empty() {
            return Ok(Pitch::Rest);
        }
        s.parse::<Note>().map(Pitch::Note)
    }

    pub fn note(&self) -> Option<Note> {
        match self {
            Pitch::Note(note) => Some(*note),
            Pitch::Rest => None,
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, Pitch::Rest)
    }

    /// Serialized name ("" for a rest)
    pub fn name(&self) -> String {
        match self {
            Pitch::Note(note) => note.name(),
            Pitch::Rest => String::new(),
        }
    }
}

impl From<Note> for Pitch {
    fn from(note: Note) -> Self {
        Pitch::Note(note)
    }
}

/// Length of a note event
///
/// Either a number of bars or a notation string ("4n", "8n.", "8t", "1m").
/// The original form is kept so that sessions round-trip unchanged.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum NoteLength {
    Bars(f64),
    Notation(String),
}

impl NoteLength {
    /// Resolve to bars under the given time signature
    pub fn to_bars(&self, time_signature: &TimeSignature) -> Result<f64, PitchError> {
        let bars = match self {
            NoteLength::Bars(bars) => *bars,
            NoteLength::Notation(text) => parse_notation(text, time_signature)?,
        };

        if bars.is_finite() && bars > 0.0 {
            Ok(bars)
        } else {
            Err(PitchError::InvalidLength(self.to_string()))
        }
    }
}

impl Default for NoteLength {
    fn default() -> Self {
        NoteLength::Notation("8n".to_string())
    }
}

impl From<f64> for NoteLength {
    fn from(bars: f64) -> Self {
        NoteLength::Bars(bars)
    }
}

impl From<&str> for NoteLength {
    fn from(notation: &str) -> Self {
        NoteLength::Notation(notation.to_string())
    }
}

impl fmt::Display for NoteLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteLength::Bars(bars) => write!(f, "{}", bars),
            NoteLength::Notation(text) => f.write_str(text),
        }
    }
}

fn parse_notation(text: &str, time_signature: &TimeSignature) -> Result<f64, PitchError> {
    let invalid = || PitchError::InvalidLength(text.to_string());
    let text = text.trim();

    if let Ok(bars) = text.parse::<f64>() {
        return Ok(bars);
    }

    let (body, dotted) = match text.strip_suffix('.') {
        Some(body) => (body, true),
        None => (text, false),
    };
    let unit = body.chars().last().ok_or_else(invalid)?;
    let count: f64 = body[..body.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if count <= 0.0 {
        return Err(invalid());
    }

    let quarters_per_bar = time_signature.quarters_per_bar();
    let bars = match unit {
        'm' => count,
        'n' => (4.0 / count) / quarters_per_bar,
        't' => (4.0 / count) * (2.0 / 3.0) / quarters_per_bar,
        _ => return Err(invalid()),
    };

    Ok(if dotted { bars * 1.5 } else { bars })
}

/// A note event inside a timeline
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    /// Identifier, never reused within the owning timeline
    pub id: NoteId,
    pub pitch: Pitch,
    /// Position inside the loop window, in bars
    pub start: f64,
    pub duration: NoteLength,
    /// Velocity in [0, 1]
    pub velocity: f32,
}

impl NoteEvent {
    pub fn new(id: NoteId, fields: NoteFields) -> Self {
        Self {
            id,
            pitch: fields.pitch,
            start: fields.start,
            duration: fields.duration,
            velocity: fields.velocity,
        }
    }

    pub fn fields(&self) -> NoteFields {
        NoteFields {
            pitch: self.pitch,
            start: self.start,
            duration: self.duration.clone(),
            velocity: self.velocity,
        }
    }

    pub(crate) fn apply(&mut self, fields: NoteFields) {
        self.pitch = fields.pitch;
        self.start = fields.start;
        self.duration = fields.duration;
        self.velocity = fields.velocity;
    }
}

/// The editable fields of a note event
#[derive(Debug, Clone, PartialEq)]
pub struct NoteFields {
    pub pitch: Pitch,
    pub start: f64,
    pub duration: NoteLength,
    pub velocity: f32,
}

impl NoteFields {
    pub fn new(pitch: Pitch, start: f64, duration: impl Into<NoteLength>, velocity: f32) -> Self {
        Self {
            pitch,
            start,
            duration: duration.into(),
            velocity,
        }
    }

    /// Check the fields against a loop window of `bars` bars
    ///
    /// Velocity is clamped into [0, 1] rather than rejected.
    pub fn validated(self, bars: u32, time_signature: &TimeSignature) -> Result<Self, InvalidNote> {
        let fields = self.sanitized(time_signature)?;
        if fields.start >= bars as f64 {
            return Err(InvalidNote::OutsideLoop {
                start: fields.start,
                bars,
            });
        }
        Ok(fields)
    }

    /// Same checks as `validated` without the loop window
    ///
    /// Stored events past the loop end are kept silent, not rejected.
    pub fn sanitized(mut self, time_signature: &TimeSignature) -> Result<Self, InvalidNote> {
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(InvalidNote::NegativeStart(self.start));
        }
        self.duration
            .to_bars(time_signature)
            .map_err(InvalidNote::Length)?;
        if !self.velocity.is_finite() {
            return Err(InvalidNote::Velocity(self.velocity));
        }
        self.velocity = self.velocity.clamp(0.0, 1.0);
        Ok(self)
    }
}

/// Reasons a note edit is rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidNote {
    #[error("Note start {0} must be >= 0")]
    NegativeStart(f64),

    #[error("Note start {start} is outside the {bars}-bar loop")]
    OutsideLoop { start: f64, bars: u32 },

    #[error("{0}")]
    Length(PitchError),

    #[error("Invalid velocity {0}")]
    Velocity(f32),
}
