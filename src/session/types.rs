// Serializable session types
// JSON layout with camelCase keys; every field defaults when missing

use crate::sequencer::engine::{DEFAULT_MASTER_VOLUME_DB, DEFAULT_OCTAVE};
use crate::sequencer::note::{NoteId, NoteLength};
use crate::sequencer::time::Tempo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Complete restorable state of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub tempo: f64,
    pub master_volume_db: f64,
    pub octave: i8,
    pub active_channel: u8,
    pub tracks: Vec<TrackState>,
    pub timelines: Vec<TimelineState>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            tempo: Tempo::default().bpm(),
            master_volume_db: DEFAULT_MASTER_VOLUME_DB,
            octave: DEFAULT_OCTAVE,
            active_channel: 0,
            tracks: Vec::new(),
            timelines: Vec::new(),
        }
    }
}

/// A track and the opaque state of its instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackState {
    pub name: String,
    pub channel: u8,
    pub instrument: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimelineState {
    pub channels: Vec<u8>,
    pub events: Vec<EventState>,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub humanize: bool,
    pub bars: u32,
}

impl Default for TimelineState {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            events: Vec::new(),
            looping: true,
            humanize: false,
            bars: 1,
        }
    }
}

/// A note event; `pitch` is a note name or "" for a rest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventState {
    /// Missing ids are assigned on restore
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<NoteId>,
    pub pitch: String,
    pub start: f64,
    pub duration: NoteLength,
    pub velocity: f32,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            id: None,
            pitch: String::new(),
            start: 0.0,
            duration: NoteLength::default(),
            velocity: 1.0,
        }
    }
}

/// A named snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
}

impl Preset {
    pub fn new(name: impl Into<String>, snapshot: SessionSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            saved_at: Some(Utc::now()),
            snapshot,
        }
    }
}

/// What is written to the persistence backend: the session plus user presets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionDocument {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    pub presets: Vec<Preset>,
}
