// Instrument trait - the boundary to the synthesis graph
// Instruments are owned by tracks and receive times as clock positions in bars

use crate::sequencer::note::Note;
use std::sync::{Arc, Mutex};

/// A channel-bound sound source
///
/// Implementations live outside the engine (synth voices, samplers, plugin
/// hosts). Calls arrive on the clock's thread and must not block.
pub trait Instrument: Send {
    /// Start a note at clock position `time`
    fn trigger_attack(&mut self, note: Note, time: f64, velocity: f32);

    /// Start a note and release it `duration` bars later
    fn trigger_attack_release(&mut self, note: Note, duration: f64, time: f64, velocity: f32);

    /// Release a held note
    fn trigger_release(&mut self, note: Note, time: f64);

    /// Release every held note
    fn release_all(&mut self);

    /// Opaque state persisted with the owning track
    ///
    /// Default implementation has nothing to persist.
    fn save_state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Rebuilds instruments when a session is restored
pub trait InstrumentFactory: Send {
    /// Create the instrument for a track from its persisted state
    fn create(&self, track_name: &str, state: &serde_json::Value) -> Box<dyn Instrument>;
}

impl<F> InstrumentFactory for F
where
    F: Fn(&str, &serde_json::Value) -> Box<dyn Instrument> + Send,
{
    fn create(&self, track_name: &str, state: &serde_json::Value) -> Box<dyn Instrument> {
        self(track_name, state)
    }
}

/// Instrument that ignores every call
#[derive(Debug, Default, Clone)]
pub struct SilentInstrument {
    state: serde_json::Value,
}

impl SilentInstrument {
    /// Keeps `state` so that it survives save/restore untouched
    pub fn with_state(state: serde_json::Value) -> Self {
        Self { state }
    }
}

impl Instrument for SilentInstrument {
    fn trigger_attack(&mut self, _note: Note, _time: f64, _velocity: f32) {}

    fn trigger_attack_release(&mut self, _note: Note, _duration: f64, _time: f64, _velocity: f32) {
    }

    fn trigger_release(&mut self, _note: Note, _time: f64) {}

    fn release_all(&mut self) {}

    fn save_state(&self) -> serde_json::Value {
        self.state.clone()
    }
}

/// A call received by an instrument
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentCall {
    Attack {
        note: Note,
        time: f64,
        velocity: f32,
    },
    AttackRelease {
        note: Note,
        duration: f64,
        time: f64,
        velocity: f32,
    },
    Release {
        note: Note,
        time: f64,
    },
    ReleaseAll,
}

/// Instrument that records every call it receives
///
/// Clones share the same log, so a clone can be handed to a track while the
/// original is kept for inspection.
#[derive(Debug, Default, Clone)]
pub struct MonitorInstrument {
    calls: Arc<Mutex<Vec<InstrumentCall>>>,
    state: serde_json::Value,
}

impl MonitorInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: serde_json::Value) -> Self {
        Self {
            calls: Arc::default(),
            state,
        }
    }

    /// Snapshot of the recorded calls
    pub fn calls(&self) -> Vec<InstrumentCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Recorded attack-release calls as (note name, duration, time)
    pub fn attack_releases(&self) -> Vec<(String, f64, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                InstrumentCall::AttackRelease {
                    note,
                    duration,
                    time,
                    ..
                } => Some((note.name(), duration, time)),
                _ => None,
            })
            .collect()
    }

    /// Recorded release calls as (note name, time)
    pub fn releases(&self) -> Vec<(String, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                InstrumentCall::Release { note, time } => Some((note.name(), time)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: InstrumentCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Instrument for MonitorInstrument {
    fn trigger_attack(&mut self, note: Note, time: f64, velocity: f32) {
        self.record(InstrumentCall::Attack {
            note,
            time,
            velocity,
        });
    }

    fn trigger_attack_release(&mut self, note: Note, duration: f64, time: f64, velocity: f32) {
        self.record(InstrumentCall::AttackRelease {
            note,
            duration,
            time,
            velocity,
        });
    }

    fn trigger_release(&mut self, note: Note, time: f64) {
        self.record(InstrumentCall::Release { note, time });
    }

    fn release_all(&mut self) {
        self.record(InstrumentCall::ReleaseAll);
    }

    fn save_state(&self) -> serde_json::Value {
        self.state.clone()
    }
}
