// Note dispatch layer
//
// Routes attack/release events from input producers and timelines to every
// instrument bound to a channel, and tracks which notes are currently sounding.
//
// Architecture:
// - Instrument trait: the external synthesis unit (attack, release, release-all)
// - NoteDispatcher: channel fan-out, track registry and the sounding-notes set
// - MonitorInstrument: records calls, used for MIDI monitor views and tests

pub mod dispatcher;
pub mod instrument;

pub use dispatcher::{CHANNEL_COUNT, NoteDispatcher, Track, TrackId};
pub use instrument::{
    Instrument, InstrumentCall, InstrumentFactory, MonitorInstrument, SilentInstrument,
};
