// MyMusic engine - sequencing, note dispatch and session persistence

pub mod config;
pub mod dispatch;
pub mod sequencer;
pub mod session;

// Re-export commonly used types for convenience
pub use config::{ConfigError, EngineConfig};
pub use dispatch::{
    Instrument, InstrumentCall, InstrumentFactory, MonitorInstrument, NoteDispatcher,
    SilentInstrument, Track, TrackId, CHANNEL_COUNT,
};
pub use sequencer::{
    ClockTick, Engine, GlobalClock, Note, NoteEvent, NoteFields, NoteId, NoteLength, Pitch,
    StartMode, Subscription, Tempo, TickKind, TimeSignature, Timeline, TimelineId,
    FINE_TICKS_PER_BAR,
};
pub use session::{
    FileBackend, MemoryBackend, Preset, PresetCatalog, PresetError, SessionBackend,
    SessionError, SessionSnapshot, SessionStore,
};
