// Sequencer module
// Musical time, the global clock, timelines and the engine that drives them

pub mod clock;
pub mod engine;
pub mod note;
pub mod part;
pub mod scheduler;
pub mod time;
pub mod timeline;

pub use clock::{ClockTick, GlobalClock, SharedClockState, Subscription, TickKind, FINE_TICKS_PER_BAR};
pub use engine::{Engine, PlaybackContext, SyncState};
pub use note::{InvalidNote, Note, NoteEvent, NoteFields, NoteId, NoteLength, Pitch, PitchError};
pub use part::{HumanizeSettings, Trigger};
pub use time::{Tempo, TimeSignature};
pub use timeline::{StartMode, Timeline, TimelineId};
