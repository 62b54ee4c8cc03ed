// Conversions between the running engine and serializable snapshots

use super::types::*;
use super::SessionError;
use crate::dispatch::InstrumentFactory;
use crate::sequencer::note::{NoteFields, NoteId, Pitch};
use crate::sequencer::time::TimeSignature;
use crate::sequencer::timeline::Timeline;
use crate::sequencer::Engine;

/// Serialize a session document to JSON bytes
pub fn document_to_bytes(document: &SessionDocument) -> Result<Vec<u8>, SessionError> {
    serde_json::to_vec_pretty(document).map_err(SessionError::from)
}

/// Deserialize a session document from JSON bytes
pub fn document_from_bytes(bytes: &[u8]) -> Result<SessionDocument, SessionError> {
    serde_json::from_slice(bytes).map_err(|e| SessionError::Corrupt(e.to_string()))
}

pub fn snapshot_to_bytes(snapshot: &SessionSnapshot) -> Result<Vec<u8>, SessionError> {
    serde_json::to_vec(snapshot).map_err(SessionError::from)
}

pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<SessionSnapshot, SessionError> {
    serde_json::from_slice(bytes).map_err(|e| SessionError::Corrupt(e.to_string()))
}

/// Snapshot the observable state of an engine
///
/// Live schedulers, join waiters and the clock position are not captured.
pub fn capture(engine: &Engine) -> SessionSnapshot {
    SessionSnapshot {
        tempo: engine.tempo(),
        master_volume_db: engine.master_volume_db(),
        octave: engine.octave(),
        active_channel: engine.active_channel(),
        tracks: engine
            .dispatcher()
            .tracks()
            .iter()
            .map(|track| TrackState {
                name: track.name.clone(),
                channel: track.channel,
                instrument: track.instrument().save_state(),
            })
            .collect(),
        timelines: engine.timelines().iter().map(timeline_state).collect(),
    }
}

fn timeline_state(timeline: &Timeline) -> TimelineState {
    TimelineState {
        channels: timeline.channels().iter().copied().collect(),
        events: timeline
            .events()
            .iter()
            .map(|event| EventState {
                id: Some(event.id),
                pitch: event.pitch.name(),
                start: event.start,
                duration: event.duration.clone(),
                velocity: event.velocity,
            })
            .collect(),
        looping: timeline.is_looping(),
        humanize: timeline.humanize(),
        bars: timeline.bars(),
    }
}

/// Replace the engine's tracks, timelines and settings with `snapshot`
///
/// Everything is stopped first; restored timelines are stopped.
pub fn apply(engine: &mut Engine, snapshot: &SessionSnapshot, factory: &dyn InstrumentFactory) {
    engine.clear();

    if !engine.set_tempo(snapshot.tempo) {
        engine.set_tempo(SessionSnapshot::default().tempo);
    }
    engine.set_master_volume_db(snapshot.master_volume_db);
    engine.set_octave(snapshot.octave);
    engine.set_active_channel(snapshot.active_channel);

    for track in &snapshot.tracks {
        let instrument = factory.create(&track.name, &track.instrument);
        if engine
            .dispatcher_mut()
            .add_track(track.name.clone(), track.channel, instrument)
            .is_none()
        {
            log::warn!("Skipping track '{}' on channel {}", track.name, track.channel);
        }
    }

    for state in &snapshot.timelines {
        let time_signature = *engine.clock().time_signature();
        let events: Vec<(Option<NoteId>, NoteFields)> = state
            .events
            .iter()
            .filter_map(|event| fields_from_state(event, &time_signature))
            .collect();
        engine.insert_timeline(|id, index| {
            Timeline::restore(
                id,
                index,
                state.channels.iter().copied(),
                events,
                state.looping,
                state.humanize,
                state.bars,
            )
        });
    }
}

/// Stored event fields, or None (with a warning) when they cannot play
fn fields_from_state(
    state: &EventState,
    time_signature: &TimeSignature,
) -> Option<(Option<NoteId>, NoteFields)> {
    let label = state.id.map_or_else(|| state.pitch.clone(), |id| id.to_string());
    let pitch = match Pitch::parse(&state.pitch) {
        Ok(pitch) => pitch,
        Err(e) => {
            log::warn!("Dropping stored note {}: {}", label, e);
            return None;
        }
    };
    match NoteFields::new(pitch, state.start, state.duration.clone(), state.velocity)
        .sanitized(time_signature)
    {
        Ok(fields) => Some((state.id, fields)),
        Err(e) => {
            log::warn!("Dropping stored note {}: {}", label, e);
            None
        }
    }
}
