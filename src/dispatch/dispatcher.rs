// NoteDispatcher - fans note events out to every instrument on a channel
// Owns the global set of sounding notes (single writer)

use super::instrument::Instrument;
use crate::sequencer::clock::GlobalClock;
use crate::sequencer::note::Note;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Number of routing channels (0..=15)
pub const CHANNEL_COUNT: u8 = 16;

/// Unique identifier for tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub(crate) u64);

impl TrackId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// An instrument bound to a channel
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub channel: u8,
    instrument: Box<dyn Instrument>,
}

impl Track {
    pub fn instrument(&self) -> &dyn Instrument {
        self.instrument.as_ref()
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Pending removal of an attack-release note from the sounding set
#[derive(Debug, Clone, Copy)]
struct Expiry {
    time: f64,
    note: Note,
}

/// Channel-based note fan-out
#[derive(Default)]
pub struct NoteDispatcher {
    tracks: Vec<Track>,
    next_track_id: u64,
    /// Sounding notes with the number of attacks holding each one
    sounding: BTreeMap<Note, u32>,
    /// Sorted by time
    expiries: Vec<Expiry>,
}

/// Check a channel number, logging a warning when out of range
pub(crate) fn valid_channel(channel: u8) -> bool {
    if channel < CHANNEL_COUNT {
        true
    } else {
        log::warn!("Channel {} out of range (0-{})", channel, CHANNEL_COUNT - 1);
        false
    }
}

fn resolve(note: &str) -> Option<Note> {
    match note.parse::<Note>() {
        Ok(note) => Some(note),
        Err(e) => {
            log::warn!("Ignoring note event: {}", e);
            None
        }
    }
}

impl NoteDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument on a channel
    pub fn add_track(
        &mut self,
        name: impl Into<String>,
        channel: u8,
        instrument: Box<dyn Instrument>,
    ) -> Option<TrackId> {
        if !valid_channel(channel) {
            return None;
        }
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;
        self.tracks.push(Track {
            id,
            name: name.into(),
            channel,
            instrument,
        });
        Some(id)
    }

    /// Remove a track, releasing anything its instrument holds
    pub fn remove_track(&mut self, id: TrackId) -> bool {
        let Some(index) = self.tracks.iter().position(|t| t.id == id) else {
            log::warn!("Track {:?} not found", id);
            return false;
        };
        let mut track = self.tracks.remove(index);
        guarded(&track.name, || track.instrument.release_all());
        true
    }

    /// Move a track to another channel
    pub fn set_track_channel(&mut self, id: TrackId, channel: u8) -> bool {
        if !valid_channel(channel) {
            return false;
        }
        match self.tracks.iter_mut().find(|t| t.id == id) {
            Some(track) => {
                guarded(&track.name, || track.instrument.release_all());
                track.channel = channel;
                true
            }
            None => {
                log::warn!("Track {:?} not found", id);
                false
            }
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Drop every track (session teardown)
    pub fn clear_tracks(&mut self) {
        for track in self.tracks.iter_mut() {
            guarded(&track.name, || track.instrument.release_all());
        }
        self.tracks.clear();
    }

    /// Attack `note` on every instrument bound to `channel`
    ///
    /// Starts the clock if it is not running yet: an attack wakes the engine.
    pub fn trigger_attack(
        &mut self,
        clock: &mut GlobalClock,
        note: &str,
        time: f64,
        channel: u8,
        velocity: f32,
    ) -> bool {
        let Some(note) = resolve(note) else {
            return false;
        };
        if !valid_channel(channel) {
            return false;
        }
        clock.start();

        let velocity = velocity.clamp(0.0, 1.0);
        *self.sounding.entry(note).or_insert(0) += 1;
        self.for_channel(channel, |instrument| {
            instrument.trigger_attack(note, time, velocity)
        });
        true
    }

    /// Attack `note` and release it `duration` bars after `time`
    pub fn trigger_attack_release(
        &mut self,
        clock: &mut GlobalClock,
        note: &str,
        duration: f64,
        time: f64,
        channel: u8,
        velocity: f32,
    ) -> bool {
        let Some(note) = resolve(note) else {
            return false;
        };
        if !valid_channel(channel) {
            return false;
        }
        if !(duration.is_finite() && duration > 0.0) {
            log::warn!("Ignoring attack-release of {} with duration {}", note, duration);
            return false;
        }
        clock.start();
        self.attack_release(note, duration, time, channel, velocity);
        true
    }

    /// Release `note` on every instrument bound to `channel`
    pub fn trigger_release(&mut self, note: &str, time: f64, channel: u8) -> bool {
        let Some(note) = resolve(note) else {
            return false;
        };
        if !valid_channel(channel) {
            return false;
        }
        self.release(note, time, channel);
        true
    }

    /// Release every instrument on every channel and clear the sounding set
    pub fn release_all(&mut self) {
        for track in self.tracks.iter_mut() {
            guarded(&track.name, || track.instrument.release_all());
        }
        self.sounding.clear();
        self.expiries.clear();
    }

    /// Ask every instrument bound to `channel` to release all held notes
    pub fn release_channel(&mut self, channel: u8) {
        self.for_channel(channel, |instrument| instrument.release_all());
    }

    /// Notes currently sounding (read-only view for UI consumers)
    pub fn sounding_notes(&self) -> impl Iterator<Item = Note> + '_ {
        self.sounding.keys().copied()
    }

    pub fn is_sounding(&self, note: Note) -> bool {
        self.sounding.contains_key(&note)
    }

    pub(crate) fn attack_release(
        &mut self,
        note: Note,
        duration: f64,
        time: f64,
        channel: u8,
        velocity: f32,
    ) {
        let velocity = velocity.clamp(0.0, 1.0);
        *self.sounding.entry(note).or_insert(0) += 1;

        let expiry = Expiry {
            time: time + duration,
            note,
        };
        let index = self.expiries.partition_point(|e| e.time <= expiry.time);
        self.expiries.insert(index, expiry);

        self.for_channel(channel, |instrument| {
            instrument.trigger_attack_release(note, duration, time, velocity)
        });
    }

    /// Release `note`; every hold on it ends, including pending expiries
    pub(crate) fn release(&mut self, note: Note, time: f64, channel: u8) {
        self.sounding.remove(&note);
        self.expiries.retain(|e| e.note != note);
        self.for_channel(channel, |instrument| instrument.trigger_release(note, time));
    }

    /// Time of the earliest scheduled sounding-set removal
    pub(crate) fn next_expiry(&self) -> Option<f64> {
        self.expiries.first().map(|e| e.time)
    }

    /// Apply the earliest scheduled removal
    pub(crate) fn expire_next(&mut self) {
        if self.expiries.is_empty() {
            return;
        }
        let expiry = self.expiries.remove(0);
        self.unhold(expiry.note);
    }

    /// Drop every scheduled removal, un-lighting the notes it covered
    pub(crate) fn flush_expiries(&mut self) {
        for expiry in std::mem::take(&mut self.expiries) {
            self.unhold(expiry.note);
        }
    }

    fn unhold(&mut self, note: Note) {
        if let Some(count) = self.sounding.get_mut(&note) {
            *count -= 1;
            if *count == 0 {
                self.sounding.remove(&note);
            }
        }
    }

    fn for_channel(&mut self, channel: u8, mut f: impl FnMut(&mut dyn Instrument)) {
        for track in self.tracks.iter_mut().filter(|t| t.channel == channel) {
            guarded(&track.name, || f(track.instrument.as_mut()));
        }
    }
}

/// Run an instrument call, containing any panic to that call
fn guarded(track_name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::error!("Instrument on track '{}' panicked; event dropped", track_name);
    }
}
