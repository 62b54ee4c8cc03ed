// Timeline - a looping list of note events on one or more channels
// Start/stop follow the shared-epoch protocol so that every timeline stays
// phase-locked to the first one that started

use super::engine::PlaybackContext;
use super::note::{InvalidNote, Note, NoteEvent, NoteFields, NoteId};
use super::part::{HumanizeSettings, Part};
use super::scheduler::{Task, TaskId, TaskQueue};
use super::time::{nearest_bar, next_bar};
use crate::dispatch::dispatcher::valid_channel;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Identifier of a timeline inside an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimelineId(pub(crate) u64);

impl TimelineId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timeline#{}", self.0)
    }
}

/// How a start request entered the playing state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartMode {
    /// First timeline: epoch snapped to the nearest bar
    Epoch(f64),
    /// Bulk start: aligned on the shared epoch without delay
    Bulk(f64),
    /// Joining: waits for the next bar boundary
    Join(f64),
}

/// A sequence of note events looping over `bars` bars
#[derive(Debug)]
pub struct Timeline {
    id: TimelineId,
    index: usize,
    channels: BTreeSet<u8>,
    events: Vec<NoteEvent>,
    looping: bool,
    humanize: bool,
    bars: u32,
    next_note_id: NoteId,

    playing: bool,
    start_time: Option<f64>,
    part: Option<Part>,
    join_task: Option<TaskId>,
    last_triggered: Option<Note>,
}

impl Timeline {
    /// Create an empty, stopped timeline
    pub fn new(id: TimelineId, index: usize, bars: u32) -> Self {
        Self {
            id,
            index,
            channels: BTreeSet::new(),
            events: Vec::new(),
            looping: true,
            humanize: false,
            bars: bars.max(1),
            next_note_id: 0,
            playing: false,
            start_time: None,
            part: None,
            join_task: None,
            last_triggered: None,
        }
    }

    /// Rebuild a stopped timeline from persisted fields
    ///
    /// Stored ids are kept when unique. Events without one, or repeating an
    /// id already taken, get a fresh id after the highest stored one.
    pub(crate) fn restore(
        id: TimelineId,
        index: usize,
        channels: impl IntoIterator<Item = u8>,
        events: Vec<(Option<NoteId>, NoteFields)>,
        looping: bool,
        humanize: bool,
        bars: u32,
    ) -> Self {
        let mut timeline = Self::new(id, index, bars);
        timeline.channels = channels.into_iter().filter(|c| valid_channel(*c)).collect();
        timeline.next_note_id = events
            .iter()
            .filter_map(|(stored, _)| stored.map(|n| n + 1))
            .max()
            .unwrap_or(0);

        let mut taken = HashSet::with_capacity(events.len());
        for (stored, fields) in events {
            let note_id = match stored {
                Some(n) if taken.insert(n) => n,
                _ => {
                    let fresh = timeline.next_note_id;
                    timeline.next_note_id += 1;
                    taken.insert(fresh);
                    if let Some(n) = stored {
                        log::warn!("{}: duplicate note id {} renumbered to {}", id, n, fresh);
                    }
                    fresh
                }
            };
            timeline.events.push(NoteEvent::new(note_id, fields));
        }
        timeline.looping = looping;
        timeline.humanize = humanize;
        timeline
    }

    pub fn id(&self) -> TimelineId {
        self.id
    }

    /// Display order
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn channels(&self) -> &BTreeSet<u8> {
        &self.channels
    }

    /// Events in insertion order
    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn event(&self, id: NoteId) -> Option<&NoteEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn humanize(&self) -> bool {
        self.humanize
    }

    /// Loop length in bars
    pub fn bars(&self) -> u32 {
        self.bars
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Clock position this timeline started (or will start) at
    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    /// True while a join is waiting for the next bar boundary
    pub fn is_joining(&self) -> bool {
        self.join_task.is_some()
    }

    /// Pitch of the most recent trigger
    pub fn last_triggered(&self) -> Option<Note> {
        self.last_triggered
    }

    /// Epoch the running scheduler is anchored to
    pub fn anchor(&self) -> Option<f64> {
        self.part.as_ref().and_then(Part::anchor)
    }

    /// Start playback
    ///
    /// Returns None when the timeline is already playing (unless a bulk
    /// start is in progress, which always restarts cleanly) or has no
    /// channel to play on.
    pub fn start(&mut self, ctx: &mut PlaybackContext<'_>) -> Option<StartMode> {
        if self.playing && !ctx.sync.bulk_start_in_progress {
            return None;
        }
        if self.channels.is_empty() {
            log::warn!("{} has no channel bound; not starting", self.id);
            return None;
        }

        ctx.clock.start();
        self.discard_scheduler(ctx.tasks);

        let mut part = Part::new(
            &self.events,
            self.bars,
            self.looping,
            self.humanize,
            self.humanize_settings(ctx.humanize),
            *ctx.clock.time_signature(),
        );
        let now = ctx.clock.position();

        let mode = match ctx.sync.shared_epoch {
            None => {
                let epoch = nearest_bar(now);
                ctx.sync.shared_epoch = Some(epoch);
                part.begin(epoch, now.max(epoch));
                StartMode::Epoch(epoch)
            }
            Some(epoch) if ctx.sync.bulk_start_in_progress => {
                part.begin(epoch, now.max(epoch));
                StartMode::Bulk(epoch)
            }
            Some(_) => {
                let at = next_bar(now);
                self.join_task = Some(ctx.tasks.schedule(at, Task::JoinTimeline(self.id)));
                StartMode::Join(at)
            }
        };

        self.start_time = Some(match mode {
            StartMode::Epoch(t) | StartMode::Bulk(t) | StartMode::Join(t) => t,
        });
        self.part = Some(part);
        self.playing = true;
        log::debug!("{} started: {:?}", self.id, mode);
        Some(mode)
    }

    /// Fired by the join waiter on the bar boundary
    pub(crate) fn join(&mut self, ctx: &mut PlaybackContext<'_>, task: TaskId, time: f64) {
        if self.join_task != Some(task) {
            return;
        }
        self.join_task = None;

        // Clearing the epoch also cancels every waiter, so it is set here
        let epoch = *ctx.sync.shared_epoch.get_or_insert(time);
        if let Some(part) = self.part.as_mut() {
            part.begin(epoch, time);
            log::debug!("{} joined at {:.3} (epoch {:.3})", self.id, time, epoch);
        }
    }

    /// Stop playback and release whatever this timeline left sounding
    ///
    /// Returns false when the timeline was not playing.
    pub fn stop(&mut self, ctx: &mut PlaybackContext<'_>) -> bool {
        if !self.playing {
            return false;
        }

        self.discard_scheduler(ctx.tasks);
        let now = ctx.clock.position();
        let last = self.last_triggered.take();
        for &channel in &self.channels {
            if let Some(note) = last {
                ctx.dispatcher.release(note, now, channel);
            }
            ctx.dispatcher.release_channel(channel);
        }

        self.playing = false;
        self.start_time = None;
        log::debug!("{} stopped", self.id);
        true
    }

    /// Add a note; returns its id
    pub fn add_note(
        &mut self,
        ctx: &mut PlaybackContext<'_>,
        fields: NoteFields,
    ) -> Result<NoteId, InvalidNote> {
        let fields = fields.validated(self.bars, ctx.clock.time_signature())?;
        let id = self.next_note_id;
        self.next_note_id += 1;

        let event = NoteEvent::new(id, fields);
        if let Some(part) = self.part.as_mut() {
            part.insert(&event, ctx.clock.position());
        }
        self.events.push(event);
        Ok(id)
    }

    /// Replace the fields of an existing note
    ///
    /// The old pitch is released on every bound channel before the new
    /// occurrence is scheduled.
    pub fn update_note(
        &mut self,
        ctx: &mut PlaybackContext<'_>,
        id: NoteId,
        fields: NoteFields,
    ) -> Result<bool, InvalidNote> {
        let Some(position) = self.events.iter().position(|e| e.id == id) else {
            log::warn!("{}: no note with id {}", self.id, id);
            return Ok(false);
        };
        let fields = fields.validated(self.bars, ctx.clock.time_signature())?;
        let now = ctx.clock.position();

        if let Some(note) = self.events[position].pitch.note() {
            self.release_everywhere(ctx, note, now);
        }
        if let Some(part) = self.part.as_mut() {
            part.remove(id);
        }

        let event = &mut self.events[position];
        event.apply(fields);
        if let Some(part) = self.part.as_mut() {
            part.insert(event, now);
        }
        Ok(true)
    }

    /// Remove a note, releasing its pitch on every bound channel
    pub fn remove_note(&mut self, ctx: &mut PlaybackContext<'_>, id: NoteId) -> bool {
        let Some(position) = self.events.iter().position(|e| e.id == id) else {
            log::warn!("{}: no note with id {}", self.id, id);
            return false;
        };
        let event = self.events.remove(position);
        if let Some(note) = event.pitch.note() {
            let now = ctx.clock.position();
            self.release_everywhere(ctx, note, now);
        }
        if let Some(part) = self.part.as_mut() {
            part.remove(id);
        }
        true
    }

    /// Grow the loop by one bar; returns the new length
    pub fn add_bar(&mut self, ctx: &mut PlaybackContext<'_>) -> u32 {
        self.set_bars(ctx, self.bars.saturating_add(1));
        self.bars
    }

    /// Shrink the loop by one bar (minimum 1)
    ///
    /// Returns the ids of events that now start outside the loop. They are
    /// kept, silent, until the caller removes them.
    pub fn remove_bar(&mut self, ctx: &mut PlaybackContext<'_>) -> Vec<NoteId> {
        self.set_bars(ctx, self.bars.saturating_sub(1).max(1));
        self.orphaned_notes()
    }

    /// Events whose start lies at or beyond the loop length
    pub fn orphaned_notes(&self) -> Vec<NoteId> {
        let bars = self.bars as f64;
        self.events
            .iter()
            .filter(|e| e.start >= bars)
            .map(|e| e.id)
            .collect()
    }

    /// Bind a channel; returns false if invalid or already bound
    pub fn activate_channel(&mut self, channel: u8) -> bool {
        valid_channel(channel) && self.channels.insert(channel)
    }

    /// Unbind a channel
    ///
    /// While playing, every note sounding on that channel is released and
    /// the last bound channel cannot be removed.
    pub fn deactivate_channel(&mut self, ctx: &mut PlaybackContext<'_>, channel: u8) -> bool {
        if !self.channels.contains(&channel) {
            return false;
        }
        if self.playing && self.channels.len() == 1 {
            log::warn!("{}: cannot unbind channel {} while playing", self.id, channel);
            return false;
        }
        self.channels.remove(&channel);

        if self.playing {
            let now = ctx.clock.position();
            if let Some(note) = self.last_triggered {
                ctx.dispatcher.release(note, now, channel);
            }
            ctx.dispatcher.release_channel(channel);
        }
        true
    }

    pub fn set_loop(&mut self, ctx: &mut PlaybackContext<'_>, looping: bool) {
        self.looping = looping;
        if let Some(part) = self.part.as_mut() {
            part.set_looping(looping, ctx.clock.position());
        }
    }

    pub fn set_humanize(&mut self, humanize: bool) {
        self.humanize = humanize;
        if let Some(part) = self.part.as_mut() {
            part.set_humanize(humanize);
        }
    }

    /// Time of the next due trigger of the running scheduler
    pub(crate) fn next_trigger_time(&mut self) -> Option<f64> {
        self.part.as_mut()?.next_time()
    }

    /// Fire the next due trigger on every bound channel
    pub(crate) fn fire_next(&mut self, ctx: &mut PlaybackContext<'_>) {
        let Some(trigger) = self.part.as_mut().and_then(Part::take) else {
            return;
        };
        let Some(note) = trigger.pitch.note() else {
            return;
        };
        if trigger.duration <= 0.0 {
            return;
        }

        for &channel in &self.channels {
            ctx.dispatcher.attack_release(
                note,
                trigger.duration,
                trigger.time,
                channel,
                trigger.velocity,
            );
        }
        self.last_triggered = Some(note);
    }

    fn set_bars(&mut self, ctx: &mut PlaybackContext<'_>, bars: u32) {
        self.bars = bars;
        if let Some(part) = self.part.as_mut() {
            part.set_bars(bars, ctx.clock.position());
        }
    }

    fn release_everywhere(&self, ctx: &mut PlaybackContext<'_>, note: Note, time: f64) {
        for &channel in &self.channels {
            ctx.dispatcher.release(note, time, channel);
        }
    }

    fn discard_scheduler(&mut self, tasks: &mut TaskQueue) {
        self.part = None;
        if let Some(task) = self.join_task.take() {
            tasks.cancel(task);
        }
    }

    fn humanize_settings(&self, base: HumanizeSettings) -> HumanizeSettings {
        HumanizeSettings {
            max_offset: base.max_offset,
            seed: base.seed ^ self.id.0.wrapping_mul(0x9e37_79b9_7f4a_7c15),
        }
    }
}
