// Engine - owns the clock, the dispatcher and every timeline
// The host drives it by advancing the clock; everything musically timed is
// processed in one ordered pass per advance

use super::clock::{GlobalClock, TickKind};
use super::note::{InvalidNote, NoteFields, NoteId};
use super::part::HumanizeSettings;
use super::scheduler::{Task, TaskId, TaskQueue};
use super::timeline::{StartMode, Timeline, TimelineId};
use crate::config::EngineConfig;
use crate::dispatch::dispatcher::valid_channel;
use crate::dispatch::NoteDispatcher;

pub const DEFAULT_MASTER_VOLUME_DB: f64 = -6.0;
pub const DEFAULT_OCTAVE: i8 = 4;
pub const MIN_OCTAVE: i8 = -1;
pub const MAX_OCTAVE: i8 = 9;

/// Coordination state shared by every timeline
///
/// Only timeline start/stop writes the epoch, only the bulk-start
/// orchestrator writes the bulk flag.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncState {
    pub(crate) shared_epoch: Option<f64>,
    pub(crate) bulk_start_in_progress: bool,
}

impl SyncState {
    /// Clock position agreed as time zero for synchronized timelines
    pub fn shared_epoch(&self) -> Option<f64> {
        self.shared_epoch
    }

    pub fn bulk_start_in_progress(&self) -> bool {
        self.bulk_start_in_progress
    }
}

/// Borrowed engine state handed to timeline operations
pub struct PlaybackContext<'a> {
    pub(crate) clock: &'a mut GlobalClock,
    pub(crate) dispatcher: &'a mut NoteDispatcher,
    pub(crate) sync: &'a mut SyncState,
    pub(crate) tasks: &'a mut TaskQueue,
    pub(crate) humanize: HumanizeSettings,
}

/// Next item to process inside an advance window
///
/// Variant order is the processing order for items due at the same time.
#[derive(Debug, Clone, Copy)]
enum Due {
    Tick(TickKind),
    Task,
    Expiry,
    Trigger(usize),
}

/// The sequencing engine
pub struct Engine {
    clock: GlobalClock,
    dispatcher: NoteDispatcher,
    sync: SyncState,
    tasks: TaskQueue,
    timelines: Vec<Timeline>,
    next_timeline_id: u64,
    humanize: HumanizeSettings,
    config: EngineConfig,

    master_volume_db: f64,
    octave: i8,
    active_channel: u8,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let mut clock = GlobalClock::new(config.sample_rate);
        if !clock.set_tempo(config.tempo) {
            log::warn!("Falling back to default tempo");
        }
        clock.set_time_signature(config.time_signature);

        Self {
            clock,
            dispatcher: NoteDispatcher::new(),
            sync: SyncState::default(),
            tasks: TaskQueue::new(),
            timelines: Vec::new(),
            next_timeline_id: 0,
            humanize: config.humanize(),
            config,
            master_volume_db: DEFAULT_MASTER_VOLUME_DB,
            octave: DEFAULT_OCTAVE,
            active_channel: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &GlobalClock {
        &self.clock
    }

    /// Mutable clock access for subscriptions and tempo changes
    pub fn clock_mut(&mut self) -> &mut GlobalClock {
        &mut self.clock
    }

    pub fn dispatcher(&self) -> &NoteDispatcher {
        &self.dispatcher
    }

    /// Mutable dispatcher access for track management
    pub fn dispatcher_mut(&mut self) -> &mut NoteDispatcher {
        &mut self.dispatcher
    }

    pub fn sync(&self) -> &SyncState {
        &self.sync
    }

    pub fn shared_epoch(&self) -> Option<f64> {
        self.sync.shared_epoch
    }

    pub fn position(&self) -> f64 {
        self.clock.position()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    // ---- Transport ----

    /// Advance the clock by a number of audio frames
    pub fn advance_samples(&mut self, frames: u64) {
        let bars = self.clock.samples_to_bars(frames);
        self.advance(bars);
    }

    /// Advance the clock by `bars`, processing every item due in
    /// `[position, position + bars)` in time order
    pub fn advance(&mut self, bars: f64) {
        if !(bars.is_finite() && bars > 0.0) || !self.clock.is_running() {
            return;
        }
        let to = self.clock.position() + bars;

        while let Some((time, due)) = self.next_due(to) {
            self.clock.advance_to(time);
            match due {
                Due::Tick(kind) => self.clock.fire_tick(kind),
                Due::Task => {
                    if let Some((time, id, task)) = self.tasks.pop_due(to) {
                        self.run_task(id, task, time);
                    }
                }
                Due::Expiry => self.dispatcher.expire_next(),
                Due::Trigger(index) => {
                    let (timeline, mut ctx) = self.split(index);
                    timeline.fire_next(&mut ctx);
                }
            }
        }

        self.clock.advance_to(to);
    }

    /// Start every timeline together on one shared epoch
    pub fn start_all(&mut self) {
        self.sync.shared_epoch = None;
        self.sync.bulk_start_in_progress = true;
        for index in 0..self.timelines.len() {
            let (timeline, mut ctx) = self.split(index);
            timeline.start(&mut ctx);
        }
        self.sync.bulk_start_in_progress = false;
        log::debug!(
            "Bulk start of {} timelines at epoch {:?}",
            self.timelines.len(),
            self.sync.shared_epoch
        );
    }

    /// Stop every timeline; the clock stops with the last one
    pub fn stop_all(&mut self) {
        let mut stopped = false;
        for index in 0..self.timelines.len() {
            let (timeline, mut ctx) = self.split(index);
            stopped |= timeline.stop(&mut ctx);
        }
        if stopped {
            self.reset_transport();
        }
    }

    /// Stop everything and silence every instrument
    pub fn panic(&mut self) {
        for index in 0..self.timelines.len() {
            let (timeline, mut ctx) = self.split(index);
            timeline.stop(&mut ctx);
        }
        self.reset_transport();
        self.dispatcher.release_all();
        log::debug!("Panic: all notes released");
    }

    pub fn is_any_playing(&self) -> bool {
        self.timelines.iter().any(Timeline::is_playing)
    }

    // ---- Timelines ----

    /// Create a stopped timeline bound to the active channel
    pub fn create_timeline(&mut self, bars: u32) -> TimelineId {
        let id = self.allocate_timeline_id();
        let mut timeline = Timeline::new(id, self.timelines.len(), bars);
        timeline.activate_channel(self.active_channel);
        self.timelines.push(timeline);
        id
    }

    pub(crate) fn insert_timeline(
        &mut self,
        build: impl FnOnce(TimelineId, usize) -> Timeline,
    ) -> TimelineId {
        let id = self.allocate_timeline_id();
        let timeline = build(id, self.timelines.len());
        self.timelines.push(timeline);
        id
    }

    /// Stop and discard a timeline
    pub fn remove_timeline(&mut self, id: TimelineId) -> bool {
        let Some(index) = self.timeline_index(id) else {
            log::warn!("Unknown {}", id);
            return false;
        };
        let (timeline, mut ctx) = self.split(index);
        let was_playing = timeline.stop(&mut ctx);
        self.timelines.remove(index);
        for (index, timeline) in self.timelines.iter_mut().enumerate() {
            timeline.set_index(index);
        }
        if was_playing && !self.is_any_playing() {
            self.reset_transport();
        }
        true
    }

    /// Timelines in display order
    pub fn timelines(&self) -> &[Timeline] {
        &self.timelines
    }

    pub fn timeline(&self, id: TimelineId) -> Option<&Timeline> {
        self.timelines.iter().find(|t| t.id() == id)
    }

    pub fn start_timeline(&mut self, id: TimelineId) -> Option<StartMode> {
        self.with_timeline(id, |timeline, ctx| timeline.start(ctx))
            .flatten()
    }

    /// Stop one timeline; resets the epoch and the clock when it was the last
    pub fn stop_timeline(&mut self, id: TimelineId) -> bool {
        let stopped = self
            .with_timeline(id, |timeline, ctx| timeline.stop(ctx))
            .unwrap_or(false);
        if stopped && !self.is_any_playing() {
            self.reset_transport();
        }
        stopped
    }

    pub fn add_note(&mut self, id: TimelineId, fields: NoteFields) -> Option<NoteId> {
        self.with_timeline(id, |timeline, ctx| timeline.add_note(ctx, fields))
            .and_then(|result| warn_invalid(id, result))
    }

    pub fn update_note(&mut self, id: TimelineId, note: NoteId, fields: NoteFields) -> bool {
        self.with_timeline(id, |timeline, ctx| timeline.update_note(ctx, note, fields))
            .and_then(|result| warn_invalid(id, result))
            .unwrap_or(false)
    }

    pub fn remove_note(&mut self, id: TimelineId, note: NoteId) -> bool {
        self.with_timeline(id, |timeline, ctx| timeline.remove_note(ctx, note))
            .unwrap_or(false)
    }

    pub fn add_bar(&mut self, id: TimelineId) -> Option<u32> {
        self.with_timeline(id, |timeline, ctx| timeline.add_bar(ctx))
    }

    /// Shrink a timeline; returns the orphaned note ids
    pub fn remove_bar(&mut self, id: TimelineId) -> Option<Vec<NoteId>> {
        self.with_timeline(id, |timeline, ctx| timeline.remove_bar(ctx))
    }

    pub fn activate_channel(&mut self, id: TimelineId, channel: u8) -> bool {
        self.with_timeline(id, |timeline, _| timeline.activate_channel(channel))
            .unwrap_or(false)
    }

    pub fn deactivate_channel(&mut self, id: TimelineId, channel: u8) -> bool {
        self.with_timeline(id, |timeline, ctx| timeline.deactivate_channel(ctx, channel))
            .unwrap_or(false)
    }

    pub fn set_loop(&mut self, id: TimelineId, looping: bool) -> bool {
        self.with_timeline(id, |timeline, ctx| timeline.set_loop(ctx, looping))
            .is_some()
    }

    pub fn set_humanize(&mut self, id: TimelineId, humanize: bool) -> bool {
        self.with_timeline(id, |timeline, _| timeline.set_humanize(humanize))
            .is_some()
    }

    /// Stop and drop every timeline and track
    pub(crate) fn clear(&mut self) {
        self.panic();
        self.timelines.clear();
        self.dispatcher.clear_tracks();
    }

    // ---- Live input ----

    pub fn trigger_attack(&mut self, note: &str, time: f64, channel: u8, velocity: f32) -> bool {
        self.dispatcher
            .trigger_attack(&mut self.clock, note, time, channel, velocity)
    }

    pub fn trigger_attack_release(
        &mut self,
        note: &str,
        duration: f64,
        time: f64,
        channel: u8,
        velocity: f32,
    ) -> bool {
        self.dispatcher
            .trigger_attack_release(&mut self.clock, note, duration, time, channel, velocity)
    }

    pub fn trigger_release(&mut self, note: &str, time: f64, channel: u8) -> bool {
        self.dispatcher.trigger_release(note, time, channel)
    }

    // ---- Session settings ----

    pub fn tempo(&self) -> f64 {
        self.clock.tempo().bpm()
    }

    pub fn set_tempo(&mut self, bpm: f64) -> bool {
        self.clock.set_tempo(bpm)
    }

    pub fn master_volume_db(&self) -> f64 {
        self.master_volume_db
    }

    pub fn set_master_volume_db(&mut self, db: f64) -> bool {
        if !db.is_finite() {
            log::warn!("Ignoring master volume {} dB", db);
            return false;
        }
        self.master_volume_db = db;
        true
    }

    pub fn octave(&self) -> i8 {
        self.octave
    }

    pub fn set_octave(&mut self, octave: i8) -> bool {
        if !(MIN_OCTAVE..=MAX_OCTAVE).contains(&octave) {
            log::warn!("Ignoring octave {}", octave);
            return false;
        }
        self.octave = octave;
        true
    }

    /// Channel that live input and new timelines are bound to
    pub fn active_channel(&self) -> u8 {
        self.active_channel
    }

    pub fn set_active_channel(&mut self, channel: u8) -> bool {
        if !valid_channel(channel) {
            return false;
        }
        self.active_channel = channel;
        true
    }

    // ---- Internals ----

    /// Last stop: forget the epoch, halt the clock and every pending callback
    fn reset_transport(&mut self) {
        self.sync.shared_epoch = None;
        self.tasks.clear();
        self.clock.stop();
        self.dispatcher.flush_expiries();
    }

    fn allocate_timeline_id(&mut self) -> TimelineId {
        let id = TimelineId(self.next_timeline_id);
        self.next_timeline_id += 1;
        id
    }

    fn timeline_index(&self, id: TimelineId) -> Option<usize> {
        self.timelines.iter().position(|t| t.id() == id)
    }

    fn with_timeline<R>(
        &mut self,
        id: TimelineId,
        f: impl FnOnce(&mut Timeline, &mut PlaybackContext<'_>) -> R,
    ) -> Option<R> {
        let Some(index) = self.timeline_index(id) else {
            log::warn!("Unknown {}", id);
            return None;
        };
        let (timeline, mut ctx) = self.split(index);
        Some(f(timeline, &mut ctx))
    }

    fn split(&mut self, index: usize) -> (&mut Timeline, PlaybackContext<'_>) {
        let ctx = PlaybackContext {
            clock: &mut self.clock,
            dispatcher: &mut self.dispatcher,
            sync: &mut self.sync,
            tasks: &mut self.tasks,
            humanize: self.humanize,
        };
        (&mut self.timelines[index], ctx)
    }

    fn run_task(&mut self, id: TaskId, task: Task, time: f64) {
        match task {
            Task::JoinTimeline(timeline_id) => {
                if let Some(index) = self.timeline_index(timeline_id) {
                    let (timeline, mut ctx) = self.split(index);
                    timeline.join(&mut ctx, id, time);
                }
            }
        }
    }

    /// Earliest item due before `to`; ties resolve in `Due` order
    fn next_due(&mut self, to: f64) -> Option<(f64, Due)> {
        let mut best: Option<(f64, Due)> = None;
        let mut consider = |time: Option<f64>, due: Due| {
            if let Some(time) = time {
                if time < to && best.map_or(true, |(t, _)| time < t) {
                    best = Some((time, due));
                }
            }
        };

        if let Some((time, kind)) = self.clock.next_tick() {
            consider(Some(time), Due::Tick(kind));
        }
        consider(self.tasks.next_time(), Due::Task);
        consider(self.dispatcher.next_expiry(), Due::Expiry);
        for (index, timeline) in self.timelines.iter_mut().enumerate() {
            consider(timeline.next_trigger_time(), Due::Trigger(index));
        }

        best
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn warn_invalid<T>(id: TimelineId, result: Result<T, InvalidNote>) -> Option<T> {
    result
        .map_err(|e| log::warn!("{}: rejected note ({})", id, e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MonitorInstrument;
    use crate::sequencer::note::Pitch;

    fn engine_with_monitor() -> (Engine, MonitorInstrument) {
        let mut engine = Engine::default();
        let monitor = MonitorInstrument::new();
        engine
            .dispatcher_mut()
            .add_track("Lead", 0, Box::new(monitor.clone()))
            .unwrap();
        (engine, monitor)
    }

    fn note(pitch: &str, start: f64, duration: f64) -> NoteFields {
        NoteFields::new(Pitch::parse(pitch).unwrap(), start, duration, 1.0)
    }

    #[test]
    fn test_first_start_snaps_to_nearest_bar() {
        let mut engine = Engine::default();
        let a = engine.create_timeline(1);
        let b = engine.create_timeline(1);

        // Clock running via live input, 2.3 bars in
        engine.trigger_attack("C4", 0.0, 0, 1.0);
        engine.advance(2.3);
        assert_eq!(engine.start_timeline(a), Some(StartMode::Epoch(2.0)));
        assert_eq!(engine.shared_epoch(), Some(2.0));

        engine.stop_timeline(a);
        engine.trigger_attack("C4", 0.0, 0, 1.0);
        engine.advance(2.6);
        assert_eq!(engine.start_timeline(b), Some(StartMode::Epoch(3.0)));
        assert_eq!(engine.timeline(b).unwrap().start_time(), Some(3.0));
    }

    #[test]
    fn test_join_waits_for_next_bar() {
        let mut engine = Engine::default();
        let a = engine.create_timeline(1);
        let b = engine.create_timeline(1);

        engine.start_timeline(a);
        engine.advance(1.25);
        assert_eq!(engine.start_timeline(b), Some(StartMode::Join(2.0)));
        assert!(engine.timeline(b).unwrap().is_joining());
        assert_eq!(engine.pending_tasks(), 1);

        engine.advance(0.75);
        // Boundary is exclusive: the waiter fires on the next advance
        assert!(engine.timeline(b).unwrap().is_joining());
        engine.advance(0.01);
        let b = engine.timeline(b).unwrap();
        assert!(!b.is_joining());
        assert_eq!(b.anchor(), Some(0.0));
    }

    #[test]
    fn test_redundant_start_and_stop_are_noops() {
        let mut engine = Engine::default();
        let a = engine.create_timeline(1);
        assert!(!engine.stop_timeline(a));
        assert!(engine.start_timeline(a).is_some());
        assert!(engine.start_timeline(a).is_none());
        assert!(engine.stop_timeline(a));
        assert!(!engine.stop_timeline(a));
    }

    #[test]
    fn test_stop_of_non_last_keeps_clock() {
        let mut engine = Engine::default();
        let a = engine.create_timeline(1);
        let b = engine.create_timeline(1);
        engine.start_all();
        engine.advance(1.5);

        engine.stop_timeline(a);
        assert_eq!(engine.shared_epoch(), Some(0.0));
        assert!(engine.clock().is_running());
        assert_eq!(engine.position(), 1.5);

        engine.stop_timeline(b);
        assert_eq!(engine.shared_epoch(), None);
        assert!(!engine.clock().is_running());
        assert_eq!(engine.position(), 0.0);
    }

    #[test]
    fn test_stop_cancels_join_waiter() {
        let mut engine = Engine::default();
        let a = engine.create_timeline(1);
        let b = engine.create_timeline(1);
        engine.start_timeline(a);
        engine.advance(0.5);
        engine.start_timeline(b);
        assert!(engine.stop_timeline(b));
        assert_eq!(engine.pending_tasks(), 0);
        engine.advance(1.0);
        assert!(engine.timeline(b).unwrap().anchor().is_none());
    }

    #[test]
    fn test_triggers_reach_bound_channel() {
        let (mut engine, monitor) = engine_with_monitor();
        let a = engine.create_timeline(1);
        engine.add_note(a, note("E4", 0.5, 0.25)).unwrap();
        engine.start_timeline(a);
        engine.advance(2.0);

        assert_eq!(
            monitor.attack_releases(),
            vec![("E4".to_string(), 0.25, 0.5), ("E4".to_string(), 0.25, 1.5)]
        );
    }

    #[test]
    fn test_rejected_and_unknown_edits() {
        let mut engine = Engine::default();
        let a = engine.create_timeline(1);
        assert!(engine.add_note(a, note("C4", 1.5, 0.25)).is_none());
        assert!(engine.add_note(a, note("C4", -0.1, 0.25)).is_none());
        assert!(!engine.remove_note(a, 42));
        assert!(!engine.update_note(a, 42, note("C4", 0.0, 0.25)));

        let missing = TimelineId(99);
        assert!(engine.add_note(missing, note("C4", 0.0, 0.25)).is_none());
        assert!(!engine.remove_timeline(missing));
    }

    #[test]
    fn test_settings_validation() {
        let mut engine = Engine::default();
        assert!(!engine.set_tempo(5.0));
        assert!(engine.set_tempo(90.0));
        assert_eq!(engine.tempo(), 90.0);
        assert!(!engine.set_octave(12));
        assert!(engine.set_octave(2));
        assert!(!engine.set_active_channel(16));
        assert!(engine.set_active_channel(3));
        assert!(!engine.set_master_volume_db(f64::NAN));

        let id = engine.create_timeline(1);
        assert!(engine.timeline(id).unwrap().channels().contains(&3));
    }

    #[test]
    fn test_panic_releases_everything() {
        let (mut engine, monitor) = engine_with_monitor();
        let a = engine.create_timeline(1);
        engine.add_note(a, note("C4", 0.0, 4.0)).unwrap();
        engine.start_timeline(a);
        engine.advance(0.5);
        assert_eq!(engine.dispatcher().sounding_notes().count(), 1);

        engine.panic();
        assert_eq!(engine.dispatcher().sounding_notes().count(), 0);
        assert!(!engine.clock().is_running());
        assert!(!engine.timeline(a).unwrap().is_playing());
        assert_eq!(
            monitor.calls().last(),
            Some(&crate::dispatch::InstrumentCall::ReleaseAll)
        );
    }

    #[test]
    fn test_advance_samples_uses_tempo() {
        let mut engine = Engine::default();
        let a = engine.create_timeline(1);
        engine.start_timeline(a);
        // 120 BPM in 4/4 at 48 kHz: one bar is 2 seconds
        engine.advance_samples(48_000);
        assert!((engine.position() - 0.5).abs() < 1e-9);
    }
}
