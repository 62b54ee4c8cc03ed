// Part - the internal scheduler of one timeline
// Turns the timeline's note events into triggers on the global clock,
// anchored to an epoch so that every part shares the same phase

use super::note::{NoteEvent, NoteId, Pitch};
use super::time::{BAR_EPSILON, TimeSignature};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Humanize settings shared by every part of an engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumanizeSettings {
    /// Upper bound of the per-trigger delay, in bars
    pub max_offset: f64,
    pub seed: u64,
}

impl Default for HumanizeSettings {
    fn default() -> Self {
        Self {
            max_offset: 1.0 / 256.0,
            seed: 0x6d79_6d75_7369_63,
        }
    }
}

/// A note occurrence due on the clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    /// Clock position in bars
    pub time: f64,
    pub event_id: NoteId,
    pub pitch: Pitch,
    /// Resolved length in bars
    pub duration: f64,
    pub velocity: f32,
}

#[derive(Debug, Clone)]
struct PartEvent {
    id: NoteId,
    pitch: Pitch,
    start: f64,
    duration: f64,
    velocity: f32,
}

impl PartEvent {
    fn from_note(event: &NoteEvent, time_signature: &TimeSignature) -> Option<Self> {
        let duration = event.duration.to_bars(time_signature).ok()?;
        Some(Self {
            id: event.id,
            pitch: event.pitch,
            start: event.start,
            duration,
            velocity: event.velocity,
        })
    }
}

/// Internal scheduler seeded from a timeline
///
/// Occurrences are generated lazily, one at a time, in non-decreasing time
/// order. Events whose start lies outside the loop window are kept but never
/// triggered.
#[derive(Debug)]
pub struct Part {
    /// Sorted by (start, id)
    events: Vec<PartEvent>,
    bars: u32,
    looping: bool,
    humanize: bool,
    max_jitter: f64,
    rng: StdRng,
    time_signature: TimeSignature,

    /// Epoch the part's phase is anchored to (None until it begins)
    anchor: Option<f64>,
    cycle: u64,
    index: usize,
    pending_jitter: Option<f64>,
    last_time: f64,
}

impl Part {
    pub fn new(
        events: &[NoteEvent],
        bars: u32,
        looping: bool,
        humanize: bool,
        settings: HumanizeSettings,
        time_signature: TimeSignature,
    ) -> Self {
        let mut part = Self {
            events: Vec::with_capacity(events.len()),
            bars: bars.max(1),
            looping,
            humanize,
            max_jitter: settings.max_offset.max(0.0),
            rng: StdRng::seed_from_u64(settings.seed),
            time_signature,
            anchor: None,
            cycle: 0,
            index: 0,
            pending_jitter: None,
            last_time: f64::NEG_INFINITY,
        };
        for event in events {
            if let Some(event) = PartEvent::from_note(event, &time_signature) {
                let index = part.sorted_position(&event);
                part.events.insert(index, event);
            }
        }
        part
    }

    /// Start producing occurrences with phase anchored at `anchor`
    ///
    /// Occurrences before `from` are skipped.
    pub fn begin(&mut self, anchor: f64, from: f64) {
        self.anchor = Some(anchor);
        self.last_time = f64::NEG_INFINITY;
        self.seek(from);
    }

    pub fn is_active(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn anchor(&self) -> Option<f64> {
        self.anchor
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time of the next occurrence, without consuming it
    pub fn next_time(&mut self) -> Option<f64> {
        let anchor = self.anchor?;
        let (cycle, index) = self.cursor()?;
        let base = anchor + cycle as f64 * self.bars as f64 + self.events[index].start;
        let jitter = match self.pending_jitter {
            Some(jitter) => jitter,
            None => {
                let jitter = if self.humanize && self.max_jitter > 0.0 {
                    self.rng.gen_range(0.0..self.max_jitter)
                } else {
                    0.0
                };
                self.pending_jitter = Some(jitter);
                jitter
            }
        };

        Some((base + jitter).max(self.last_time))
    }

    /// Consume the next occurrence
    pub fn take(&mut self) -> Option<Trigger> {
        let time = self.next_time()?;
        let (cycle, index) = self.cursor()?;
        let event = &self.events[index];
        let trigger = Trigger {
            time,
            event_id: event.id,
            pitch: event.pitch,
            duration: event.duration,
            velocity: event.velocity,
        };

        self.cycle = cycle;
        self.index = index + 1;
        self.pending_jitter = None;
        self.last_time = time;
        Some(trigger)
    }

    /// Insert an event live; `now` is the current clock position
    ///
    /// The cursor never moves back onto an occurrence that lies before both
    /// `now` and the pending occurrence.
    pub fn insert(&mut self, event: &NoteEvent, now: f64) {
        let Some(event) = PartEvent::from_note(event, &self.time_signature) else {
            return;
        };
        let from = self.cursor_base().map_or(now, |base| base.min(now));
        let position = self.sorted_position(&event);
        self.events.insert(position, event);
        if position < self.index {
            self.index += 1;
        }
        self.pending_jitter = None;

        if self.anchor.is_none() {
            return;
        }
        let mut target = self.locate(from);
        if !self.looping && target.0 > self.cycle {
            // One-shot pass already over
            target = (self.cycle, self.events.len());
        }
        let (cycle, index) = self.normalized().max(target);
        self.cycle = cycle;
        self.index = index;
    }

    /// Remove an event live
    pub fn remove(&mut self, id: NoteId) -> bool {
        let Some(position) = self.events.iter().position(|e| e.id == id) else {
            return false;
        };
        self.events.remove(position);
        if position < self.index {
            self.index -= 1;
        } else if position == self.index {
            self.pending_jitter = None;
        }
        true
    }

    /// Change the loop length, keeping the phase
    pub fn set_bars(&mut self, bars: u32, now: f64) {
        self.bars = bars.max(1);
        if self.anchor.is_some() {
            self.seek(now);
        }
    }

    pub fn set_looping(&mut self, looping: bool, now: f64) {
        self.looping = looping;
        if self.anchor.is_some() {
            self.seek(now);
        }
    }

    pub fn set_humanize(&mut self, humanize: bool) {
        self.humanize = humanize;
        self.pending_jitter = None;
    }

    /// Position the cursor on the first occurrence at or after `from`
    fn seek(&mut self, from: f64) {
        if self.anchor.is_none() {
            return;
        }
        let (cycle, index) = self.locate(from);
        self.cycle = cycle;
        self.index = index;
        self.pending_jitter = None;
    }

    /// (cycle, index) of the first occurrence at or after `from`
    fn locate(&self, from: f64) -> (u64, usize) {
        let anchor = self.anchor.unwrap_or(0.0);
        let bars = self.bars as f64;
        let offset = (from - anchor).max(0.0);
        let cycle = (offset / bars + BAR_EPSILON).floor().max(0.0);
        let within = (offset - cycle * bars).max(0.0);
        let index = self
            .events
            .partition_point(|e| e.start < within - BAR_EPSILON);

        let cycle = cycle as u64;
        if self.looping && index >= self.playable_len() {
            (cycle + 1, 0)
        } else {
            (cycle, index)
        }
    }

    /// Cursor with an exhausted looping cycle expressed as the next cycle
    fn normalized(&self) -> (u64, usize) {
        if self.looping && self.index >= self.playable_len() {
            (self.cycle + 1, 0)
        } else {
            (self.cycle, self.index)
        }
    }

    /// Grid time of the pending occurrence
    fn cursor_base(&self) -> Option<f64> {
        let anchor = self.anchor?;
        let (cycle, index) = self.cursor()?;
        Some(anchor + cycle as f64 * self.bars as f64 + self.events[index].start)
    }

    /// (cycle, index) of the next occurrence; rolls into the next cycle
    /// only when looping
    fn cursor(&self) -> Option<(u64, usize)> {
        let playable = self.playable_len();
        if self.index < playable {
            Some((self.cycle, self.index))
        } else if self.looping && playable > 0 {
            Some((self.cycle + 1, 0))
        } else {
            None
        }
    }

    /// Number of leading events inside the loop window
    fn playable_len(&self) -> usize {
        let bars = self.bars as f64;
        self.events.partition_point(|e| e.start < bars)
    }

    fn sorted_position(&self, event: &PartEvent) -> usize {
        self.events.partition_point(|e| {
            e.start < event.start || (e.start == event.start && e.id < event.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::note::NoteFields;

    fn event(id: NoteId, pitch: &str, start: f64, duration: f64) -> NoteEvent {
        NoteEvent::new(
            id,
            NoteFields::new(Pitch::parse(pitch).unwrap(), start, duration, 1.0),
        )
    }

    fn part(events: &[NoteEvent], bars: u32, looping: bool) -> Part {
        Part::new(
            events,
            bars,
            looping,
            false,
            HumanizeSettings::default(),
            TimeSignature::four_four(),
        )
    }

    fn times_until(part: &mut Part, until: f64) -> Vec<f64> {
        let mut times = Vec::new();
        while let Some(time) = part.next_time() {
            if time >= until {
                break;
            }
            times.push(part.take().unwrap().time);
        }
        times
    }

    #[test]
    fn test_inactive_part_produces_nothing() {
        let mut p = part(&[event(1, "C4", 0.0, 0.25)], 1, true);
        assert!(!p.is_active());
        assert!(p.next_time().is_none());
    }

    #[test]
    fn test_loops_every_n_bars() {
        let mut p = part(&[event(1, "C4", 0.0, 0.25), event(2, "E4", 1.5, 0.25)], 2, true);
        p.begin(0.0, 0.0);
        assert_eq!(times_until(&mut p, 4.0), vec![0.0, 1.5, 2.0, 3.5]);
    }

    #[test]
    fn test_non_looping_plays_once() {
        let mut p = part(&[event(1, "C4", 0.0, 0.25), event(2, "E4", 0.5, 0.25)], 1, false);
        p.begin(0.0, 0.0);
        assert_eq!(times_until(&mut p, 10.0), vec![0.0, 0.5]);
    }

    #[test]
    fn test_begin_mid_cycle_keeps_phase() {
        let mut p = part(&[event(1, "C4", 0.0, 0.25), event(2, "E4", 1.0, 0.25)], 2, true);
        // Anchored at 4.0, started at bar 7: phase is 1 bar into cycle 1
        p.begin(4.0, 7.0);
        assert_eq!(times_until(&mut p, 10.0), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_events_outside_window_never_fire() {
        let mut p = part(&[event(1, "C4", 0.0, 0.25), event(2, "E4", 1.5, 0.25)], 2, true);
        p.begin(0.0, 0.0);
        p.set_bars(1, 0.0);
        assert_eq!(times_until(&mut p, 3.0), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_live_insert_and_remove() {
        let mut p = part(&[event(1, "C4", 0.0, 0.25), event(2, "E4", 0.5, 0.25)], 1, true);
        p.begin(0.0, 0.0);
        assert_eq!(times_until(&mut p, 0.3), vec![0.0]);

        // Already passed in this cycle: first plays in the next one
        p.insert(&event(3, "G4", 0.1, 0.25), 0.3);
        // Still ahead in this cycle
        p.insert(&event(4, "B4", 0.75, 0.25), 0.3);
        assert!(p.remove(2));
        assert!(!p.remove(2));

        assert_eq!(times_until(&mut p, 1.5), vec![0.75, 1.0, 1.1]);
    }

    #[test]
    fn test_insert_into_empty_loop_resyncs() {
        let mut p = part(&[], 1, true);
        p.begin(0.0, 0.0);
        assert!(p.next_time().is_none());

        p.insert(&event(1, "C4", 0.25, 0.1), 5.5);
        assert_eq!(p.next_time(), Some(6.25));
    }

    #[test]
    fn test_humanize_is_bounded_and_ordered() {
        let events: Vec<NoteEvent> = (0..16)
            .map(|i| event(i, "C4", i as f64 / 16.0, 1.0 / 16.0))
            .collect();
        let settings = HumanizeSettings {
            max_offset: 1.0 / 256.0,
            seed: 42,
        };
        let mut p = Part::new(&events, 1, true, true, settings, TimeSignature::four_four());
        p.begin(0.0, 0.0);

        let times = times_until(&mut p, 3.0);
        assert_eq!(times.len(), 48);
        for (i, time) in times.iter().enumerate() {
            let grid = i as f64 / 16.0;
            assert!(*time >= grid && *time < grid + 1.0 / 256.0);
        }
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_humanize_is_deterministic_for_a_seed() {
        let events = vec![event(1, "C4", 0.0, 0.25)];
        let settings = HumanizeSettings {
            max_offset: 0.01,
            seed: 7,
        };
        let run = || {
            let mut p = Part::new(&events, 1, true, true, settings, TimeSignature::four_four());
            p.begin(0.0, 0.0);
            times_until(&mut p, 4.0)
        };
        assert_eq!(run(), run());
    }
}
