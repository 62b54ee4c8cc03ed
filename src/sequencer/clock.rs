// Global clock - the single musical clock shared by every timeline
// Owns start/stop/position and publishes bar ticks and fine (UI) ticks

use super::time::{BAR_EPSILON, Tempo, TimeSignature};
use ringbuf::HeapRb;
use ringbuf::traits::{Producer, Split};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Number of fine ticks per bar
///
/// Keeps UI latency at or below 1/15 bar at any tempo.
pub const FINE_TICKS_PER_BAR: u32 = 15;

/// Which tick stream a tick belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Bar,
    Fine,
}

/// A tick delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTick {
    pub kind: TickKind,
    /// Logical clock position of the tick, in bars
    pub time: f64,
    /// Running count of ticks of this kind since the clock started
    pub index: u64,
}

pub type TickHandler = Box<dyn FnMut(&ClockTick) + Send>;
pub type TickConsumer = ringbuf::HeapCons<ClockTick>;

#[derive(Default)]
struct BusInner {
    handlers: Vec<(u64, TickHandler)>,
    live: HashSet<u64>,
    next_id: u64,
}

/// Observer list for one tick stream
#[derive(Clone, Default)]
struct TickBus {
    inner: Arc<Mutex<BusInner>>,
}

impl TickBus {
    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribe(&self, handler: TickHandler) -> Subscription {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.live.insert(id);
        inner.handlers.push((id, handler));

        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    fn len(&self) -> usize {
        self.lock().live.len()
    }

    fn clear(&self) {
        let mut inner = self.lock();
        inner.handlers.clear();
        inner.live.clear();
    }

    /// Deliver a tick to every live handler
    ///
    /// Handlers run outside the lock so they may subscribe or cancel
    /// (including themselves) while being called.
    fn emit(&self, tick: &ClockTick) {
        let mut handlers = std::mem::take(&mut self.lock().handlers);

        for (id, handler) in handlers.iter_mut() {
            if !self.lock().live.contains(id) {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| handler(tick)));
            if result.is_err() {
                log::error!(
                    "{:?} tick handler {} panicked at {:.3}; tick loop continues",
                    tick.kind,
                    id,
                    tick.time
                );
            }
        }

        let mut inner = self.lock();
        handlers.retain(|(id, _)| inner.live.contains(id));
        handlers.append(&mut inner.handlers);
        inner.handlers = handlers;
    }
}

/// Handle for a tick subscription
///
/// Dropping the handle (or calling `cancel`) removes the handler.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    id: u64,
}

impl Subscription {
    /// Unsubscribe now
    pub fn cancel(self) {}

    /// Whether the handler is still registered
    pub fn is_active(&self) -> bool {
        self.bus.upgrade().is_some_and(|bus| {
            bus.lock()
                .unwrap_or_else(|e| e.into_inner())
                .live
                .contains(&self.id)
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut inner = bus.lock().unwrap_or_else(|e| e.into_inner());
            inner.live.remove(&self.id);
            inner.handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Clock state mirrored for lock-free reads (UI thread)
/// Readers may observe slightly stale values
#[derive(Debug, Default)]
pub struct SharedClockState {
    running: AtomicBool,
    position_bits: AtomicU64,
    bar_ticks: AtomicU64,
    fine_ticks: AtomicU64,
}

impl SharedClockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Current position in bars
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Relaxed))
    }

    /// Number of bar ticks emitted since the clock last started
    pub fn bar_ticks(&self) -> u64 {
        self.bar_ticks.load(Ordering::Relaxed)
    }

    /// Number of fine ticks emitted since the clock last started
    pub fn fine_ticks(&self) -> u64 {
        self.fine_ticks.load(Ordering::Relaxed)
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    fn set_position(&self, position: f64) {
        self.position_bits
            .store(position.to_bits(), Ordering::Relaxed);
    }

    fn reset_ticks(&self) {
        self.bar_ticks.store(0, Ordering::Relaxed);
        self.fine_ticks.store(0, Ordering::Relaxed);
    }
}

/// The shared musical clock
///
/// The clock is advanced by its owner (the audio callback through the
/// engine); it never reads wall-clock time, so every start is aligned to the
/// logical position rather than to "now".
pub struct GlobalClock {
    shared: Arc<SharedClockState>,
    tempo: Tempo,
    time_signature: TimeSignature,
    sample_rate: f64,
    initialized: bool,
    running: bool,
    position: f64,
    bar_bus: TickBus,
    fine_bus: TickBus,
    /// Index of the next bar tick (None when the source is halted)
    next_bar: Option<u64>,
    /// Index of the next fine tick (None when the source is halted)
    next_fine: Option<u64>,
}

impl GlobalClock {
    /// Create a stopped, uninitialized clock
    pub fn new(sample_rate: f64) -> Self {
        Self {
            shared: SharedClockState::new(),
            tempo: Tempo::default(),
            time_signature: TimeSignature::default(),
            sample_rate,
            initialized: false,
            running: false,
            position: 0.0,
            bar_bus: TickBus::default(),
            fine_bus: TickBus::default(),
            next_bar: None,
            next_fine: None,
        }
    }

    /// Mark the clock usable again after `dispose`; no-op when already initialized
    ///
    /// Tick sources are armed by `start`, not here.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        log::debug!("Clock initialized ({} fine ticks per bar)", FINE_TICKS_PER_BAR);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Start the clock at its logical position
    ///
    /// Initializes first if needed; no-op when already running.
    pub fn start(&mut self) {
        self.initialize();
        if self.running {
            return;
        }

        self.next_bar = Some(0);
        self.next_fine = Some(0);
        self.running = true;
        self.shared.reset_ticks();
        self.shared.set_position(self.position);
        self.shared.set_running(true);
        log::debug!("Clock started at {:.3} bars ({})", self.position, self.tempo);
    }

    /// Halt both tick sources and rewind to zero; no-op when not running
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        self.running = false;
        self.position = 0.0;
        self.next_bar = None;
        self.next_fine = None;
        self.shared.set_position(0.0);
        self.shared.set_running(false);
        log::debug!("Clock stopped");
    }

    /// Tear down the tick streams (session end)
    pub fn dispose(&mut self) {
        self.stop();
        self.bar_bus.clear();
        self.fine_bus.clear();
        self.initialized = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current logical position in bars
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Get shared state (for passing to a UI thread)
    pub fn shared_state(&self) -> Arc<SharedClockState> {
        Arc::clone(&self.shared)
    }

    /// Subscribe to the once-per-bar tick stream
    pub fn subscribe_bar_tick<F>(&mut self, handler: F) -> Subscription
    where
        F: FnMut(&ClockTick) + Send + 'static,
    {
        self.initialize();
        self.bar_bus.subscribe(Box::new(handler))
    }

    /// Subscribe to the fine (UI) tick stream
    pub fn subscribe_fine_tick<F>(&mut self, handler: F) -> Subscription
    where
        F: FnMut(&ClockTick) + Send + 'static,
    {
        self.initialize();
        self.fine_bus.subscribe(Box::new(handler))
    }

    /// Fine ticks delivered through a lock-free ring buffer
    ///
    /// Ticks are dropped when the consumer falls behind by `capacity` ticks.
    pub fn fine_tick_feed(&mut self, capacity: usize) -> (Subscription, TickConsumer) {
        let (mut producer, consumer) = HeapRb::<ClockTick>::new(capacity.max(1)).split();
        let subscription = self.subscribe_fine_tick(move |tick| {
            let _ = producer.try_push(*tick);
        });
        (subscription, consumer)
    }

    pub fn bar_subscriber_count(&self) -> usize {
        self.bar_bus.len()
    }

    pub fn fine_subscriber_count(&self) -> usize {
        self.fine_bus.len()
    }

    /// Get tempo
    pub fn tempo(&self) -> &Tempo {
        &self.tempo
    }

    /// Set tempo in BPM; invalid values are ignored with a warning
    pub fn set_tempo(&mut self, bpm: f64) -> bool {
        match Tempo::try_new(bpm) {
            Some(tempo) => {
                self.tempo = tempo;
                true
            }
            None => {
                log::warn!("Ignoring invalid tempo {} BPM", bpm);
                false
            }
        }
    }

    /// Get time signature
    pub fn time_signature(&self) -> &TimeSignature {
        &self.time_signature
    }

    /// Set time signature
    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.time_signature = time_signature;
    }

    /// Get sample rate
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Set sample rate (called when audio device changes)
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    /// Convert a number of audio frames at the current tempo to bars
    pub fn samples_to_bars(&self, samples: u64) -> f64 {
        self.tempo
            .samples_to_bars(samples, self.sample_rate, &self.time_signature)
    }

    /// Time of the earliest pending tick, bar ticks first on ties
    pub(crate) fn next_tick(&self) -> Option<(f64, TickKind)> {
        if !self.running {
            return None;
        }
        let bar = self.next_bar.map(|i| (i as f64, TickKind::Bar));
        let fine = self
            .next_fine
            .map(|i| (i as f64 / FINE_TICKS_PER_BAR as f64, TickKind::Fine));

        match (bar, fine) {
            (Some(b), Some(f)) => Some(if b.0 <= f.0 + BAR_EPSILON { b } else { f }),
            (b, f) => b.or(f),
        }
    }

    /// Emit the pending tick of the given kind
    pub(crate) fn fire_tick(&mut self, kind: TickKind) {
        let (slot, bus, counter) = match kind {
            TickKind::Bar => (&mut self.next_bar, &self.bar_bus, &self.shared.bar_ticks),
            TickKind::Fine => (&mut self.next_fine, &self.fine_bus, &self.shared.fine_ticks),
        };
        let Some(index) = *slot else {
            return;
        };
        *slot = Some(index + 1);

        let time = match kind {
            TickKind::Bar => index as f64,
            TickKind::Fine => index as f64 / FINE_TICKS_PER_BAR as f64,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        bus.emit(&ClockTick { kind, time, index });
    }

    /// Move the position forward; never moves backwards
    pub(crate) fn advance_to(&mut self, position: f64) {
        if !self.running || position <= self.position {
            return;
        }
        self.position = position;
        self.shared.set_position(position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Consumer;

    fn run_until(clock: &mut GlobalClock, target: f64) {
        while let Some((time, kind)) = clock.next_tick() {
            if time >= target {
                break;
            }
            clock.advance_to(time);
            clock.fire_tick(kind);
        }
        clock.advance_to(target);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut clock = GlobalClock::new(48000.0);
        assert!(!clock.is_initialized());
        clock.initialize();
        clock.initialize();
        assert!(clock.is_initialized());
        assert!(!clock.is_running());
        // Ticks are only armed by start
        assert_eq!(clock.next_tick(), None);
        clock.start();
        assert_eq!(clock.next_tick(), Some((0.0, TickKind::Bar)));
    }

    #[test]
    fn test_start_stop_are_idempotent() {
        let mut clock = GlobalClock::new(48000.0);
        clock.stop();
        assert!(!clock.is_running());

        clock.start();
        assert!(clock.is_initialized());
        run_until(&mut clock, 1.5);
        clock.start();
        assert_eq!(clock.position(), 1.5);

        clock.stop();
        clock.stop();
        assert_eq!(clock.position(), 0.0);
        assert!(clock.next_tick().is_none());
    }

    #[test]
    fn test_tick_streams() {
        let mut clock = GlobalClock::new(48000.0);
        let bars = Arc::new(Mutex::new(Vec::new()));
        let fines = Arc::new(AtomicU64::new(0));

        let bars_in = Arc::clone(&bars);
        let _bar_sub = clock.subscribe_bar_tick(move |tick| {
            bars_in.lock().unwrap().push(tick.time);
        });
        let fines_in = Arc::clone(&fines);
        let _fine_sub = clock.subscribe_fine_tick(move |_| {
            fines_in.fetch_add(1, Ordering::Relaxed);
        });

        clock.start();
        run_until(&mut clock, 2.0);

        assert_eq!(*bars.lock().unwrap(), vec![0.0, 1.0]);
        assert_eq!(fines.load(Ordering::Relaxed), 2 * FINE_TICKS_PER_BAR as u64);
        assert_eq!(clock.shared_state().bar_ticks(), 2);
        assert_eq!(clock.shared_state().position(), 2.0);
    }

    #[test]
    fn test_subscription_drop_removes_handler() {
        let mut clock = GlobalClock::new(48000.0);
        let count = Arc::new(AtomicU64::new(0));
        let count_in = Arc::clone(&count);

        let sub = clock.subscribe_bar_tick(move |_| {
            count_in.fetch_add(1, Ordering::Relaxed);
        });
        assert!(sub.is_active());
        assert_eq!(clock.bar_subscriber_count(), 1);

        clock.start();
        run_until(&mut clock, 0.5);
        sub.cancel();
        assert_eq!(clock.bar_subscriber_count(), 0);
        run_until(&mut clock, 3.0);

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_ticks() {
        let mut clock = GlobalClock::new(48000.0);
        let count = Arc::new(AtomicU64::new(0));
        let count_in = Arc::clone(&count);

        let _bad = clock.subscribe_bar_tick(|_| panic!("handler failure"));
        let _good = clock.subscribe_bar_tick(move |_| {
            count_in.fetch_add(1, Ordering::Relaxed);
        });

        clock.start();
        run_until(&mut clock, 3.0);
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_fine_tick_feed() {
        let mut clock = GlobalClock::new(48000.0);
        let (_sub, mut feed) = clock.fine_tick_feed(64);

        clock.start();
        run_until(&mut clock, 0.2);

        // Fine ticks at 0, 1/15 and 2/15
        let ticks: Vec<ClockTick> = feed.pop_iter().collect();
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[2].index, 2);
        assert!(ticks.iter().all(|t| t.kind == TickKind::Fine));
    }

    #[test]
    fn test_dispose_clears_subscribers() {
        let mut clock = GlobalClock::new(48000.0);
        let sub = clock.subscribe_fine_tick(|_| {});
        clock.start();
        clock.dispose();
        assert!(!clock.is_initialized());
        assert!(!clock.is_running());
        assert_eq!(clock.fine_subscriber_count(), 0);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_tempo_conversion() {
        let mut clock = GlobalClock::new(48000.0);
        assert!(!clock.set_tempo(5.0));
        assert_eq!(clock.tempo().bpm(), 120.0);
        assert!(clock.set_tempo(60.0));
        // 60 BPM, 4/4: one bar = 4s = 192000 samples
        assert_eq!(clock.samples_to_bars(96000), 0.5);
    }
}
