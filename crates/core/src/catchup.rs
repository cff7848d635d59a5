//! Catch-up sources and the gate that combines them
//!
//! A notification refresh is only safe to run immediately once every sync
//! source has fetched what the server already holds. Sources that are not
//! running yet count as caught up; sources that fail count as behind.

use crate::error::{panic_message, CatchUpError};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default duration after which a source query is reported as slow
pub const DEFAULT_SLOW_SOURCE_THRESHOLD: Duration = Duration::from_millis(250);

/// Anything that can report whether it has caught up with remote state
pub trait CatchUpSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Query the current catch-up state
    fn is_caught_up(&self) -> Result<bool, CatchUpError>;
}

impl<T: CatchUpSource + ?Sized> CatchUpSource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_caught_up(&self) -> Result<bool, CatchUpError> {
        (**self).is_caught_up()
    }
}

/// Single-flag source for a realtime poller
///
/// The poller starts behind and flips the flag once its first complete
/// fetch has been applied.
#[derive(Debug)]
pub struct CaughtUpFlag {
    name: String,
    caught_up: AtomicBool,
}

impl CaughtUpFlag {
    /// Create a flag that starts out behind
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caught_up: AtomicBool::new(false),
        }
    }

    /// Record that every known message has been fetched
    pub fn mark_caught_up(&self) {
        self.caught_up.store(true, Ordering::Release);
    }

    /// Record that the poller fell behind again (e.g. after reconnecting)
    pub fn mark_behind(&self) {
        self.caught_up.store(false, Ordering::Release);
    }

    /// Current flag value
    pub fn get(&self) -> bool {
        self.caught_up.load(Ordering::Acquire)
    }
}

impl CatchUpSource for CaughtUpFlag {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_caught_up(&self) -> Result<bool, CatchUpError> {
        Ok(self.get())
    }
}

/// Per-channel catch-up tracking for batch-polled group channels
///
/// Caught up only when every tracked channel is. With no channels tracked
/// there is nothing to wait for.
#[derive(Debug)]
pub struct ChannelCatchUp {
    name: String,
    channels: DashMap<String, bool>,
}

impl ChannelCatchUp {
    /// Create an empty tracker
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: DashMap::new(),
        }
    }

    /// Start tracking a channel; new channels start behind
    ///
    /// Tracking an already tracked channel leaves its state untouched.
    pub fn track(&self, channel: impl Into<String>) {
        self.channels.entry(channel.into()).or_insert(false);
    }

    /// Stop tracking a channel
    pub fn untrack(&self, channel: &str) {
        self.channels.remove(channel);
    }

    /// Mark a channel as caught up, tracking it if needed
    pub fn mark_caught_up(&self, channel: impl Into<String>) {
        self.channels.insert(channel.into(), true);
    }

    /// Mark a channel as behind, tracking it if needed
    pub fn mark_behind(&self, channel: impl Into<String>) {
        self.channels.insert(channel.into(), false);
    }

    /// True when every tracked channel is caught up
    pub fn are_all_caught_up(&self) -> bool {
        self.channels.iter().all(|entry| *entry.value())
    }

    /// Channels that are still catching up, sorted
    pub fn pending_channels(&self) -> Vec<String> {
        let mut pending: Vec<String> = self
            .channels
            .iter()
            .filter(|entry| !*entry.value())
            .map(|entry| entry.key().clone())
            .collect();
        pending.sort_unstable();
        pending
    }

    /// Number of tracked channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True when no channels are tracked
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl CatchUpSource for ChannelCatchUp {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_caught_up(&self) -> Result<bool, CatchUpError> {
        Ok(self.are_all_caught_up())
    }
}

/// Late-bound handle to a source that may not exist yet
///
/// Subsystems install their source once they start. An empty slot is
/// skipped by the gate.
#[derive(Clone, Default)]
pub struct SourceSlot {
    inner: Arc<RwLock<Option<Arc<dyn CatchUpSource>>>>,
}

impl SourceSlot {
    /// Create an empty slot
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a slot that already holds a source
    pub fn with_source(source: Arc<dyn CatchUpSource>) -> Self {
        let slot = Self::empty();
        slot.install(source);
        slot
    }

    /// Install (or replace) the source
    pub fn install(&self, source: Arc<dyn CatchUpSource>) {
        debug!("Installing catch-up source '{}'", source.name());
        *self.inner.write() = Some(source);
    }

    /// Remove the source, returning it if present
    pub fn clear(&self) -> Option<Arc<dyn CatchUpSource>> {
        self.inner.write().take()
    }

    /// Snapshot the current source
    pub fn current(&self) -> Option<Arc<dyn CatchUpSource>> {
        self.inner.read().clone()
    }

    /// True when a source is installed
    pub fn is_present(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl std::fmt::Debug for SourceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.read().as_ref() {
            Some(source) => write!(f, "SourceSlot({})", source.name()),
            None => write!(f, "SourceSlot(<empty>)"),
        }
    }
}

/// Combines catch-up sources into a single "notify now" verdict
#[derive(Debug, Clone)]
pub struct CatchUpGate {
    slots: Vec<SourceSlot>,
    slow_threshold: Duration,
}

impl Default for CatchUpGate {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CatchUpGate {
    /// Create a gate over the given slots
    pub fn new(slots: Vec<SourceSlot>) -> Self {
        Self {
            slots,
            slow_threshold: DEFAULT_SLOW_SOURCE_THRESHOLD,
        }
    }

    /// Override the slow-query reporting threshold
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Registered slots
    pub fn slots(&self) -> &[SourceSlot] {
        &self.slots
    }

    /// Evaluate the registered slots
    pub fn is_caught_up(&self) -> bool {
        let snapshot: Vec<Option<Arc<dyn CatchUpSource>>> =
            self.slots.iter().map(SourceSlot::current).collect();

        self.decide(
            snapshot
                .iter()
                .map(|source| source.as_ref().map(|s| s.as_ref() as &dyn CatchUpSource)),
        )
    }

    /// AND together every present source
    ///
    /// Absent entries are skipped. Evaluation stops at the first source
    /// that is behind, so later sources are not queried.
    pub fn decide<'a, I>(&self, sources: I) -> bool
    where
        I: IntoIterator<Item = Option<&'a dyn CatchUpSource>>,
    {
        for source in sources.into_iter().flatten() {
            if !self.query(source) {
                debug!("Catch-up source '{}' is behind", source.name());
                return false;
            }
        }
        true
    }

    /// Query one source, mapping every failure to "behind"
    fn query(&self, source: &dyn CatchUpSource) -> bool {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| source.is_caught_up()));
        let elapsed = started.elapsed();

        if elapsed >= self.slow_threshold {
            warn!(
                "Catch-up source '{}' took {:?} to answer (threshold {:?})",
                source.name(),
                elapsed,
                self.slow_threshold
            );
        }

        match outcome {
            Ok(Ok(caught_up)) => caught_up,
            Ok(Err(e)) => {
                warn!("Treating catch-up source as behind: {}", e);
                false
            }
            Err(payload) => {
                let e = CatchUpError::Panicked {
                    source_name: source.name().to_string(),
                    message: panic_message(payload.as_ref()),
                };
                warn!("Treating catch-up source as behind: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Fixed(bool);

    impl CatchUpSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn is_caught_up(&self) -> Result<bool, CatchUpError> {
            Ok(self.0)
        }
    }

    struct Failing;

    impl CatchUpSource for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn is_caught_up(&self) -> Result<bool, CatchUpError> {
            Err(CatchUpError::Unavailable {
                source_name: "failing".to_string(),
                reason: "database locked".to_string(),
            })
        }
    }

    struct Panicking;

    impl CatchUpSource for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn is_caught_up(&self) -> Result<bool, CatchUpError> {
            panic!("poller state corrupted")
        }
    }

    struct Counting {
        value: bool,
        calls: AtomicUsize,
    }

    impl CatchUpSource for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn is_caught_up(&self) -> Result<bool, CatchUpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }
    }

    struct Sleepy {
        delay: Duration,
        answer: bool,
    }

    impl CatchUpSource for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn is_caught_up(&self) -> Result<bool, CatchUpError> {
            std::thread::sleep(self.delay);
            Ok(self.answer)
        }
    }

    #[test]
    fn test_slow_source_answer_is_still_used() {
        let gate = CatchUpGate::default().with_slow_threshold(Duration::from_millis(1));
        let delay = Duration::from_millis(20);

        let slow_yes = Sleepy { delay, answer: true };
        let slow_no = Sleepy { delay, answer: false };
        let slow_yes: &dyn CatchUpSource = &slow_yes;
        let slow_no: &dyn CatchUpSource = &slow_no;

        assert!(gate.decide([Some(slow_yes)]));
        assert!(!gate.decide([Some(slow_no)]));
        assert!(!gate.decide([Some(slow_yes), Some(slow_no)]));
    }

    #[test]
    fn test_all_caught_up_is_true() {
        let gate = CatchUpGate::default();
        let a = Fixed(true);
        let b = Fixed(true);
        assert!(gate.decide([Some(&a as &dyn CatchUpSource), Some(&b as &dyn CatchUpSource)]));
    }

    #[test]
    fn test_any_behind_is_false() {
        let gate = CatchUpGate::default();
        let a = Fixed(true);
        let b = Fixed(false);
        let a: &dyn CatchUpSource = &a;
        let b: &dyn CatchUpSource = &b;
        assert!(!gate.decide([Some(a), Some(b)]));
        assert!(!gate.decide([Some(b), Some(a)]));
    }

    #[test]
    fn test_empty_and_absent_sources_are_caught_up() {
        let gate = CatchUpGate::default();
        assert!(gate.decide(std::iter::empty::<Option<&dyn CatchUpSource>>()));
        assert!(gate.decide([None, None]));

        let behind = Fixed(false);
        let behind: &dyn CatchUpSource = &behind;
        assert!(!gate.decide([None, Some(behind), None]));
    }

    #[test]
    fn test_failing_source_counts_as_behind() {
        let gate = CatchUpGate::default();
        let ok = Fixed(true);
        let ok: &dyn CatchUpSource = &ok;
        let failing: &dyn CatchUpSource = &Failing;
        assert!(!gate.decide([Some(ok), Some(failing)]));
    }

    #[test]
    fn test_panicking_source_counts_as_behind() {
        let gate = CatchUpGate::default();
        let panicking: &dyn CatchUpSource = &Panicking;
        assert!(!gate.decide([Some(panicking)]));
    }

    #[test]
    fn test_stops_at_first_behind_source() {
        let gate = CatchUpGate::default();
        let behind = Fixed(false);
        let later = Counting {
            value: true,
            calls: AtomicUsize::new(0),
        };
        let first: &dyn CatchUpSource = &behind;
        let second: &dyn CatchUpSource = &later;
        assert!(!gate.decide([Some(first), Some(second)]));
        assert_eq!(later.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_decision_is_recomputed_each_call() {
        let flag = Arc::new(CaughtUpFlag::new("poller"));
        let gate = CatchUpGate::new(vec![SourceSlot::with_source(flag.clone())]);

        assert!(!gate.is_caught_up());
        flag.mark_caught_up();
        assert!(gate.is_caught_up());
        flag.mark_behind();
        assert!(!gate.is_caught_up());
    }

    #[test]
    fn test_slots_can_be_installed_late() {
        let slot = SourceSlot::empty();
        let gate = CatchUpGate::new(vec![slot.clone()]);
        assert!(gate.is_caught_up());
        assert!(!slot.is_present());

        slot.install(Arc::new(CaughtUpFlag::new("poller")));
        assert!(slot.is_present());
        assert!(!gate.is_caught_up());

        let removed = slot.clear();
        assert_eq!(removed.map(|s| s.name().to_string()), Some("poller".to_string()));
        assert!(gate.is_caught_up());
    }

    #[test]
    fn test_channel_catch_up_tracks_every_channel() {
        let channels = ChannelCatchUp::new("open-groups");
        assert!(channels.are_all_caught_up());
        assert!(channels.is_empty());

        channels.track("chat.example.org/1");
        channels.track("chat.example.org/2");
        assert!(!channels.are_all_caught_up());
        assert_eq!(channels.pending_channels().len(), 2);

        channels.mark_caught_up("chat.example.org/1");
        assert_eq!(channels.pending_channels(), vec!["chat.example.org/2".to_string()]);

        channels.mark_caught_up("chat.example.org/2");
        assert!(channels.is_caught_up().unwrap());

        // Re-tracking keeps the existing state
        channels.track("chat.example.org/2");
        assert!(channels.are_all_caught_up());

        channels.mark_behind("chat.example.org/3");
        assert!(!channels.are_all_caught_up());
        channels.untrack("chat.example.org/3");
        assert!(channels.are_all_caught_up());
        assert_eq!(channels.len(), 2);
    }

    #[test]
    fn test_gate_over_poller_and_channels() {
        let poller = Arc::new(CaughtUpFlag::new("poller"));
        let channels = Arc::new(ChannelCatchUp::new("open-groups"));
        let gate = CatchUpGate::new(vec![
            SourceSlot::with_source(poller.clone()),
            SourceSlot::with_source(channels.clone()),
        ]);

        channels.track("room");
        poller.mark_caught_up();
        assert!(!gate.is_caught_up());

        channels.mark_caught_up("room");
        assert!(gate.is_caught_up());
    }

    #[test]
    fn test_slot_debug_shows_source_name() {
        let slot = SourceSlot::empty();
        assert_eq!(format!("{:?}", slot), "SourceSlot(<empty>)");
        slot.install(Arc::new(CaughtUpFlag::new("poller")));
        assert_eq!(format!("{:?}", slot), "SourceSlot(poller)");
    }
}
