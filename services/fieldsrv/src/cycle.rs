//! Fixed-period five-phase cycle scheduler
//!
//! One logical clock drives the whole runtime:
//!
//! 1. promote: channel `next` values become the cycle's process image
//! 2. execute reads: the bridge runs this cycle's read tasks
//! 3. control: every controller runs exactly one step
//! 4. execute writes: the bridge flushes pending writes
//! 5. after image: cycle bookkeeping, stable-image listeners
//!
//! Phases run to completion before the next tick may start. Every
//! controller observes the same `current` snapshot; a value produced by a
//! read or a controller this cycle becomes visible at the next promote.
//! If a cycle overruns its period the next tick is delayed, never skipped
//! (correctness over strict periodicity), and the measured cycle time is
//! published on `_cycle/MeasuredCycleTime` so sustained overrun is
//! observable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flux_channel::{Channel, ChannelKind, ChannelRegistry, Unit, Value};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::ProtocolBridge;
use crate::error::Result;

/// Reserved component id for the runtime's own channels
pub const CYCLE_COMPONENT: &str = "_cycle";

/// A control component stepped once per cycle
///
/// Controllers read the promoted process image and issue channel writes;
/// they must not block. A failing controller is logged and contained, it
/// cannot abort the cycle.
pub trait Controller: Send {
    /// Stable component id, for logs
    fn id(&self) -> &str;

    /// Execute one control step
    fn run(&mut self) -> Result<()>;
}

/// O(1) per-cycle timing statistics
#[derive(Debug, Clone)]
pub struct CycleStats {
    pub cycle_count: u64,
    pub last: Duration,
    pub min: Duration,
    pub max: Duration,
    sum: Duration,
    pub overruns: u64,
}

impl CycleStats {
    pub fn new() -> Self {
        Self {
            cycle_count: 0,
            last: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            sum: Duration::ZERO,
            overruns: 0,
        }
    }

    /// Record one cycle duration against the configured period
    pub fn record(&mut self, duration: Duration, period: Duration) {
        self.cycle_count += 1;
        self.last = duration;
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
        self.sum += duration;
        if duration > period {
            self.overruns += 1;
        }
    }

    /// Average cycle duration (zero before the first cycle)
    pub fn avg(&self) -> Duration {
        if self.cycle_count == 0 {
            Duration::ZERO
        } else {
            self.sum / self.cycle_count as u32
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

type ImageListener = Box<dyn Fn() + Send>;

/// The top-level fixed-period cycle driver
pub struct CycleScheduler {
    period: Duration,
    registry: Arc<ChannelRegistry>,
    bridge: ProtocolBridge,
    controllers: Vec<Box<dyn Controller>>,
    image_listeners: Vec<ImageListener>,
    stats: CycleStats,
    cycle_time: Arc<Channel>,
}

impl std::fmt::Debug for CycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleScheduler")
            .field("period", &self.period)
            .field("controllers", &self.controllers.len())
            .field("cycles", &self.stats.cycle_count)
            .finish()
    }
}

impl CycleScheduler {
    /// Create a scheduler; registers the runtime's `_cycle` channels
    pub fn new(
        period: Duration,
        registry: Arc<ChannelRegistry>,
        bridge: ProtocolBridge,
    ) -> Result<Self> {
        let cycle_time = registry.register(
            Channel::builder(CYCLE_COMPONENT, "MeasuredCycleTime")
                .kind(ChannelKind::Long)
                .unit(Unit::Milliseconds)
                .build(),
        )?;
        Ok(Self {
            period,
            registry,
            bridge,
            controllers: Vec::new(),
            image_listeners: Vec::new(),
            stats: CycleStats::new(),
            cycle_time,
        })
    }

    /// Register a controller; controllers run in registration order
    pub fn add_controller(&mut self, controller: Box<dyn Controller>) {
        debug!(controller = controller.id(), "controller registered");
        self.controllers.push(controller);
    }

    /// Register a listener notified after each cycle's image is stable
    pub fn on_image_stable(&mut self, listener: impl Fn() + Send + 'static) {
        self.image_listeners.push(Box::new(listener));
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &ProtocolBridge {
        &self.bridge
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Connect the bridge's bus; the run loop does this automatically
    pub async fn connect(&mut self) -> Result<()> {
        self.bridge.connect().await
    }

    /// Execute one complete cycle (all five phases)
    pub async fn execute_cycle(&mut self) {
        let started = Instant::now();

        // Phase 1: promote the process image.
        let changed = self.registry.promote_all();

        // Phase 2: read tasks.
        self.bridge.execute_reads().await;

        // Phase 3: one control step per component.
        for controller in self.controllers.iter_mut() {
            if let Err(e) = controller.run() {
                warn!(controller = controller.id(), error = %e, "controller step failed");
            }
        }

        // Phase 4: flush pending writes.
        self.bridge.execute_writes().await;

        // Phase 5: bookkeeping, then tell listeners the image is stable.
        let elapsed = started.elapsed();
        self.stats.record(elapsed, self.period);
        let _ = self
            .cycle_time
            .set_next(Value::Long(elapsed.as_millis() as i64));
        if elapsed > self.period {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                period_ms = self.period.as_millis() as u64,
                "cycle overrun"
            );
        }
        for listener in &self.image_listeners {
            listener();
        }

        debug!(
            cycle = self.stats.cycle_count,
            changed,
            elapsed_us = elapsed.as_micros() as u64,
            "cycle complete"
        );
    }

    /// Run the fixed-period loop until `shutdown` fires
    ///
    /// An overrunning cycle delays the next tick instead of skipping it.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        if let Err(e) = self.connect().await {
            warn!(error = %e, "initial bus connect failed, devices will retry per cycle");
        }

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = self.period.as_millis() as u64, "cycle loop started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.execute_cycle().await,
            }
        }

        // Let the bus go down cleanly; in-flight work finished above.
        if let Err(e) = self.bridge.disconnect().await {
            warn!(error = %e, "bus disconnect failed");
        }
        info!(
            cycles = self.stats.cycle_count,
            overruns = self.stats.overruns,
            "cycle loop stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use crate::bus::MockBus;
    use flux_channel::AccessMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(registry: Arc<ChannelRegistry>) -> CycleScheduler {
        let bridge = ProtocolBridge::new(Box::new(MockBus::new()), BridgeConfig::default());
        CycleScheduler::new(Duration::from_millis(100), registry, bridge).unwrap()
    }

    struct CountingController {
        runs: Arc<AtomicUsize>,
        observed: Arc<Channel>,
        seen: Arc<parking_lot::Mutex<Vec<Option<Value>>>>,
    }

    impl Controller for CountingController {
        fn id(&self) -> &str {
            "ctrl0"
        }

        fn run(&mut self) -> Result<()> {
            self.seen.lock().push(self.observed.value());
            // Produce a new value mid-cycle on the first run; it must not
            // become visible before the next promote.
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                self.observed.set_next(Value::Int(9)).unwrap();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_controller_sees_promoted_snapshot() {
        let registry = Arc::new(ChannelRegistry::new());
        let channel = registry
            .register(
                Channel::builder("meter0", "Power")
                    .kind(ChannelKind::Integer)
                    .access(AccessMode::ReadWrite)
                    .build(),
            )
            .unwrap();

        let mut sched = scheduler(Arc::clone(&registry));
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        sched.add_controller(Box::new(CountingController {
            runs: Arc::clone(&runs),
            observed: Arc::clone(&channel),
            seen: Arc::clone(&seen),
        }));

        // Value produced before cycle 1 is visible in cycle 1's snapshot;
        // the controller's own mid-cycle production shows up in cycle 2.
        channel.set_next(Value::Int(5)).unwrap();
        sched.execute_cycle().await;
        sched.execute_cycle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock(), vec![Some(Value::Int(5)), Some(Value::Int(9))]);
    }

    #[tokio::test]
    async fn test_cycle_time_published_after_next_promote() {
        let registry = Arc::new(ChannelRegistry::new());
        let mut sched = scheduler(Arc::clone(&registry));

        sched.execute_cycle().await;
        sched.execute_cycle().await;

        let address: flux_channel::ChannelAddress =
            format!("{CYCLE_COMPONENT}/MeasuredCycleTime").parse().unwrap();
        let measured = registry.value(&address);
        assert!(matches!(measured, Some(Value::Long(_))));
        assert_eq!(sched.stats().cycle_count, 2);
    }

    #[tokio::test]
    async fn test_image_listener_runs_each_cycle() {
        let registry = Arc::new(ChannelRegistry::new());
        let mut sched = scheduler(registry);
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        sched.on_image_stable(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });

        sched.execute_cycle().await;
        sched.execute_cycle().await;
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stats_overrun_accounting() {
        let mut stats = CycleStats::new();
        let period = Duration::from_millis(100);
        stats.record(Duration::from_millis(40), period);
        stats.record(Duration::from_millis(160), period);

        assert_eq!(stats.cycle_count, 2);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.min, Duration::from_millis(40));
        assert_eq!(stats.max, Duration::from_millis(160));
        assert_eq!(stats.avg(), Duration::from_millis(100));
    }
}
