//! Sampler Loop
//!
//! Periodically pulls every metric, installs a fresh snapshot, runs anomaly
//! detection on it and tells telemetry. A failing metric keeps its previous
//! value; sampling never stops because one source hiccuped.
//!
//! Metric sources may block (a host source scans `/proc`), so a spawned loop
//! runs each tick on tokio's blocking pool.

use crate::anomaly::AnomalyDetector;
use crate::error::{InitError, MetricError};
use crate::metrics::{MetricSource, PowerState};
use crate::state_store::StateStore;
use crate::telemetry::TelemetrySink;
use crate::types::SystemState;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// One tick's worth of work; owned by the loop once spawned
pub struct Sampler {
    store: Arc<StateStore>,
    source: Arc<dyn MetricSource>,
    telemetry: Arc<dyn TelemetrySink>,
    detector: AnomalyDetector,
}

impl Sampler {
    pub fn new(
        store: Arc<StateStore>,
        source: Arc<dyn MetricSource>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            store,
            source,
            telemetry,
            detector: AnomalyDetector::new(),
        }
    }

    /// Run a single tick and return the snapshot it installed
    pub fn tick(&self) -> SystemState {
        let previous = self.store.get();

        let power = or_previous(
            "power_state",
            self.source.power_state(),
            PowerState {
                on_ac: previous.on_ac_power,
                battery_level: previous.battery_level,
            },
        );

        let state = SystemState {
            boot_time: previous.boot_time,
            last_update: Utc::now(),
            cpu_usage: or_previous("cpu_usage", self.source.cpu_usage(), previous.cpu_usage),
            memory_usage: or_previous("memory_usage", self.source.memory_usage(), previous.memory_usage),
            io_usage: or_previous("io_usage", self.source.io_usage(), previous.io_usage),
            network_usage: or_previous("network_usage", self.source.network_usage(), previous.network_usage),
            process_count: or_previous("process_count", self.source.process_count(), previous.process_count),
            user_count: or_previous("user_count", self.source.user_count(), previous.user_count),
            battery_level: power.battery_level,
            on_ac_power: power.on_ac,
        }
        .clamped();

        self.store.replace(state);
        self.detector.evaluate(&state, self.telemetry.as_ref());
        self.telemetry.record_state_update(&state);

        state
    }

    /// Start the loop on the current tokio runtime.
    ///
    /// Fails with [`InitError::SamplerSpawn`] when called outside a runtime.
    pub fn spawn(self, interval: Duration) -> Result<SamplerHandle, InitError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| InitError::SamplerSpawn(e.to_string()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (interval_tx, interval_rx) = watch::channel(interval.max(MIN_INTERVAL));
        let ticks = Arc::new(AtomicU64::new(0));

        let task = runtime.spawn(run_loop(self, stop_rx, interval_rx, ticks.clone()));

        Ok(SamplerHandle {
            stop_tx,
            interval_tx,
            task,
            ticks,
        })
    }
}

fn or_previous<T: Copy>(metric: &str, value: Result<T, MetricError>, previous: T) -> T {
    match value {
        Ok(value) => value,
        Err(MetricError::Unsupported(_)) => previous,
        Err(e) => {
            log::warn!("Metric {} unavailable, keeping previous value: {}", metric, e);
            previous
        }
    }
}

async fn run_loop(
    sampler: Sampler,
    mut stop_rx: watch::Receiver<bool>,
    mut interval_rx: watch::Receiver<Duration>,
    ticks: Arc<AtomicU64>,
) {
    let sampler = Arc::new(sampler);
    let mut interval = *interval_rx.borrow_and_update();
    log::info!("Sampler started: interval={}ms", interval.as_millis());

    loop {
        if *stop_rx.borrow() {
            break;
        }

        // A tick always runs to completion; stop is only observed between ticks
        let tick = {
            let sampler = sampler.clone();
            tokio::task::spawn_blocking(move || sampler.tick())
        };
        match tick.await {
            Ok(_) => {
                ticks.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => log::error!("Sampler tick failed: {}", e),
        }

        if interval_rx.has_changed().unwrap_or(false) {
            interval = *interval_rx.borrow_and_update();
            log::info!("Sampler interval now {}ms", interval.as_millis());
        }

        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    log::info!("Sampler stopped after {} ticks", ticks.load(Ordering::Relaxed));
}

/// Control handle for a running sampler loop
pub struct SamplerHandle {
    stop_tx: watch::Sender<bool>,
    interval_tx: watch::Sender<Duration>,
    task: JoinHandle<()>,
    ticks: Arc<AtomicU64>,
}

impl SamplerHandle {
    /// Change the tick interval; applies from the next tick boundary
    pub fn set_interval(&self, interval: Duration) {
        self.interval_tx.send_replace(interval.max(MIN_INTERVAL));
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it; an in-flight tick finishes first
    pub async fn stop(self) -> Result<u64, InitError> {
        self.stop_tx.send_replace(true);
        self.task
            .await
            .map_err(|e| InitError::SamplerJoin(e.to_string()))?;
        Ok(self.ticks.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{SimulatedMetricSource, CPU_CEILING, CPU_FLOOR, CPU_WALK_STEP};
    use crate::telemetry::RecordingTelemetry;

    /// Source whose CPU query always fails and whose values are out of range
    struct FlakySource;

    impl MetricSource for FlakySource {
        fn cpu_usage(&self) -> Result<f64, MetricError> {
            Err(MetricError::Read {
                metric: "cpu_usage",
                reason: "stat unreadable".to_string(),
            })
        }
        fn memory_usage(&self) -> Result<f64, MetricError> {
            Ok(1.5)
        }
        fn io_usage(&self) -> Result<f64, MetricError> {
            Err(MetricError::Unsupported("io_usage"))
        }
        fn network_usage(&self) -> Result<f64, MetricError> {
            Ok(-0.5)
        }
        fn process_count(&self) -> Result<u32, MetricError> {
            Ok(42)
        }
        fn user_count(&self) -> Result<u32, MetricError> {
            Ok(2)
        }
        fn power_state(&self) -> Result<PowerState, MetricError> {
            Ok(PowerState {
                on_ac: false,
                battery_level: 250.0,
            })
        }
    }

    /// Simulated machine whose process scan takes a while
    struct SlowScanSource(SimulatedMetricSource);

    impl MetricSource for SlowScanSource {
        fn cpu_usage(&self) -> Result<f64, MetricError> {
            self.0.cpu_usage()
        }
        fn memory_usage(&self) -> Result<f64, MetricError> {
            self.0.memory_usage()
        }
        fn io_usage(&self) -> Result<f64, MetricError> {
            self.0.io_usage()
        }
        fn network_usage(&self) -> Result<f64, MetricError> {
            self.0.network_usage()
        }
        fn process_count(&self) -> Result<u32, MetricError> {
            std::thread::sleep(Duration::from_millis(300));
            self.0.process_count()
        }
        fn user_count(&self) -> Result<u32, MetricError> {
            self.0.user_count()
        }
        fn power_state(&self) -> Result<PowerState, MetricError> {
            self.0.power_state()
        }
    }

    fn store_with_cpu(cpu: f64) -> Arc<StateStore> {
        let mut initial = SystemState::initial(Utc::now());
        initial.cpu_usage = cpu;
        initial.io_usage = 0.3;
        Arc::new(StateStore::new(initial))
    }

    #[test]
    fn test_tick_substitutes_previous_values_and_clamps() {
        let store = store_with_cpu(0.42);
        let telemetry = Arc::new(RecordingTelemetry::default());
        let sampler = Sampler::new(store.clone(), Arc::new(FlakySource), telemetry.clone());

        let state = sampler.tick();

        assert_eq!(state.cpu_usage, 0.42);
        assert_eq!(state.io_usage, 0.3);
        assert_eq!(state.memory_usage, 1.0);
        assert_eq!(state.network_usage, 0.0);
        assert_eq!(state.battery_level, 100.0);
        assert!(!state.on_ac_power);
        assert_eq!(state.process_count, 42);
        assert_eq!(store.get(), state);
        assert_eq!(telemetry.state_update_count(), 1);
        // memory at 1.0 is over threshold
        assert_eq!(telemetry.anomaly_count(), 1);
    }

    #[test]
    fn test_ticks_stay_in_range_under_iteration() {
        let store = store_with_cpu(0.25);
        let telemetry = Arc::new(RecordingTelemetry::new(16));
        let sampler = Sampler::new(
            store.clone(),
            Arc::new(SimulatedMetricSource::with_seed(99).with_power(false, 30.0)),
            telemetry.clone(),
        );

        let mut previous_cpu = 0.25;
        for _ in 0..5_000 {
            let state = sampler.tick();
            for ratio in [state.cpu_usage, state.memory_usage, state.io_usage, state.network_usage] {
                assert!((0.0..=1.0).contains(&ratio));
            }
            assert!((0.0..=100.0).contains(&state.battery_level));
            assert!((CPU_FLOOR..=CPU_CEILING).contains(&state.cpu_usage));
            assert!((state.cpu_usage - previous_cpu).abs() <= CPU_WALK_STEP + 1e-12);
            previous_cpu = state.cpu_usage;
        }

        assert_eq!(telemetry.state_update_count(), 5_000);
        assert_eq!(store.generation(), 5_000);
    }

    #[test]
    fn test_spawn_outside_runtime_is_an_error() {
        let sampler = Sampler::new(
            store_with_cpu(0.1),
            Arc::new(SimulatedMetricSource::with_seed(1)),
            Arc::new(RecordingTelemetry::default()),
        );

        let result = sampler.spawn(Duration::from_millis(10));
        assert!(matches!(result, Err(InitError::SamplerSpawn(_))));
    }

    #[tokio::test]
    async fn test_stop_waits_and_silences_telemetry() {
        let store = store_with_cpu(0.1);
        let telemetry = Arc::new(RecordingTelemetry::default());
        let sampler = Sampler::new(
            store.clone(),
            Arc::new(SimulatedMetricSource::with_seed(5)),
            telemetry.clone(),
        );

        let handle = sampler.spawn(Duration::from_millis(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(handle.is_running());

        let ticks = handle.stop().await.unwrap();
        assert!(ticks > 0);

        let updates = telemetry.state_update_count();
        let final_state = store.get();
        assert_eq!(updates, ticks);
        assert_eq!(store.generation(), ticks);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(telemetry.state_update_count(), updates);
        assert_eq!(store.get(), final_state);
    }

    #[tokio::test]
    async fn test_blocking_source_does_not_stall_runtime() {
        let sampler = Sampler::new(
            store_with_cpu(0.1),
            Arc::new(SlowScanSource(SimulatedMetricSource::with_seed(3))),
            Arc::new(RecordingTelemetry::default()),
        );

        let start = std::time::Instant::now();
        let handle = sampler.spawn(Duration::from_secs(3600)).unwrap();

        // Let the loop start its first tick, then do other work on the
        // same (single-threaded) runtime while the scan is in progress
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(handle.ticks(), 0);

        // Stop waits for the in-flight tick
        let ticks = handle.stop().await.unwrap();
        assert_eq!(ticks, 1);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_interval_change_waits_for_tick_boundary() {
        let sampler = Sampler::new(
            store_with_cpu(0.1),
            Arc::new(SimulatedMetricSource::with_seed(8)),
            Arc::new(RecordingTelemetry::default()),
        );

        let handle = sampler.spawn(Duration::from_secs(3600)).unwrap();

        // First tick is immediate, then the loop sleeps for an hour
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.ticks(), 1);

        // Not retroactive: the hour-long sleep already in progress is kept
        handle.set_interval(Duration::from_millis(1));
        assert_eq!(handle.interval(), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.ticks(), 1);

        handle.set_interval(Duration::ZERO);
        assert_eq!(handle.interval(), MIN_INTERVAL);

        // Stop interrupts the sleep, not a tick
        let ticks = handle.stop().await.unwrap();
        assert_eq!(ticks, 1);
    }
}
