//! Telemetry sinks - write-only record of what the core observed
//!
//! Accept-and-forget: sinks never fail back into the sampler or the engine.

use crate::types::{AnomalyKind, PurposeKind, SystemState, TelemetryConfig};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub trait TelemetrySink: Send + Sync {
    /// A new snapshot was installed
    fn record_state_update(&self, state: &SystemState);

    /// An anomaly was raised against the latest snapshot
    fn record_anomaly(&self, kind: AnomalyKind);

    /// An inference call finished
    fn record_inference(&self, _purpose: PurposeKind, _latency: Duration, _succeeded: bool) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    StateUpdate(SystemState),
    Anomaly(AnomalyKind),
    Inference {
        purpose: PurposeKind,
        latency: Duration,
        succeeded: bool,
    },
}

/// Forwards every event to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn record_state_update(&self, state: &SystemState) {
        log::trace!(
            "State update: cpu={:.2} mem={:.2} io={:.2} net={:.2} procs={} users={} battery={:.1}% ac={}",
            state.cpu_usage,
            state.memory_usage,
            state.io_usage,
            state.network_usage,
            state.process_count,
            state.user_count,
            state.battery_level,
            state.on_ac_power
        );
    }

    fn record_anomaly(&self, kind: AnomalyKind) {
        log::warn!("Anomaly recorded: {}", kind);
    }

    fn record_inference(&self, purpose: PurposeKind, latency: Duration, succeeded: bool) {
        log::debug!(
            "Inference {}: {:.2}ms ({})",
            purpose,
            latency.as_secs_f64() * 1000.0,
            if succeeded { "ok" } else { "failed" }
        );
    }
}

/// Keeps a bounded in-memory history of events
pub struct RecordingTelemetry {
    events: RwLock<VecDeque<TelemetryEvent>>,
    max_history: usize,
    state_updates: AtomicU64,
    anomalies: AtomicU64,
    inferences: AtomicU64,
}

impl RecordingTelemetry {
    pub fn new(max_history: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_history: max_history.max(1),
            state_updates: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            inferences: AtomicU64::new(0),
        }
    }

    /// History sized by `telemetry.history`
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.history)
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    fn push(&self, event: TelemetryEvent) {
        let mut events = self.events.write();
        events.push_back(event);

        if events.len() > self.max_history {
            events.pop_front();
        }
    }

    /// Most recent events, newest first
    pub fn recent(&self, count: usize) -> Vec<TelemetryEvent> {
        let events = self.events.read();
        events.iter().rev().take(count).cloned().collect()
    }

    /// All retained events, oldest first
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// Retained anomalies, oldest first
    pub fn anomalies(&self) -> Vec<AnomalyKind> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::Anomaly(kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    /// Total state updates ever recorded (not bounded by history)
    pub fn state_update_count(&self) -> u64 {
        self.state_updates.load(Ordering::Relaxed)
    }

    pub fn anomaly_count(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    pub fn inference_count(&self) -> u64 {
        self.inferences.load(Ordering::Relaxed)
    }
}

impl Default for RecordingTelemetry {
    fn default() -> Self {
        Self::from_config(&TelemetryConfig::default())
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_state_update(&self, state: &SystemState) {
        self.state_updates.fetch_add(1, Ordering::Relaxed);
        self.push(TelemetryEvent::StateUpdate(*state));
    }

    fn record_anomaly(&self, kind: AnomalyKind) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
        self.push(TelemetryEvent::Anomaly(kind));
    }

    fn record_inference(&self, purpose: PurposeKind, latency: Duration, succeeded: bool) {
        self.inferences.fetch_add(1, Ordering::Relaxed);
        self.push(TelemetryEvent::Inference {
            purpose,
            latency,
            succeeded,
        });
    }
}
