//! Anomaly Detector
//!
//! Pure threshold checks against a snapshot. Every condition that holds is
//! reported; remediation belongs to the consumers.

use crate::telemetry::TelemetrySink;
use crate::types::{AnomalyKind, SystemState};

/// CPU usage above this is an overload
pub const CPU_THRESHOLD: f64 = 0.9;
/// Memory usage above this is memory pressure
pub const MEMORY_THRESHOLD: f64 = 0.9;
/// Battery percent below which running off AC is an anomaly
pub const LOW_BATTERY_THRESHOLD: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyDetector {
    cpu_threshold: f64,
    memory_threshold: f64,
    low_battery_threshold: f64,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self {
            cpu_threshold: CPU_THRESHOLD,
            memory_threshold: MEMORY_THRESHOLD,
            low_battery_threshold: LOW_BATTERY_THRESHOLD,
        }
    }

    /// All anomalies implied by `state`, in a fixed order (cpu, memory, power)
    pub fn detect(&self, state: &SystemState) -> Vec<AnomalyKind> {
        let mut anomalies = Vec::new();

        if state.cpu_usage > self.cpu_threshold {
            anomalies.push(AnomalyKind::CpuOverload);
        }

        if state.memory_usage > self.memory_threshold {
            anomalies.push(AnomalyKind::MemoryPressure);
        }

        if !state.on_ac_power && state.battery_level < self.low_battery_threshold {
            anomalies.push(AnomalyKind::LowBattery);
        }

        anomalies
    }

    /// Detect and forward each anomaly to `telemetry`
    pub fn evaluate(&self, state: &SystemState, telemetry: &dyn TelemetrySink) -> Vec<AnomalyKind> {
        let anomalies = self.detect(state);

        for kind in &anomalies {
            log::warn!(
                "⚠️ Anomaly: {} (cpu={:.2}, mem={:.2}, battery={:.1}%, ac={})",
                kind,
                state.cpu_usage,
                state.memory_usage,
                state.battery_level,
                state.on_ac_power
            );
            telemetry.record_anomaly(*kind);
        }

        anomalies
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingTelemetry;
    use chrono::Utc;

    fn state(cpu: f64, memory: f64, battery: f64, on_ac: bool) -> SystemState {
        let mut state = SystemState::initial(Utc::now());
        state.cpu_usage = cpu;
        state.memory_usage = memory;
        state.battery_level = battery;
        state.on_ac_power = on_ac;
        state
    }

    #[test]
    fn test_cpu_only() {
        let detector = AnomalyDetector::new();
        let anomalies = detector.detect(&state(0.95, 0.5, 50.0, true));
        assert_eq!(anomalies, vec![AnomalyKind::CpuOverload]);
    }

    #[test]
    fn test_memory_and_power() {
        let detector = AnomalyDetector::new();
        let anomalies = detector.detect(&state(0.5, 0.95, 5.0, false));
        assert_eq!(anomalies, vec![AnomalyKind::MemoryPressure, AnomalyKind::LowBattery]);
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let detector = AnomalyDetector::new();
        assert!(detector.detect(&state(0.9, 0.9, 10.0, false)).is_empty());
    }

    #[test]
    fn test_low_battery_on_ac_is_fine() {
        let detector = AnomalyDetector::new();
        assert!(detector.detect(&state(0.1, 0.1, 2.0, true)).is_empty());
    }

    #[test]
    fn test_evaluate_forwards_every_anomaly() {
        let detector = AnomalyDetector::new();
        let telemetry = RecordingTelemetry::default();
        let snapshot = state(0.99, 0.99, 1.0, false);

        let anomalies = detector.evaluate(&snapshot, &telemetry);

        assert_eq!(anomalies.len(), 3);
        assert_eq!(telemetry.anomalies(), anomalies);
    }
}
