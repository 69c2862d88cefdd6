//! Metric sources - where the sampler gets raw machine state from
//!
//! Every query is independent and fallible; the sampler keeps the previous
//! value for anything that fails.

use crate::error::MetricError;
use parking_lot::Mutex;
use std::time::Instant;
use sysinfo::{Networks, System};

/// AC/battery status
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerState {
    pub on_ac: bool,
    /// Battery level (0.0 - 100.0)
    pub battery_level: f64,
}

/// Supplies raw per-metric values
pub trait MetricSource: Send + Sync {
    /// CPU utilization (0.0 - 1.0)
    fn cpu_usage(&self) -> Result<f64, MetricError>;
    /// Memory utilization (0.0 - 1.0)
    fn memory_usage(&self) -> Result<f64, MetricError>;
    /// I/O utilization (0.0 - 1.0)
    fn io_usage(&self) -> Result<f64, MetricError>;
    /// Network utilization (0.0 - 1.0)
    fn network_usage(&self) -> Result<f64, MetricError>;
    fn process_count(&self) -> Result<u32, MetricError>;
    fn user_count(&self) -> Result<u32, MetricError>;
    fn power_state(&self) -> Result<PowerState, MetricError>;
}

// =============================================================================
// Simulated source
// =============================================================================

/// Largest per-tick CPU perturbation
pub const CPU_WALK_STEP: f64 = 0.05;
pub const CPU_FLOOR: f64 = 0.05;
pub const CPU_CEILING: f64 = 0.95;

const MEMORY_WALK_STEP: f64 = 0.02;
const MEMORY_FLOOR: f64 = 0.10;
const MEMORY_CEILING: f64 = 0.90;

/// Chance per tick that the machine is plugged in / unplugged
pub const AC_FLIP_PROBABILITY: f64 = 0.01;
/// Battery percent lost per tick off AC
pub const BATTERY_DRAIN_STEP: f64 = 0.1;
/// Battery percent gained per tick on AC
pub const BATTERY_CHARGE_STEP: f64 = 0.5;

struct SimulatedState {
    rng: fastrand::Rng,
    cpu: f64,
    memory: f64,
    on_ac: bool,
    battery: f64,
}

/// Synthetic machine with short-term autocorrelated load.
///
/// CPU and memory follow bounded random walks, AC power flips rarely, and the
/// battery drains or charges a fixed step per power query.
pub struct SimulatedMetricSource {
    state: Mutex<SimulatedState>,
}

impl SimulatedMetricSource {
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    /// Deterministic sequence for tests and replays
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                rng,
                cpu: 0.25,
                memory: 0.40,
                on_ac: true,
                battery: 100.0,
            }),
        }
    }

    /// Start from a given power situation
    pub fn with_power(self, on_ac: bool, battery_level: f64) -> Self {
        {
            let mut state = self.state.lock();
            state.on_ac = on_ac;
            state.battery = battery_level.clamp(0.0, 100.0);
        }
        self
    }
}

impl Default for SimulatedMetricSource {
    fn default() -> Self {
        Self::new()
    }
}

fn walk(rng: &mut fastrand::Rng, current: f64, step: f64, floor: f64, ceiling: f64) -> f64 {
    let delta = (rng.f64() * 2.0 - 1.0) * step;
    (current + delta).clamp(floor, ceiling)
}

impl MetricSource for SimulatedMetricSource {
    fn cpu_usage(&self) -> Result<f64, MetricError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let next = walk(&mut state.rng, state.cpu, CPU_WALK_STEP, CPU_FLOOR, CPU_CEILING);
        state.cpu = next;
        Ok(next)
    }

    fn memory_usage(&self) -> Result<f64, MetricError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let next = walk(
            &mut state.rng,
            state.memory,
            MEMORY_WALK_STEP,
            MEMORY_FLOOR,
            MEMORY_CEILING,
        );
        state.memory = next;
        Ok(next)
    }

    fn io_usage(&self) -> Result<f64, MetricError> {
        Ok(self.state.lock().rng.f64() * 0.3)
    }

    fn network_usage(&self) -> Result<f64, MetricError> {
        Ok(self.state.lock().rng.f64() * 0.2)
    }

    fn process_count(&self) -> Result<u32, MetricError> {
        Ok(self.state.lock().rng.u32(80..=200))
    }

    fn user_count(&self) -> Result<u32, MetricError> {
        Ok(self.state.lock().rng.u32(1..=3))
    }

    fn power_state(&self) -> Result<PowerState, MetricError> {
        let mut state = self.state.lock();

        if state.rng.f64() < AC_FLIP_PROBABILITY {
            state.on_ac = !state.on_ac;
            log::debug!("Simulated power source changed: on_ac={}", state.on_ac);
        }

        state.battery = if state.on_ac {
            (state.battery + BATTERY_CHARGE_STEP).min(100.0)
        } else {
            (state.battery - BATTERY_DRAIN_STEP).max(0.0)
        };

        Ok(PowerState {
            on_ac: state.on_ac,
            battery_level: state.battery,
        })
    }
}

// =============================================================================
// Host source (sysinfo)
// =============================================================================

/// Link capacity assumed when turning byte rates into a ratio (1 Gbit/s)
const LINK_BYTES_PER_SEC: f64 = 125_000_000.0;

struct NetworkSample {
    networks: Networks,
    last_refresh: Instant,
}

/// Reads the host via `sysinfo`. I/O utilization, sessions and battery are
/// not exposed by sysinfo and report [`MetricError::Unsupported`].
pub struct SysinfoMetricSource {
    sys: Mutex<System>,
    network: Mutex<NetworkSample>,
}

impl SysinfoMetricSource {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
            network: Mutex::new(NetworkSample {
                networks: Networks::new_with_refreshed_list(),
                last_refresh: Instant::now(),
            }),
        }
    }
}

impl Default for SysinfoMetricSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SysinfoMetricSource {
    fn cpu_usage(&self) -> Result<f64, MetricError> {
        let mut sys = self.sys.lock();
        sys.refresh_cpu();
        let percent = sys.global_cpu_info().cpu_usage() as f64;
        Ok((percent / 100.0).clamp(0.0, 1.0))
    }

    fn memory_usage(&self) -> Result<f64, MetricError> {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(MetricError::Read {
                metric: "memory_usage",
                reason: "total memory reported as zero".to_string(),
            });
        }
        Ok(sys.used_memory() as f64 / total as f64)
    }

    fn io_usage(&self) -> Result<f64, MetricError> {
        Err(MetricError::Unsupported("io_usage"))
    }

    fn network_usage(&self) -> Result<f64, MetricError> {
        let mut sample = self.network.lock();
        sample.networks.refresh();
        let elapsed = sample.last_refresh.elapsed().as_secs_f64();
        sample.last_refresh = Instant::now();

        if elapsed <= f64::EPSILON {
            return Ok(0.0);
        }

        let bytes: u64 = sample
            .networks
            .iter()
            .map(|(_, data)| data.received() + data.transmitted())
            .sum();

        Ok((bytes as f64 / elapsed / LINK_BYTES_PER_SEC).clamp(0.0, 1.0))
    }

    fn process_count(&self) -> Result<u32, MetricError> {
        let mut sys = self.sys.lock();
        sys.refresh_processes();
        Ok(sys.processes().len() as u32)
    }

    fn user_count(&self) -> Result<u32, MetricError> {
        Err(MetricError::Unsupported("user_count"))
    }

    fn power_state(&self) -> Result<PowerState, MetricError> {
        Err(MetricError::Unsupported("power_state"))
    }
}
