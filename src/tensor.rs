//! Tensors - the only exchange format between state encoding, the inference
//! backend and directive decoding.
//!
//! A [`Tensor`] is a fixed-length `f32` buffer with a single owner. It is not
//! `Clone`; releasing it consumes it, so a released tensor cannot be read or
//! released again:
//!
//! ```compile_fail
//! use rayos_ai_init::tensor::Tensor;
//!
//! let tensor = Tensor::from_vec(vec![1.0, 2.0]);
//! tensor.release();
//! let _ = tensor.len(); // use after release
//! ```
//!
//! ```compile_fail
//! use rayos_ai_init::tensor::Tensor;
//!
//! let tensor = Tensor::from_vec(vec![1.0]);
//! tensor.release();
//! tensor.release(); // double release
//! ```

use crate::types::SystemState;
use chrono::Timelike;

#[derive(Debug, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
}

impl Tensor {
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self { data }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at `index`, or `None` past the end
    pub fn get(&self, index: usize) -> Option<f32> {
        self.data.get(index).copied()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Hand the buffer to a new owner
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Release the buffer. Consumes the tensor.
    pub fn release(self) {
        drop(self);
    }
}

/// Length of every encoded state tensor (the models' input shape)
pub const STATE_TENSOR_LEN: usize = 10;

/// Process count mapped to 1.0
const PROCESS_SCALE: f32 = 1024.0;
/// User count mapped to 1.0
const USER_SCALE: f32 = 64.0;
const SECS_PER_DAY: f32 = 86_400.0;

/// Project a snapshot onto the fixed model input layout:
///
/// | idx | feature |
/// |-----|---------|
/// | 0-3 | cpu, memory, io, network utilization |
/// | 4   | processes / 1024 (saturating at 1) |
/// | 5   | users / 64 (saturating at 1) |
/// | 6   | battery / 100 |
/// | 7   | on AC (0 or 1) |
/// | 8   | uptime in days (saturating at 1) |
/// | 9   | hour of day of the snapshot / 24 |
pub fn encode(state: &SystemState) -> Tensor {
    let state = state.clamped();
    let uptime_days = state.uptime().as_secs_f32() / SECS_PER_DAY;

    let data = vec![
        state.cpu_usage as f32,
        state.memory_usage as f32,
        state.io_usage as f32,
        state.network_usage as f32,
        (state.process_count as f32 / PROCESS_SCALE).min(1.0),
        (state.user_count as f32 / USER_SCALE).min(1.0),
        (state.battery_level / SystemState::BATTERY_FULL) as f32,
        if state.on_ac_power { 1.0 } else { 0.0 },
        uptime_days.min(1.0),
        state.last_update.hour() as f32 / 24.0,
    ];

    debug_assert_eq!(data.len(), STATE_TENSOR_LEN);
    Tensor::from_vec(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_state() -> SystemState {
        let boot = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        let mut state = SystemState::initial(boot);
        state.last_update = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap();
        state.cpu_usage = 0.5;
        state.memory_usage = 0.25;
        state.io_usage = 0.1;
        state.network_usage = 0.2;
        state.process_count = 512;
        state.user_count = 200;
        state.battery_level = 80.0;
        state.on_ac_power = false;
        state
    }

    #[test]
    fn test_encode_layout() {
        let tensor = encode(&sample_state());

        assert_eq!(tensor.len(), STATE_TENSOR_LEN);
        assert_eq!(
            tensor.as_slice(),
            &[0.5, 0.25, 0.1, 0.2, 0.5, 1.0, 0.8, 0.0, 0.5, 0.75]
        );
    }

    #[test]
    fn test_encode_is_fixed_length_for_extreme_input() {
        let mut state = sample_state();
        state.cpu_usage = f64::NAN;
        state.memory_usage = 12.0;
        state.process_count = u32::MAX;
        state.battery_level = -3.0;
        state.last_update = state.boot_time - chrono::Duration::days(2);

        let tensor = encode(&state);
        assert_eq!(tensor.len(), STATE_TENSOR_LEN);
        assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let state = sample_state();
        assert_eq!(encode(&state), encode(&state));
    }

    #[test]
    fn test_ownership_transfer() {
        let tensor = Tensor::from_vec(vec![1.0, 2.0, 3.0]);
        let data = tensor.into_vec();
        assert_eq!(data, vec![1.0, 2.0, 3.0]);

        let tensor = Tensor::zeros(4);
        assert_eq!(tensor.get(3), Some(0.0));
        assert_eq!(tensor.get(4), None);
        tensor.release();
    }
}
