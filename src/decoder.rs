//! Decoder Layer - turns inference output buffers into directives
//!
//! This is the only place that knows how model outputs are shaped. Slot `i`
//! of every output refers to service `i` of the [`ServiceCatalog`]. Decoding
//! never reads past the tensor and always yields a well-formed directive;
//! short, empty or garbage buffers degrade to fewer (or no) entries.

use crate::tensor::Tensor;
use crate::types::{
    AdjustmentAction, BootPlan, DecoderConfig, ProcessAdjustment, ProcessAdjustments,
    ProcessEntry, ProcessGroup, ResourceAssignment, ResourcePolicy, ServiceCatalog,
    PRIORITY_HIGHEST, PRIORITY_LOWEST,
};

/// Values per service in a resource policy output: cpu, memory, io, network
pub const RESOURCE_RECORD_LEN: usize = 4;
/// Values per service in an adjustment output: action, priority
pub const ADJUSTMENT_RECORD_LEN: usize = 2;

const NICE_MIN: i32 = -20;
const NICE_MAX: i32 = 19;

#[derive(Debug, Clone)]
pub struct Decoder {
    catalog: ServiceCatalog,
    memory_budget_mb: u64,
    max_boot_groups: usize,
}

impl Decoder {
    pub fn new(catalog: ServiceCatalog, config: &DecoderConfig) -> Self {
        Self {
            catalog,
            memory_budget_mb: config.memory_budget_mb,
            max_boot_groups: config.max_boot_groups.max(1),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// One launch score per service.
    ///
    /// A score in `[0, 1]` picks group `floor(score * G)`. Negative,
    /// non-finite or missing scores skip a service, except that essential
    /// services always launch (in the first group). A group that holds an
    /// essential service gates the next one.
    pub fn decode_boot_plan(&self, output: &Tensor) -> BootPlan {
        let mut buckets: Vec<Vec<ProcessEntry>> = vec![Vec::new(); self.max_boot_groups];

        for (index, service) in self.catalog.iter().enumerate() {
            let score = output.get(index).unwrap_or(f32::NAN);

            let group = if score.is_finite() && score >= 0.0 {
                let scaled = (score.min(1.0) * self.max_boot_groups as f32) as usize;
                scaled.min(self.max_boot_groups - 1)
            } else if service.essential {
                0
            } else {
                continue;
            };

            buckets[group].push(ProcessEntry {
                name: service.name.clone(),
                essential: service.essential,
            });
        }

        let groups = buckets
            .into_iter()
            .filter(|processes| !processes.is_empty())
            .map(|processes| ProcessGroup {
                wait_for_completion: processes.iter().any(|p| p.essential),
                processes,
            })
            .collect();

        BootPlan { groups }
    }

    /// Four values per service: cpu share, memory share, io and network urgency.
    /// Only complete, finite records produce an assignment.
    pub fn decode_resource_policy(&self, output: &Tensor) -> ResourcePolicy {
        let assignments = output
            .as_slice()
            .chunks_exact(RESOURCE_RECORD_LEN)
            .zip(self.catalog.iter())
            .filter(|(record, _)| record.iter().all(|v| v.is_finite()))
            .map(|(record, service)| ResourceAssignment {
                process: service.name.clone(),
                cpu_quota_percent: (record[0] * 100.0).round().clamp(1.0, 100.0) as u8,
                memory_limit_mb: (unit(record[1]) as f64 * self.memory_budget_mb as f64).round() as u64,
                io_priority: priority_level(record[2]),
                network_priority: priority_level(record[3]),
            })
            .collect();

        ResourcePolicy { assignments }
    }

    /// Two values per service: action code and priority.
    ///
    /// Action code buckets (fifths of `[0, 1]`): none, start, stop, restart,
    /// adjust priority. Priority maps `[0, 1]` onto the nice range -20..=19.
    pub fn decode_adjustments(&self, output: &Tensor) -> ProcessAdjustments {
        let adjustments = output
            .as_slice()
            .chunks_exact(ADJUSTMENT_RECORD_LEN)
            .zip(self.catalog.iter())
            .filter_map(|(record, service)| {
                let action = decode_action(record[0], record[1])?;
                Some(ProcessAdjustment {
                    process: service.name.clone(),
                    action,
                })
            })
            .collect();

        ProcessAdjustments { adjustments }
    }
}

/// Clamp into `[0, 1]`
fn unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// 0.0 -> most favoured, 1.0 -> least favoured
fn priority_level(value: f32) -> u8 {
    let span = (PRIORITY_LOWEST - PRIORITY_HIGHEST) as f32;
    PRIORITY_HIGHEST + (unit(value) * span).round() as u8
}

fn decode_action(code: f32, priority: f32) -> Option<AdjustmentAction> {
    if !code.is_finite() {
        return None;
    }

    match ((unit(code) * 5.0) as u32).min(4) {
        0 => None,
        1 => Some(AdjustmentAction::Start),
        2 => Some(AdjustmentAction::Stop),
        3 => Some(AdjustmentAction::Restart),
        _ => {
            if !priority.is_finite() {
                return None;
            }
            let span = (NICE_MAX - NICE_MIN) as f32;
            let nice = NICE_MIN + (unit(priority) * span).round() as i32;
            Some(AdjustmentAction::AdjustPriority { priority: nice })
        }
    }
}
