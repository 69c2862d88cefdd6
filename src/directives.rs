//! Consumers of Learning Engine output
//!
//! The process manager and resource governor live outside this crate; these
//! traits are what they implement to receive directives.

use crate::types::{BootPlan, ProcessAdjustments, ResourcePolicy};

pub trait ProcessManager: Send + Sync {
    /// Launch the plan group by group, in order. A group with
    /// `wait_for_completion` set must finish before the next one starts.
    fn launch_plan(&self, plan: BootPlan);

    fn apply_adjustments(&self, adjustments: ProcessAdjustments);
}

pub trait ResourceGovernor: Send + Sync {
    fn apply_policy(&self, policy: ResourcePolicy);
}

/// Logs directives instead of carrying them out
#[derive(Debug, Default)]
pub struct LogDirectives;

impl ProcessManager for LogDirectives {
    fn launch_plan(&self, plan: BootPlan) {
        for (index, group) in plan.groups.iter().enumerate() {
            let names: Vec<&str> = group.processes.iter().map(|p| p.name.as_str()).collect();
            log::info!(
                "Boot group {}: [{}]{}",
                index,
                names.join(", "),
                if group.wait_for_completion { " (wait)" } else { "" }
            );
        }
    }

    fn apply_adjustments(&self, adjustments: ProcessAdjustments) {
        for adjustment in &adjustments.adjustments {
            log::info!("Adjust {}: {:?}", adjustment.process, adjustment.action);
        }
    }
}

impl ResourceGovernor for LogDirectives {
    fn apply_policy(&self, policy: ResourcePolicy) {
        for a in &policy.assignments {
            log::info!(
                "Quota {}: cpu {}%, mem {} MiB, io {}, net {}",
                a.process,
                a.cpu_quota_percent,
                a.memory_limit_mb,
                a.io_priority,
                a.network_priority
            );
        }
    }
}
