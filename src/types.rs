//! RayOS AI Init
//!
//! Core data structures for state sampling, inference and the directives
//! handed to the process manager and resource governor.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete, consistent copy of machine state at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// When the system came up
    pub boot_time: DateTime<Utc>,
    /// When this snapshot was assembled
    pub last_update: DateTime<Utc>,
    /// CPU utilization (0.0 - 1.0)
    pub cpu_usage: f64,
    /// Memory utilization (0.0 - 1.0)
    pub memory_usage: f64,
    /// I/O utilization (0.0 - 1.0)
    pub io_usage: f64,
    /// Network utilization (0.0 - 1.0)
    pub network_usage: f64,
    /// Running processes
    pub process_count: u32,
    /// Logged-in users
    pub user_count: u32,
    /// Battery level (0.0 - 100.0)
    pub battery_level: f64,
    pub on_ac_power: bool,
}

impl SystemState {
    pub const BATTERY_FULL: f64 = 100.0;

    /// State at boot: idle, fully charged, on AC power
    pub fn initial(boot_time: DateTime<Utc>) -> Self {
        Self {
            boot_time,
            last_update: boot_time,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            io_usage: 0.0,
            network_usage: 0.0,
            process_count: 0,
            user_count: 0,
            battery_level: Self::BATTERY_FULL,
            on_ac_power: true,
        }
    }

    /// Force every bounded field back into its declared range.
    /// NaN collapses to the lower bound.
    pub fn clamped(mut self) -> Self {
        self.cpu_usage = clamp_ratio(self.cpu_usage);
        self.memory_usage = clamp_ratio(self.memory_usage);
        self.io_usage = clamp_ratio(self.io_usage);
        self.network_usage = clamp_ratio(self.network_usage);
        self.battery_level = if self.battery_level.is_nan() {
            0.0
        } else {
            self.battery_level.clamp(0.0, Self::BATTERY_FULL)
        };
        self
    }

    /// Time elapsed between boot and this snapshot (zero if the clock went backwards)
    pub fn uptime(&self) -> Duration {
        (self.last_update - self.boot_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

pub(crate) fn clamp_ratio(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Out-of-bound condition detected in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// CPU usage above threshold
    CpuOverload,
    /// Memory usage above threshold
    MemoryPressure,
    /// Running on battery with the charge nearly exhausted
    LowBattery,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::CpuOverload => write!(f, "cpu-overload"),
            AnomalyKind::MemoryPressure => write!(f, "memory-pressure"),
            AnomalyKind::LowBattery => write!(f, "low-battery"),
        }
    }
}

/// Which decision task a model, tensor or operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurposeKind {
    Boot,
    ResourcePolicy,
    Adjustment,
}

impl fmt::Display for PurposeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurposeKind::Boot => write!(f, "boot"),
            PurposeKind::ResourcePolicy => write!(f, "resource-policy"),
            PurposeKind::Adjustment => write!(f, "adjustment"),
        }
    }
}

// =============================================================================
// Directives
// =============================================================================

/// A named process to launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub name: String,
    pub essential: bool,
}

/// Processes launched together
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessGroup {
    pub processes: Vec<ProcessEntry>,
    /// The next group must not start until this one has completed
    pub wait_for_completion: bool,
}

impl ProcessGroup {
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }
}

/// Ordered launch plan. Group order is launch order; the end of the sequence
/// terminates the plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BootPlan {
    pub groups: Vec<ProcessGroup>,
}

impl BootPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total processes across all groups
    pub fn process_count(&self) -> usize {
        self.groups.iter().map(ProcessGroup::len).sum()
    }

    /// Process names in launch order
    pub fn launch_order(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.processes.iter().map(|p| p.name.as_str()))
    }
}

/// Most favoured I/O / network priority
pub const PRIORITY_HIGHEST: u8 = 1;
/// Least favoured I/O / network priority
pub const PRIORITY_LOWEST: u8 = 5;

/// Quotas for a single process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAssignment {
    pub process: String,
    /// CPU quota (1 - 100 percent)
    pub cpu_quota_percent: u8,
    /// Memory limit (MiB)
    pub memory_limit_mb: u64,
    /// I/O priority (1 = highest, 5 = lowest)
    pub io_priority: u8,
    /// Network priority (1 = highest, 5 = lowest)
    pub network_priority: u8,
}

/// Per-process quotas, unordered
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourcePolicy {
    pub assignments: Vec<ResourceAssignment>,
}

impl ResourcePolicy {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn get(&self, process: &str) -> Option<&ResourceAssignment> {
        self.assignments.iter().find(|a| a.process == process)
    }
}

/// What to do to a running (or stopped) process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentAction {
    Start,
    Stop,
    Restart,
    /// Re-prioritize on the nice scale (-20 most favoured, 19 least)
    AdjustPriority { priority: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessAdjustment {
    pub process: String,
    pub action: AdjustmentAction,
}

/// Advisory adjustments, consumed once by the process manager
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessAdjustments {
    pub adjustments: Vec<ProcessAdjustment>,
}

impl ProcessAdjustments {
    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adjustments.len()
    }
}

// =============================================================================
// Service catalog
// =============================================================================

/// A service the init system knows how to launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub essential: bool,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, essential: bool) -> Self {
        Self {
            name: name.into(),
            essential,
        }
    }
}

/// Ordered list of services. Index `i` of a model output refers to entry `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCatalog {
    services: Vec<ServiceSpec>,
}

impl ServiceCatalog {
    pub fn new(services: Vec<ServiceSpec>) -> Self {
        Self { services }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.iter()
    }

    /// Plan that needs no model: essential services first (gated), then the rest.
    pub fn static_boot_plan(&self) -> BootPlan {
        let (essential, optional): (Vec<_>, Vec<_>) =
            self.services.iter().partition(|s| s.essential);

        let to_group = |specs: Vec<&ServiceSpec>, wait| ProcessGroup {
            processes: specs
                .into_iter()
                .map(|s| ProcessEntry {
                    name: s.name.clone(),
                    essential: s.essential,
                })
                .collect(),
            wait_for_completion: wait,
        };

        let groups = [to_group(essential, true), to_group(optional, false)]
            .into_iter()
            .filter(|g| !g.is_empty())
            .collect();

        BootPlan { groups }
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::new(default_services())
    }
}

fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("kernel-log", true),
        ServiceSpec::new("device-manager", true),
        ServiceSpec::new("filesystem", true),
        ServiceSpec::new("network", false),
        ServiceSpec::new("power-manager", false),
        ServiceSpec::new("display-server", false),
        ServiceSpec::new("session-manager", true),
        ServiceSpec::new("indexer", false),
    ]
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the AI init core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiInitConfig {
    pub sampler: SamplerConfig,
    pub models: ModelConfig,
    pub decoder: DecoderConfig,
    pub telemetry: TelemetryConfig,
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Tick interval (ms)
    pub interval_ms: u64,
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Model names resolved by the inference backend, one per purpose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub boot: String,
    pub resource: String,
    pub adjustment: String,
    /// Directory the reference backend resolves model names against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
}

impl ModelConfig {
    pub fn name_for(&self, purpose: PurposeKind) -> &str {
        match purpose {
            PurposeKind::Boot => &self.boot,
            PurposeKind::ResourcePolicy => &self.resource,
            PurposeKind::Adjustment => &self.adjustment,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            boot: "boot_model.onnx".to_string(),
            resource: "resource_model.onnx".to_string(),
            adjustment: "process_model.onnx".to_string(),
            model_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Memory handed out by a full-scale model output (MiB)
    pub memory_budget_mb: u64,
    /// Upper bound on launch groups in a boot plan
    pub max_boot_groups: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            memory_budget_mb: 4096,
            max_boot_groups: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Events kept by the recording sink
    pub history: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { history: 1024 }
    }
}

impl Default for AiInitConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            models: ModelConfig::default(),
            decoder: DecoderConfig::default(),
            telemetry: TelemetryConfig::default(),
            services: default_services(),
        }
    }
}

impl AiInitConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AiInitConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampler.interval_ms == 0 {
            return Err(ConfigError::Invalid("sampler.interval_ms must be non-zero".into()));
        }
        if self.services.is_empty() {
            return Err(ConfigError::Invalid("at least one service is required".into()));
        }
        if self.decoder.max_boot_groups == 0 {
            return Err(ConfigError::Invalid("decoder.max_boot_groups must be at least 1".into()));
        }
        for purpose in [PurposeKind::Boot, PurposeKind::ResourcePolicy, PurposeKind::Adjustment] {
            if self.models.name_for(purpose).trim().is_empty() {
                return Err(ConfigError::Invalid(format!("model name for {} is empty", purpose)));
            }
        }
        Ok(())
    }

    pub fn catalog(&self) -> ServiceCatalog {
        ServiceCatalog::new(self.services.clone())
    }
}
