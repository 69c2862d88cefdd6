//! # RayOS AI Init - learned boot sequencing and resource policy
//!
//! Keeps a live snapshot of machine state and turns it into directives with
//! three purpose-specific models.
//!
//! ## Architecture
//!
//! - **State Store**: the one current snapshot, swapped atomically
//! - **Sampler**: periodic task feeding the store, anomaly detection and telemetry
//! - **Learning Engine**: snapshot → tensor → model → directive, per purpose
//! - **Directives**: boot plans, resource policies and live adjustments handed
//!   to the process manager and resource governor
//!
//! ## Example
//!
//! ```no_run
//! use rayos_ai_init::{AiInit, AiInitConfig, LogDirectives, LogTelemetry, ScalingBackend, SimulatedMetricSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AiInitConfig::default();
//!     let backend = Arc::new(ScalingBackend::from_config(&config.models));
//!     let mut ai = AiInit::new(
//!         config,
//!         Arc::new(SimulatedMetricSource::new()),
//!         backend,
//!         Arc::new(LogTelemetry),
//!     )?;
//!
//!     ai.start()?;
//!     ai.boot(&LogDirectives, &LogDirectives)?;
//!     ai.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod anomaly;
pub mod decoder;
pub mod directives;
pub mod engine;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod sampler;
pub mod state_store;
pub mod telemetry;
pub mod tensor;
pub mod types;

pub use anomaly::AnomalyDetector;
pub use decoder::Decoder;
pub use directives::{LogDirectives, ProcessManager, ResourceGovernor};
pub use engine::{EngineStatistics, LearningEngine};
pub use error::{ConfigError, EngineError, InitError, MetricError, ModelError};
pub use inference::{
    AdjustmentModel, BootModel, InferenceBackend, ModelHandle, ResourcePolicyModel, ScalingBackend,
};
pub use metrics::{MetricSource, PowerState, SimulatedMetricSource, SysinfoMetricSource};
pub use sampler::{Sampler, SamplerHandle};
pub use state_store::StateStore;
pub use telemetry::{LogTelemetry, RecordingTelemetry, TelemetryEvent, TelemetrySink};
pub use tensor::Tensor;
pub use types::*;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Wires the store, sampler and learning engine together
pub struct AiInit {
    config: AiInitConfig,
    store: Arc<StateStore>,
    engine: Arc<LearningEngine>,
    source: Arc<dyn MetricSource>,
    telemetry: Arc<dyn TelemetrySink>,
    sampler: Option<SamplerHandle>,
}

impl AiInit {
    /// Validate the config, seed the store and load all models.
    ///
    /// Model names are resolved by `backend`; `config.models.model_dir` only
    /// applies to a backend built from it, e.g. [`ScalingBackend::from_config`].
    /// Fails if the backend is unavailable or any model cannot load.
    pub fn new(
        config: AiInitConfig,
        source: Arc<dyn MetricSource>,
        backend: Arc<dyn InferenceBackend>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, InitError> {
        config.validate()?;

        log::info!("═══════════════════════════════════════");
        log::info!("  RayOS AI Init");
        log::info!("═══════════════════════════════════════");
        log::info!("Sample interval: {}ms", config.sampler.interval_ms);
        log::info!("Services: {}", config.services.len());

        let store = Arc::new(StateStore::new(SystemState::initial(Utc::now())));
        let decoder = Decoder::new(config.catalog(), &config.decoder);
        let engine = Arc::new(LearningEngine::new(
            backend,
            config.models.clone(),
            decoder,
            telemetry.clone(),
        )?);

        Ok(Self {
            config,
            store,
            engine,
            source,
            telemetry,
            sampler: None,
        })
    }

    /// Spawn the sampler loop. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), InitError> {
        if self.sampler.is_some() {
            return Ok(());
        }

        let sampler = Sampler::new(self.store.clone(), self.source.clone(), self.telemetry.clone());
        self.sampler = Some(sampler.spawn(self.config.sampler.interval())?);
        Ok(())
    }

    /// Stop the sampler and wait for it. Returns the number of ticks run.
    pub async fn shutdown(&mut self) -> Result<u64, InitError> {
        match self.sampler.take() {
            Some(handle) => handle.stop().await,
            None => Ok(0),
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.as_ref().is_some_and(|h| h.is_running())
    }

    /// Change the sampling interval; a running sampler picks it up at its next tick
    pub fn set_interval(&mut self, interval: Duration) {
        self.config.sampler.interval_ms = interval.as_millis().max(1) as u64;
        if let Some(handle) = &self.sampler {
            handle.set_interval(interval);
        }
    }

    pub fn snapshot(&self) -> SystemState {
        self.store.get()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<LearningEngine> {
        &self.engine
    }

    pub fn config(&self) -> &AiInitConfig {
        &self.config
    }

    /// Plan the boot from the current snapshot: quotas go to the governor
    /// first, then the plan to the process manager.
    ///
    /// Nothing is dispatched unless both directives were produced.
    pub fn boot(
        &self,
        manager: &dyn ProcessManager,
        governor: &dyn ResourceGovernor,
    ) -> Result<(), EngineError> {
        let state = self.snapshot();
        let plan = self.engine.generate_boot_plan(&state)?;
        let policy = self.engine.generate_resource_policy(&state)?;

        governor.apply_policy(policy);
        manager.launch_plan(plan);
        Ok(())
    }

    /// Catalog-order plan for callers that choose to boot without a model
    pub fn fallback_boot_plan(&self) -> BootPlan {
        self.engine.decoder().catalog().static_boot_plan()
    }

    /// Ask for live adjustments and hand them over. Returns how many there were.
    pub fn adjust(&self, manager: &dyn ProcessManager) -> Result<usize, EngineError> {
        let adjustments = self.engine.process_adjustments(&self.snapshot())?;
        let count = adjustments.len();
        if count > 0 {
            manager.apply_adjustments(adjustments);
        }
        Ok(count)
    }

    pub fn statistics(&self) -> EngineStatistics {
        self.engine.statistics()
    }
}
