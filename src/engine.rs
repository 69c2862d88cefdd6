//! Learning Engine - snapshot → encode → infer → decode
//!
//! Owns one model per purpose. Each operation captures the handle that is
//! current when it starts; `refresh_models` swaps in freshly loaded handles
//! without disturbing calls already in flight, and an old model is unloaded
//! once the last call using it has finished.

use crate::decoder::Decoder;
use crate::error::{EngineError, InitError, ModelError};
use crate::inference::{
    AdjustmentModel, BootModel, InferenceBackend, ModelHandle, Purpose, ResourcePolicyModel,
};
use crate::telemetry::TelemetrySink;
use crate::tensor::{self, Tensor};
use crate::types::{
    BootPlan, ModelConfig, ProcessAdjustments, PurposeKind, ResourcePolicy, SystemState,
};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

struct ModelSet {
    boot: ModelHandle<BootModel>,
    resource: ModelHandle<ResourcePolicyModel>,
    adjustment: ModelHandle<AdjustmentModel>,
}

/// Load all three models or none. On failure, whatever was already loaded is
/// dropped (and unloaded) before returning.
fn load_models(
    backend: &Arc<dyn InferenceBackend>,
    models: &ModelConfig,
) -> Result<ModelSet, (PurposeKind, ModelError)> {
    let boot = ModelHandle::load(backend.clone(), &models.boot)
        .map_err(|e| (PurposeKind::Boot, e))?;
    let resource = ModelHandle::load(backend.clone(), &models.resource)
        .map_err(|e| (PurposeKind::ResourcePolicy, e))?;
    let adjustment = ModelHandle::load(backend.clone(), &models.adjustment)
        .map_err(|e| (PurposeKind::Adjustment, e))?;

    Ok(ModelSet {
        boot,
        resource,
        adjustment,
    })
}

#[derive(Default)]
struct EngineStats {
    inferences: AtomicU64,
    failures: AtomicU64,
    refreshes: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatistics {
    pub inferences: u64,
    pub failures: u64,
    pub refreshes: u64,
}

pub struct LearningEngine {
    backend: Arc<dyn InferenceBackend>,
    models: ModelConfig,
    decoder: Decoder,
    telemetry: Arc<dyn TelemetrySink>,

    boot: ArcSwap<ModelHandle<BootModel>>,
    resource: ArcSwap<ModelHandle<ResourcePolicyModel>>,
    adjustment: ArcSwap<ModelHandle<AdjustmentModel>>,

    /// Serializes refreshes against each other (never against inference)
    refresh_lock: Mutex<()>,
    stats: EngineStats,
}

impl LearningEngine {
    /// Bring up the backend and load all three models.
    ///
    /// Any failure here is fatal: without the boot model there is no plan.
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        models: ModelConfig,
        decoder: Decoder,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, InitError> {
        log::info!(
            "Initializing Learning Engine: boot={}, resource={}, adjustment={}",
            models.boot,
            models.resource,
            models.adjustment
        );

        backend
            .init()
            .map_err(|e| InitError::BackendUnavailable(e.to_string()))?;

        let set = load_models(&backend, &models)
            .map_err(|(purpose, source)| InitError::ModelLoad { purpose, source })?;

        Ok(Self {
            backend,
            models,
            decoder,
            telemetry,
            boot: ArcSwap::from_pointee(set.boot),
            resource: ArcSwap::from_pointee(set.resource),
            adjustment: ArcSwap::from_pointee(set.adjustment),
            refresh_lock: Mutex::new(()),
            stats: EngineStats::default(),
        })
    }

    /// Launch order for the given machine state
    pub fn generate_boot_plan(&self, state: &SystemState) -> Result<BootPlan, EngineError> {
        let model = self.boot.load_full();
        let output = self.infer(&*model, state)?;
        let plan = self.decoder.decode_boot_plan(&output);
        output.release();

        log::info!(
            "Boot plan: {} groups, {} processes",
            plan.groups.len(),
            plan.process_count()
        );
        Ok(plan)
    }

    /// Per-process quotas for the given machine state
    pub fn generate_resource_policy(&self, state: &SystemState) -> Result<ResourcePolicy, EngineError> {
        let model = self.resource.load_full();
        let output = self.infer(&*model, state)?;
        let policy = self.decoder.decode_resource_policy(&output);
        output.release();

        log::debug!("Resource policy: {} assignments", policy.assignments.len());
        Ok(policy)
    }

    /// Live start/stop/re-prioritize advice for the given machine state
    pub fn process_adjustments(&self, state: &SystemState) -> Result<ProcessAdjustments, EngineError> {
        let model = self.adjustment.load_full();
        let output = self.infer(&*model, state)?;
        let adjustments = self.decoder.decode_adjustments(&output);
        output.release();

        log::debug!("Process adjustments: {}", adjustments.len());
        Ok(adjustments)
    }

    fn infer<P: Purpose>(&self, model: &ModelHandle<P>, state: &SystemState) -> Result<Tensor, EngineError> {
        let input = tensor::encode(state);

        let start = Instant::now();
        let result = model.infer(&input);
        let latency = start.elapsed();
        input.release();

        self.stats.inferences.fetch_add(1, Ordering::Relaxed);
        self.telemetry.record_inference(P::KIND, latency, result.is_ok());

        result.map_err(|source| {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            log::error!("{} inference on '{}' failed: {}", P::KIND, model.name(), source);
            EngineError::Inference {
                purpose: P::KIND,
                source,
            }
        })
    }

    /// Reload all three models and swap them in atomically.
    ///
    /// All-or-nothing: if any load fails the current models stay in place.
    /// Calls already running finish on the handles they captured.
    pub fn refresh_models(&self) -> Result<(), EngineError> {
        let _guard = self.refresh_lock.lock();
        log::info!("Refreshing models");

        let set = load_models(&self.backend, &self.models)
            .map_err(|(purpose, source)| EngineError::Reload { purpose, source })?;

        self.boot.store(Arc::new(set.boot));
        self.resource.store(Arc::new(set.resource));
        self.adjustment.store(Arc::new(set.adjustment));

        self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn boot_model(&self) -> Arc<ModelHandle<BootModel>> {
        self.boot.load_full()
    }

    pub fn resource_model(&self) -> Arc<ModelHandle<ResourcePolicyModel>> {
        self.resource.load_full()
    }

    pub fn adjustment_model(&self) -> Arc<ModelHandle<AdjustmentModel>> {
        self.adjustment.load_full()
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            inferences: self.stats.inferences.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            refreshes: self.stats.refreshes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{LoadedModel, RawModelId, ScalingBackend};
    use crate::telemetry::RecordingTelemetry;
    use crate::types::{DecoderConfig, ServiceCatalog};
    use chrono::Utc;
    use std::sync::mpsc;

    /// Fails to load one named model
    struct RefusingBackend {
        inner: ScalingBackend,
        refuse: &'static str,
    }

    impl InferenceBackend for RefusingBackend {
        fn init(&self) -> Result<(), ModelError> {
            self.inner.init()
        }

        fn load(&self, name: &str) -> Result<LoadedModel, ModelError> {
            if name == self.refuse {
                return Err(ModelError::Load {
                    name: name.to_string(),
                    reason: "corrupt".to_string(),
                });
            }
            self.inner.load(name)
        }

        fn infer(&self, model: RawModelId, input: &Tensor) -> Result<Tensor, ModelError> {
            self.inner.infer(model, input)
        }

        fn unload(&self, model: RawModelId) {
            self.inner.unload(model)
        }
    }

    /// Loads fine, never infers
    struct BrokenBackend(ScalingBackend);

    impl InferenceBackend for BrokenBackend {
        fn init(&self) -> Result<(), ModelError> {
            self.0.init()
        }

        fn load(&self, name: &str) -> Result<LoadedModel, ModelError> {
            self.0.load(name)
        }

        fn infer(&self, model: RawModelId, _input: &Tensor) -> Result<Tensor, ModelError> {
            Err(ModelError::Inference {
                model: model.0.to_string(),
                reason: "device lost".to_string(),
            })
        }

        fn unload(&self, model: RawModelId) {
            self.0.unload(model)
        }
    }

    /// Parks the first inference until the test lets it go
    struct GatedBackend {
        inner: ScalingBackend,
        gated: std::sync::atomic::AtomicBool,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl InferenceBackend for GatedBackend {
        fn init(&self) -> Result<(), ModelError> {
            self.inner.init()
        }

        fn load(&self, name: &str) -> Result<LoadedModel, ModelError> {
            self.inner.load(name)
        }

        fn infer(&self, model: RawModelId, input: &Tensor) -> Result<Tensor, ModelError> {
            if !self.gated.swap(true, Ordering::SeqCst) {
                let _ = self.entered.lock().send(());
                let _ = self.release.lock().recv();
            }
            self.inner.infer(model, input)
        }

        fn unload(&self, model: RawModelId) {
            self.inner.unload(model)
        }
    }

    fn decoder() -> Decoder {
        Decoder::new(ServiceCatalog::default(), &DecoderConfig::default())
    }

    #[test]
    fn test_refresh_during_inference_keeps_old_model_until_done() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let backend = Arc::new(GatedBackend {
            inner: ScalingBackend::new(),
            gated: std::sync::atomic::AtomicBool::new(false),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });

        let engine = Arc::new(
            LearningEngine::new(
                backend.clone(),
                ModelConfig::default(),
                decoder(),
                Arc::new(RecordingTelemetry::default()),
            )
            .unwrap(),
        );
        let old_id = engine.boot_model().id();

        let worker = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.generate_boot_plan(&SystemState::initial(Utc::now())))
        };

        entered_rx.recv().unwrap();
        engine.refresh_models().unwrap();

        // Three new models plus the boot model still in use
        assert_ne!(engine.boot_model().id(), old_id);
        assert_eq!(backend.inner.loaded_models(), 4);

        release_tx.send(()).unwrap();
        let plan = worker.join().unwrap().unwrap();

        assert!(!plan.is_empty());
        assert_eq!(backend.inner.loaded_models(), 3);
    }

    #[test]
    fn test_partial_load_is_fatal_and_releases_loaded_models() {
        let backend = Arc::new(RefusingBackend {
            inner: ScalingBackend::new(),
            refuse: "resource_model.onnx",
        });

        let result = LearningEngine::new(
            backend.clone(),
            ModelConfig::default(),
            decoder(),
            Arc::new(RecordingTelemetry::default()),
        );

        assert!(matches!(
            result,
            Err(InitError::ModelLoad {
                purpose: PurposeKind::ResourcePolicy,
                ..
            })
        ));
        assert_eq!(backend.inner.loaded_models(), 0);
    }

    #[test]
    fn test_unavailable_backend_is_fatal() {
        let backend = Arc::new(ScalingBackend::new().with_model_dir("/nonexistent/rayos/models"));
        let result = LearningEngine::new(
            backend,
            ModelConfig::default(),
            decoder(),
            Arc::new(RecordingTelemetry::default()),
        );

        assert!(matches!(result, Err(InitError::BackendUnavailable(_))));
    }

    #[test]
    fn test_inference_failure_is_surfaced() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = LearningEngine::new(
            Arc::new(BrokenBackend(ScalingBackend::new())),
            ModelConfig::default(),
            decoder(),
            telemetry.clone(),
        )
        .unwrap();

        let state = SystemState::initial(Utc::now());
        let result = engine.generate_boot_plan(&state);

        assert!(matches!(
            result,
            Err(EngineError::Inference {
                purpose: PurposeKind::Boot,
                ..
            })
        ));
        assert_eq!(
            engine.statistics(),
            EngineStatistics {
                inferences: 1,
                failures: 1,
                refreshes: 0
            }
        );
        assert_eq!(telemetry.inference_count(), 1);
    }

    #[test]
    fn test_refresh_swaps_handles_and_unloads_old_ones() {
        let backend = Arc::new(ScalingBackend::new());
        let engine = LearningEngine::new(
            backend.clone(),
            ModelConfig::default(),
            decoder(),
            Arc::new(RecordingTelemetry::default()),
        )
        .unwrap();

        let before = engine.boot_model().id();
        assert_eq!(backend.loaded_models(), 3);

        engine.refresh_models().unwrap();

        assert_ne!(engine.boot_model().id(), before);
        assert_eq!(backend.loaded_models(), 3);
        assert_eq!(engine.statistics().refreshes, 1);
    }

    #[test]
    fn test_failed_refresh_keeps_current_models() {
        let backend = Arc::new(ScalingBackend::new());
        let mut models = ModelConfig::default();
        let engine = LearningEngine::new(
            backend.clone(),
            models.clone(),
            decoder(),
            Arc::new(RecordingTelemetry::default()),
        )
        .unwrap();
        let before = engine.adjustment_model().id();

        // Point the engine at a model that cannot resolve
        models.adjustment = String::new();
        let engine = LearningEngine { models, ..engine };

        let result = engine.refresh_models();
        assert!(matches!(
            result,
            Err(EngineError::Reload {
                purpose: PurposeKind::Adjustment,
                ..
            })
        ));
        assert_eq!(engine.adjustment_model().id(), before);
        assert_eq!(backend.loaded_models(), 3);
    }
}
