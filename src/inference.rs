//! Inference Backend boundary and typed model handles
//!
//! Model evaluation is opaque: a backend resolves model names, evaluates a
//! [`Tensor`] and hands back a new one. Handles carry their purpose in the
//! type so a boot model can never be fed to the resource-policy path:
//!
//! ```compile_fail
//! use rayos_ai_init::inference::{BootModel, ModelHandle, ResourcePolicyModel};
//!
//! fn plan_boot(_model: &ModelHandle<BootModel>) {}
//!
//! fn wrong(model: &ModelHandle<ResourcePolicyModel>) {
//!     plan_boot(model);
//! }
//! ```

use crate::error::ModelError;
use crate::tensor::Tensor;
use crate::types::{ModelConfig, PurposeKind};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Backend-assigned identifier of a loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawModelId(pub Uuid);

impl RawModelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RawModelId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a backend returns from a successful load
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub id: RawModelId,
    /// Content digest of the model, when the backend can compute one
    pub fingerprint: Option<String>,
}

pub trait InferenceBackend: Send + Sync {
    /// Bring the runtime up. Called once, before any load.
    fn init(&self) -> Result<(), ModelError> {
        Ok(())
    }

    fn load(&self, name: &str) -> Result<LoadedModel, ModelError>;

    /// Evaluate `input` without modifying it. Output length is model-defined.
    fn infer(&self, model: RawModelId, input: &Tensor) -> Result<Tensor, ModelError>;

    fn unload(&self, model: RawModelId);
}

// =============================================================================
// Purposes
// =============================================================================

pub trait Purpose: Send + Sync + 'static {
    const KIND: PurposeKind;
}

/// Boot sequencing
pub enum BootModel {}
/// Resource quotas
pub enum ResourcePolicyModel {}
/// Live process adjustments
pub enum AdjustmentModel {}

impl Purpose for BootModel {
    const KIND: PurposeKind = PurposeKind::Boot;
}

impl Purpose for ResourcePolicyModel {
    const KIND: PurposeKind = PurposeKind::ResourcePolicy;
}

impl Purpose for AdjustmentModel {
    const KIND: PurposeKind = PurposeKind::Adjustment;
}

// =============================================================================
// Handles
// =============================================================================

/// A loaded model bound to one purpose. Dropping the handle unloads the model.
pub struct ModelHandle<P: Purpose> {
    id: RawModelId,
    name: String,
    fingerprint: Option<String>,
    loaded_at: DateTime<Utc>,
    backend: Arc<dyn InferenceBackend>,
    _purpose: PhantomData<P>,
}

impl<P: Purpose> ModelHandle<P> {
    pub fn load(backend: Arc<dyn InferenceBackend>, name: &str) -> Result<Self, ModelError> {
        let loaded = backend.load(name)?;
        log::info!("Loaded {} model '{}' ({})", P::KIND, name, loaded.id.0);

        Ok(Self {
            id: loaded.id,
            name: name.to_string(),
            fingerprint: loaded.fingerprint,
            loaded_at: Utc::now(),
            backend,
            _purpose: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> RawModelId {
        self.id
    }

    pub fn purpose(&self) -> PurposeKind {
        P::KIND
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn infer(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        self.backend.infer(self.id, input)
    }

    /// Release the model now rather than when the last reference goes away
    pub fn unload(self) {
        drop(self);
    }
}

impl<P: Purpose> Drop for ModelHandle<P> {
    fn drop(&mut self) {
        log::debug!("Unloading {} model '{}' ({})", P::KIND, self.name, self.id.0);
        self.backend.unload(self.id);
    }
}

impl<P: Purpose> std::fmt::Debug for ModelHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("purpose", &P::KIND)
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

// =============================================================================
// Reference backend
// =============================================================================

const OUTPUT_SCALE: f32 = 2.0;
const OUTPUT_FACTOR: usize = 2;
const OUTPUT_PAD: f32 = 0.5;

/// Deterministic reference runtime.
///
/// Output is the input doubled, then padded with 0.5 to twice the input
/// length. With a model directory, only names that exist as files there
/// resolve, and each handle carries the file's blake3 digest.
pub struct ScalingBackend {
    model_dir: Option<PathBuf>,
    ready: AtomicBool,
    models: RwLock<HashMap<RawModelId, String>>,
}

impl ScalingBackend {
    pub fn new() -> Self {
        Self {
            model_dir: None,
            ready: AtomicBool::new(false),
            models: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    /// Backend for `models`: resolves names against `models.model_dir` when set
    pub fn from_config(models: &ModelConfig) -> Self {
        match &models.model_dir {
            Some(dir) => Self::new().with_model_dir(dir.clone()),
            None => Self::new(),
        }
    }

    /// Models currently loaded
    pub fn loaded_models(&self) -> usize {
        self.models.read().len()
    }

    fn resolve(&self, name: &str) -> Result<Option<String>, ModelError> {
        let Some(dir) = &self.model_dir else {
            return Ok(None);
        };

        let path = dir.join(name);
        if !path.is_file() {
            return Err(ModelError::Load {
                name: name.to_string(),
                reason: format!("{} not found", path.display()),
            });
        }

        let bytes = std::fs::read(&path).map_err(|e| ModelError::Load {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Some(blake3::hash(&bytes).to_hex().to_string()))
    }
}

impl Default for ScalingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for ScalingBackend {
    fn init(&self) -> Result<(), ModelError> {
        if let Some(dir) = &self.model_dir {
            if !dir.is_dir() {
                return Err(ModelError::BackendUnavailable(format!(
                    "model directory {} does not exist",
                    dir.display()
                )));
            }
        }

        log::info!("Reference inference backend ready");
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<LoadedModel, ModelError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(ModelError::BackendUnavailable("backend not initialized".to_string()));
        }
        if name.trim().is_empty() {
            return Err(ModelError::Load {
                name: name.to_string(),
                reason: "empty model name".to_string(),
            });
        }

        let fingerprint = self.resolve(name)?;
        let id = RawModelId::new();
        self.models.write().insert(id, name.to_string());

        Ok(LoadedModel { id, fingerprint })
    }

    fn infer(&self, model: RawModelId, input: &Tensor) -> Result<Tensor, ModelError> {
        let models = self.models.read();
        let Some(name) = models.get(&model) else {
            return Err(ModelError::Inference {
                model: model.0.to_string(),
                reason: "model not loaded".to_string(),
            });
        };

        log::trace!("Running inference on model: {}", name);

        let input = input.as_slice();
        let output_len = input.len() * OUTPUT_FACTOR;
        let data = (0..output_len)
            .map(|i| input.get(i).map_or(OUTPUT_PAD, |v| v * OUTPUT_SCALE))
            .collect();

        Ok(Tensor::from_vec(data))
    }

    fn unload(&self, model: RawModelId) {
        if let Some(name) = self.models.write().remove(&model) {
            log::debug!("Unloaded model: {}", name);
        }
    }
}
