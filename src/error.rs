//! Error taxonomy
//!
//! - [`InitError`]: startup cannot proceed (no safe fallback boot plan)
//! - [`MetricError`]: one metric query failed during a tick
//! - [`ModelError`]: inference backend load/infer failures
//! - [`EngineError`]: a directive could not be produced, or a reload failed
//! - [`ConfigError`]: configuration could not be read or is invalid

use crate::types::PurposeKind;
use thiserror::Error;

/// Fatal startup conditions
#[derive(Debug, Error)]
pub enum InitError {
    #[error("inference backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("failed to load {purpose} model: {source}")]
    ModelLoad {
        purpose: PurposeKind,
        #[source]
        source: ModelError,
    },

    #[error("failed to spawn sampler loop: {0}")]
    SamplerSpawn(String),

    #[error("sampler loop terminated abnormally: {0}")]
    SamplerJoin(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A single metric query failed
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("metric '{0}' is not supported by this source")]
    Unsupported(&'static str),

    #[error("failed to read metric '{metric}': {reason}")]
    Read { metric: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("backend not ready: {0}")]
    BackendUnavailable(String),

    #[error("cannot load model '{name}': {reason}")]
    Load { name: String, reason: String },

    #[error("inference failed on model '{model}': {reason}")]
    Inference { model: String, reason: String },
}

/// A learning engine operation could not produce its directive
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{purpose} inference failed: {source}")]
    Inference {
        purpose: PurposeKind,
        #[source]
        source: ModelError,
    },

    #[error("reloading {purpose} model failed, keeping current models: {source}")]
    Reload {
        purpose: PurposeKind,
        #[source]
        source: ModelError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
