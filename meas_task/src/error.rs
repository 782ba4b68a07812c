use shared::image_proc::noise::NoiseError;
use thiserror::Error;

use crate::algorithms::{AlgorithmError, AlgorithmKind};
use crate::table::SchemaError;

/// Configuration errors, always raised before the exposure is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No factory is registered under this name.
    #[error("unknown measurement algorithm '{name}'")]
    UnknownAlgorithm { name: String },

    /// Name registered or scheduled more than once.
    #[error("measurement algorithm '{name}' appears more than once")]
    DuplicateAlgorithm { name: String },

    /// The centroider must not also be in the algorithm list.
    #[error("centroider '{name}' is also listed in algorithms")]
    CentroiderInAlgorithms { name: String },

    /// The centroider must produce a centroid.
    #[error("centroider '{name}' is a {kind:?} algorithm, not a centroid")]
    CentroiderNotCentroid { name: String, kind: AlgorithmKind },

    /// A slot names an algorithm that is not scheduled to run.
    #[error("{slot} slot '{name}' does not match any scheduled algorithm")]
    SlotNotScheduled { slot: &'static str, name: String },

    /// References and sources must pair up positionally.
    #[error("number of sources ({sources}) and references ({references}) don't match")]
    ReferenceLengthMismatch { sources: usize, references: usize },

    /// Forced measurement was requested without a reference WCS.
    #[error("references were given without a reference WCS")]
    MissingReferenceWcs,

    #[error("invalid parameters for '{algorithm}': {source}")]
    InvalidParams {
        algorithm: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration for '{algorithm}': {reason}")]
    InvalidAlgorithm { algorithm: String, reason: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("failed to read or write configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from the noise replacement protocol.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplaceError {
    #[error("noise generation failed: {0}")]
    Noise(#[from] NoiseError),

    #[error("noise replacement is already active on this exposure")]
    AlreadyActive,

    #[error("noise replacement has not begun")]
    NotActive,

    #[error("source index {index} out of range for {len} sources")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("source id {id} was not part of the replaced catalog")]
    UnknownSource { id: u64 },

    #[error("catalog has {actual} sources, noise replacement began with {expected}")]
    CatalogMismatch { expected: usize, actual: usize },
}

/// Everything `measure` can fail with.
#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Replace(#[from] ReplaceError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("measuring source {id} failed: {source}")]
    Algorithm {
        id: u64,
        #[source]
        source: AlgorithmError,
    },
}
