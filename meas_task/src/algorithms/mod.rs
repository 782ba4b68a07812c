//! Measurement algorithm capability and the built-in algorithms.
//!
//! An algorithm declares its output fields once, when the measurer is
//! built, and then writes them for each source it is applied to. Field
//! names are scoped by the configured prefix and the algorithm's name.
//!
//! Built-ins:
//! - `centroid.naive`, `centroid.moments`
//! - `shape.moments`
//! - `flux.naive`, `flux.aperture`
//! - `flags.pixel`

pub mod centroid;
pub mod flux;
pub mod pixel_flags;
pub mod shape;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::image_proc::aperture_photometry::ApertureError;
use shared::image_proc::centroid::CentroidError;
use shared::image_proc::exposure::Exposure;
use thiserror::Error;

use crate::error::ConfigError;
use crate::table::{FieldKind, Schema, SchemaError, SourceRecord};

pub use centroid::{CentroidParams, MomentsCentroid, NaiveCentroid};
pub use flux::{ApertureFluxAlgorithm, ApertureParams, NaiveFlux, NaiveFluxParams};
pub use pixel_flags::PixelFlags;
pub use shape::{MomentsShape, ShapeParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmKind {
    Centroid,
    Shape,
    Flux,
    Flags,
}

/// Errors raised while measuring one source.
///
/// Recoverable errors only set the algorithm's failure flag; fatal ones
/// abort the whole run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlgorithmError {
    #[error(transparent)]
    Centroid(#[from] CentroidError),

    #[error(transparent)]
    Aperture(#[from] ApertureError),

    #[error("footprint has no pixels inside the image")]
    EmptyFootprint,

    #[error("no usable position for source")]
    NoPosition,

    #[error("{what} is not finite")]
    NonFinite { what: &'static str },

    /// Forced measurement needs a WCS on the exposure.
    #[error("exposure has no WCS for forced measurement")]
    MissingWcs,

    #[error("fatal measurement error: {0}")]
    Fatal(String),
}

impl AlgorithmError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AlgorithmError::MissingWcs | AlgorithmError::Fatal(_))
    }
}

/// Field naming for one algorithm under one prefix.
#[derive(Debug, Clone, Copy)]
pub struct FieldScope<'a> {
    prefix: &'a str,
    name: &'a str,
}

impl<'a> FieldScope<'a> {
    pub fn new(prefix: &'a str, name: &'a str) -> Self {
        Self { prefix, name }
    }

    /// `<prefix><name>`
    pub fn base(&self) -> String {
        format!("{}{}", self.prefix, self.name)
    }

    /// `<prefix><name>.<suffix>`
    pub fn field(&self, suffix: &str) -> String {
        format!("{}{}.{}", self.prefix, self.name, suffix)
    }

    pub fn flags(&self) -> String {
        self.field("flags")
    }

    pub fn add(
        &self,
        schema: &mut Schema,
        suffix: &str,
        kind: FieldKind,
        doc: &str,
    ) -> Result<(), SchemaError> {
        schema.add_field(&self.field(suffix), kind, doc)
    }
}

/// What an algorithm sees of the run while measuring one source.
#[derive(Debug, Clone, Copy)]
pub struct MeasurementContext<'a> {
    pub exposure: &'a Exposure,
    /// Current best position, seeded from the footprint or the centroider.
    pub center: (f64, f64),
    /// True when the center came from a reference source.
    pub forced: bool,
}

/// A measurement algorithm.
pub trait MeasurementAlgorithm: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AlgorithmKind;

    /// Declare every output field except `<scope>.flags`, which the
    /// measurer declares for all algorithms.
    fn declare_fields(&self, schema: &mut Schema, scope: &FieldScope<'_>) -> Result<(), SchemaError>;

    fn measure(
        &self,
        record: &mut SourceRecord,
        ctx: &MeasurementContext<'_>,
        scope: &FieldScope<'_>,
    ) -> Result<(), AlgorithmError>;
}

/// Deserialize per-algorithm parameters, falling back to defaults.
pub(crate) fn parse_params<T>(
    algorithm: &str,
    params: Option<&serde_json::Value>,
) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    match params {
        None => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|source| ConfigError::InvalidParams {
                algorithm: algorithm.to_string(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Params {
        background: f64,
    }

    #[test]
    fn test_field_scope_names() {
        let scope = FieldScope::new("ref.", "flux.naive");
        assert_eq!(scope.base(), "ref.flux.naive");
        assert_eq!(scope.field("err"), "ref.flux.naive.err");
        assert_eq!(scope.flags(), "ref.flux.naive.flags");
    }

    #[test]
    fn test_parse_params() {
        let params: Params = parse_params("x", None).unwrap();
        assert_eq!(params, Params::default());

        let params: Params = parse_params("x", Some(&json!({"background": 2.5}))).unwrap();
        assert_eq!(params.background, 2.5);

        let err = parse_params::<Params>("x", Some(&json!({"background": "high"}))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParams { .. }));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AlgorithmError::MissingWcs.is_fatal());
        assert!(AlgorithmError::Fatal("boom".into()).is_fatal());
        assert!(!AlgorithmError::EmptyFootprint.is_fatal());
        assert!(!AlgorithmError::Centroid(CentroidError::EmptyFootprint).is_fatal());
    }
}
