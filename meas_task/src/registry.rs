//! Name-keyed algorithm factories.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::algorithms::{
    ApertureFluxAlgorithm, MeasurementAlgorithm, MomentsCentroid, MomentsShape, NaiveCentroid,
    NaiveFlux, PixelFlags,
};
use crate::error::ConfigError;

/// Builds one algorithm from its registered name and optional JSON parameters.
pub type AlgorithmFactory = Box<
    dyn Fn(&str, Option<&Value>) -> Result<Box<dyn MeasurementAlgorithm>, ConfigError>
        + Send
        + Sync,
>;

/// Erase an algorithm's concrete type for use in a factory.
pub fn boxed<A: MeasurementAlgorithm + 'static>(algorithm: A) -> Box<dyn MeasurementAlgorithm> {
    Box::new(algorithm)
}

/// Maps configuration names to algorithm factories.
#[derive(Default)]
pub struct AlgorithmRegistry {
    factories: BTreeMap<String, AlgorithmFactory>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in algorithm.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, AlgorithmFactory); 6] = [
            (
                "centroid.naive",
                Box::new(|name: &str, params: Option<&Value>| {
                    NaiveCentroid::from_params(name, params).map(boxed)
                }),
            ),
            (
                "centroid.moments",
                Box::new(|name: &str, params: Option<&Value>| {
                    MomentsCentroid::from_params(name, params).map(boxed)
                }),
            ),
            (
                "shape.moments",
                Box::new(|name: &str, params: Option<&Value>| {
                    MomentsShape::from_params(name, params).map(boxed)
                }),
            ),
            (
                "flux.naive",
                Box::new(|name: &str, params: Option<&Value>| {
                    NaiveFlux::from_params(name, params).map(boxed)
                }),
            ),
            (
                "flux.aperture",
                Box::new(|name: &str, params: Option<&Value>| {
                    ApertureFluxAlgorithm::from_params(name, params).map(boxed)
                }),
            ),
            (
                "flags.pixel",
                Box::new(|name: &str, _: Option<&Value>| {
                    Ok::<_, ConfigError>(boxed(PixelFlags::new(name)))
                }),
            ),
        ];
        for (name, factory) in builtins {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    pub fn register(&mut self, name: &str, factory: AlgorithmFactory) -> Result<(), ConfigError> {
        if self.factories.contains_key(name) {
            return Err(ConfigError::DuplicateAlgorithm {
                name: name.to_string(),
            });
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(
        &self,
        name: &str,
        params: Option<&Value>,
    ) -> Result<Box<dyn MeasurementAlgorithm>, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAlgorithm {
                name: name.to_string(),
            })?;
        factory(name, params)
    }
}
