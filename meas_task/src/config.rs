//! Measurement configuration: slots, algorithm list and noise replacement.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::measurer::{MeasureSources, MeasureSourcesBuilder};
use crate::registry::AlgorithmRegistry;
use crate::table::{Schema, SchemaError, SlotRole, SourceTable};

/// Algorithm outputs aliased by each slot; `None` leaves the slot unbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceSlotConfig {
    /// Algorithm whose `.x`/`.y` is "the" centroid
    pub centroid: Option<String>,
    /// Algorithm whose `.xx`/`.yy`/`.xy` is "the" shape
    pub shape: Option<String>,
    /// Aperture flux output
    pub ap_flux: Option<String>,
    /// Model flux output
    pub model_flux: Option<String>,
    /// PSF flux output
    pub psf_flux: Option<String>,
    /// Instrumental flux output
    pub inst_flux: Option<String>,
}

impl Default for SourceSlotConfig {
    fn default() -> Self {
        Self {
            centroid: Some("centroid.moments".to_string()),
            shape: Some("shape.moments".to_string()),
            ap_flux: Some("flux.aperture.0".to_string()),
            model_flux: None,
            psf_flux: None,
            inst_flux: Some("flux.naive".to_string()),
        }
    }
}

impl SourceSlotConfig {
    /// Every slot unbound.
    pub fn unbound() -> Self {
        Self {
            centroid: None,
            shape: None,
            ap_flux: None,
            model_flux: None,
            psf_flux: None,
            inst_flux: None,
        }
    }

    pub fn binding(&self, role: SlotRole) -> Option<&str> {
        match role {
            SlotRole::Centroid => self.centroid.as_deref(),
            SlotRole::Shape => self.shape.as_deref(),
            SlotRole::ApFlux => self.ap_flux.as_deref(),
            SlotRole::ModelFlux => self.model_flux.as_deref(),
            SlotRole::PsfFlux => self.psf_flux.as_deref(),
            SlotRole::InstFlux => self.inst_flux.as_deref(),
        }
    }

    /// Alias every bound slot to `prefix + name` on the table.
    pub fn setup_table(&self, table: &mut SourceTable, prefix: Option<&str>) -> Result<(), SchemaError> {
        let prefix = prefix.unwrap_or("");
        for role in SlotRole::ALL {
            match self.binding(role) {
                Some(name) => table.define_slot(role, &format!("{prefix}{name}"))?,
                None => table.clear_slot(role),
            }
        }
        Ok(())
    }
}

/// Where replacement noise is drawn from when the caller supplies none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseSourceKind {
    /// Zero-mean Gaussian with the exposure's per-pixel variance
    Variance,
    /// Gaussian with the median and robust variance of background pixels
    Measure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseReplacerConfig {
    pub noise_source: NoiseSourceKind,
    /// Added to every generated noise value
    pub noise_offset: f64,
    /// Seed for the replacement noise generator
    pub noise_seed: u64,
}

impl Default for NoiseReplacerConfig {
    fn default() -> Self {
        Self {
            noise_source: NoiseSourceKind::Variance,
            noise_offset: 0.0,
            noise_seed: 0,
        }
    }
}

/// Full configuration of a source measurement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub slots: SourceSlotConfig,
    /// Algorithms applied to every source, in order
    pub algorithms: Vec<String>,
    /// Algorithm run before all others to refine each source's position
    pub centroider: Option<String>,
    /// Prepended to every output field name
    pub prefix: Option<String>,
    /// Replace other detected footprints with noise while measuring
    pub do_replace_with_noise: bool,
    pub replace_with_noise: NoiseReplacerConfig,
    /// Per-algorithm parameters keyed by algorithm name
    pub algorithm_params: BTreeMap<String, serde_json::Value>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            slots: SourceSlotConfig::default(),
            algorithms: [
                "flags.pixel",
                "centroid.naive",
                "shape.moments",
                "flux.naive",
                "flux.aperture",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            centroider: Some("centroid.moments".to_string()),
            prefix: None,
            do_replace_with_noise: true,
            replace_with_noise: NoiseReplacerConfig::default(),
            algorithm_params: BTreeMap::new(),
        }
    }
}

impl MeasurementConfig {
    /// Check slot bindings against the scheduled algorithms.
    ///
    /// - the centroider must not also be in `algorithms`
    /// - `algorithms` must not repeat a name
    /// - the centroid slot must name a scheduled algorithm or the centroider
    /// - the shape slot must name a scheduled algorithm
    /// - each flux slot must start with the name of a scheduled algorithm
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(centroider) = &self.centroider {
            if self.algorithms.contains(centroider) {
                return Err(ConfigError::CentroiderInAlgorithms {
                    name: centroider.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for name in &self.algorithms {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateAlgorithm { name: name.clone() });
            }
        }

        if let Some(name) = self.slots.binding(SlotRole::Centroid) {
            let is_centroider = self.centroider.as_deref() == Some(name);
            if !is_centroider && !seen.contains(name) {
                return Err(ConfigError::SlotNotScheduled {
                    slot: SlotRole::Centroid.name(),
                    name: name.to_string(),
                });
            }
        }

        if let Some(name) = self.slots.binding(SlotRole::Shape) {
            if !seen.contains(name) {
                return Err(ConfigError::SlotNotScheduled {
                    slot: SlotRole::Shape.name(),
                    name: name.to_string(),
                });
            }
        }

        for role in SlotRole::FLUXES {
            if let Some(name) = self.slots.binding(role) {
                if !self.algorithms.iter().any(|a| name.starts_with(a.as_str())) {
                    return Err(ConfigError::SlotNotScheduled {
                        slot: role.name(),
                        name: name.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Validate, instantiate every algorithm and declare its fields.
    pub fn make_measure_sources(
        &self,
        registry: &AlgorithmRegistry,
        schema: &mut Schema,
    ) -> Result<MeasureSources, ConfigError> {
        self.validate()?;

        let mut builder = MeasureSourcesBuilder::new(self.prefix.as_deref().unwrap_or(""));
        if let Some(name) = &self.centroider {
            builder = builder.set_centroider(registry.create(name, self.algorithm_params.get(name))?);
        }
        for name in &self.algorithms {
            builder = builder.add_algorithm(registry.create(name, self.algorithm_params.get(name))?);
        }
        builder.build(schema)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        log::info!("Loaded measurement configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
