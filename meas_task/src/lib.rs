//! Source measurement task.
//!
//! Runs a configured set of measurement algorithms over every source of a
//! catalog, one at a time, with every other detected footprint replaced by
//! noise so that no measurement sees a neighbour's pixels:
//!
//! begin (all footprints -> noise) -> for each source: insert, measure, remove -> end (restore)

use std::time::Instant;

use ndarray::Array2;
use shared::image_proc::exposure::Exposure;
use shared::wcs::Wcs;

pub mod algorithms;
pub mod config;
pub mod display;
pub mod error;
pub mod hooks;
pub mod measurer;
pub mod registry;
pub mod replace_noise;
pub mod table;

use crate::measurer::ForcedReference;

// Re-export commonly used types for external use
pub use crate::algorithms::{AlgorithmError, AlgorithmKind, MeasurementAlgorithm};
pub use crate::config::{MeasurementConfig, NoiseReplacerConfig, NoiseSourceKind, SourceSlotConfig};
pub use crate::error::{ConfigError, MeasurementError, ReplaceError};
pub use crate::hooks::{MeasurementHooks, NoopHooks};
pub use crate::measurer::MeasureSources;
pub use crate::registry::AlgorithmRegistry;
pub use crate::replace_noise::NoiseReplacer;
pub use crate::table::{Schema, SlotRole, SourceCatalog, SourceRecord, SourceTable};

/// Optional inputs to [`SourceMeasurementTask::measure`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasureInputs<'a> {
    /// Explicit replacement noise, one value per pixel
    pub noise_image: Option<&'a Array2<f64>>,
    /// Gaussian replacement noise `(mean, variance)`
    pub noise_mean_var: Option<(f64, f64)>,
    /// One entry per source; `Some` measures that source at the reference position
    pub references: Option<&'a [Option<SourceRecord>]>,
    /// Table whose centroid slot locates the references; defaults to the measured catalog's
    pub ref_table: Option<&'a SourceTable>,
    /// Pixel-to-sky transform of the exposure the references were measured on
    pub ref_wcs: Option<&'a Wcs>,
}

/// Measures every source of a catalog in isolation.
pub struct SourceMeasurementTask {
    config: MeasurementConfig,
    measurer: MeasureSources,
    replacer: Option<NoiseReplacer>,
    hooks: Box<dyn MeasurementHooks>,
}

impl SourceMeasurementTask {
    /// Build a task from the built-in algorithms, declaring their fields on `schema`.
    pub fn new(config: MeasurementConfig, schema: &mut Schema) -> Result<Self, ConfigError> {
        Self::with_registry(config, &AlgorithmRegistry::with_builtins(), schema)
    }

    pub fn with_registry(
        config: MeasurementConfig,
        registry: &AlgorithmRegistry,
        schema: &mut Schema,
    ) -> Result<Self, ConfigError> {
        let measurer = config.make_measure_sources(registry, schema)?;
        let replacer = config
            .do_replace_with_noise
            .then(|| NoiseReplacer::new(config.replace_with_noise.clone()));
        log::debug!(
            "Configured measurement: centroider {:?}, algorithms {:?}, noise replacement {}",
            measurer.centroider_name(),
            measurer.algorithm_names(),
            replacer.is_some()
        );
        Ok(Self {
            config,
            measurer,
            replacer,
            hooks: Box::new(NoopHooks),
        })
    }

    /// Replace the diagnostic hooks.
    pub fn with_hooks(mut self, hooks: Box<dyn MeasurementHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn measurer(&self) -> &MeasureSources {
        &self.measurer
    }

    pub fn replaces_with_noise(&self) -> bool {
        self.replacer.is_some()
    }

    /// Measure every source of `sources` on `exposure`, in catalog order.
    ///
    /// Reference problems are reported before anything is touched. If an
    /// algorithm fails fatally partway through, the exposure's original
    /// pixels are put back before the error is returned; measured values
    /// already written to earlier records are kept.
    pub fn measure(
        &mut self,
        exposure: &mut Exposure,
        sources: &mut SourceCatalog,
        inputs: MeasureInputs<'_>,
    ) -> Result<(), MeasurementError> {
        let start = Instant::now();

        if let Some(references) = inputs.references {
            if references.len() != sources.len() {
                return Err(ConfigError::ReferenceLengthMismatch {
                    sources: sources.len(),
                    references: references.len(),
                }
                .into());
            }
            if inputs.ref_wcs.is_none() && references.iter().any(Option::is_some) {
                return Err(ConfigError::MissingReferenceWcs.into());
            }
        }

        log::info!("Measuring {} sources", sources.len());
        self.config
            .slots
            .setup_table(sources.table_mut(), self.config.prefix.as_deref())?;

        self.hooks.pre_measure(exposure, sources);

        if let Some(replacer) = self.replacer.as_mut() {
            replacer.begin(exposure, sources, inputs.noise_image, inputs.noise_mean_var)?;
        }

        if let Err(e) = self.measure_each(exposure, sources, &inputs) {
            if let Some(replacer) = self.replacer.as_mut() {
                replacer.abort(exposure);
            }
            return Err(e);
        }

        if let Some(replacer) = self.replacer.as_mut() {
            replacer.end(exposure, sources)?;
        }

        self.hooks.post_measure(exposure, sources);
        log::debug!(
            "Measured {} sources in {:.3} s",
            sources.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn measure_each(
        &mut self,
        exposure: &mut Exposure,
        sources: &mut SourceCatalog,
        inputs: &MeasureInputs<'_>,
    ) -> Result<(), MeasurementError> {
        let Self {
            measurer,
            replacer,
            hooks,
            ..
        } = self;

        hooks.pre_single_measure(exposure, sources, None);

        for index in 0..sources.len() {
            if let Some(replacer) = replacer.as_mut() {
                replacer.insert_source(exposure, index)?;
            }

            hooks.pre_single_measure(exposure, sources, Some(index));

            let reference = inputs
                .references
                .and_then(|references| references.get(index))
                .and_then(Option::as_ref);
            let (table, records) = sources.split_mut();
            let record = &mut records[index];
            let outcome = match (reference, inputs.ref_wcs) {
                (Some(reference), Some(wcs)) => {
                    let ref_table = inputs.ref_table.unwrap_or(table);
                    ForcedReference::from_record(ref_table, reference, wcs)
                        .ok_or_else(|| {
                            AlgorithmError::Fatal(format!(
                                "reference source {} has no position",
                                reference.id
                            ))
                        })
                        .and_then(|forced| measurer.apply_forced(record, exposure, &forced))
                }
                _ => measurer.apply(record, exposure),
            };
            outcome.map_err(|source| MeasurementError::Algorithm {
                id: record.id,
                source,
            })?;

            hooks.post_single_measure(exposure, sources, index);

            if let Some(replacer) = replacer.as_mut() {
                replacer.remove_source(exposure, sources, &sources.records()[index])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::image_proc::footprint::{Footprint, Peak};

    fn task(config: MeasurementConfig) -> (SourceMeasurementTask, SourceCatalog) {
        let mut schema = Schema::minimal();
        let task = SourceMeasurementTask::new(config, &mut schema).unwrap();
        let mut catalog = SourceCatalog::new(SourceTable::new(schema));
        catalog.push(SourceRecord::new(
            1,
            Footprint::from_rect(3, 3, 5, 5).with_peak(Peak::new(5.0, 5.0, 100.0)),
        ));
        (task, catalog)
    }

    #[test]
    fn test_replacer_constructed_only_when_enabled() {
        let (task, _) = task(MeasurementConfig::default());
        assert!(task.replaces_with_noise());

        let (task, _) = task_without_noise();
        assert!(!task.replaces_with_noise());
    }

    fn task_without_noise() -> (SourceMeasurementTask, SourceCatalog) {
        task(MeasurementConfig {
            do_replace_with_noise: false,
            ..MeasurementConfig::default()
        })
    }

    #[test]
    fn test_measure_binds_slots() {
        let (mut task, mut catalog) = task_without_noise();
        let mut exposure = Exposure::new(12, 12);
        exposure.image[[5, 5]] = 100.0;

        task.measure(&mut exposure, &mut catalog, MeasureInputs::default())
            .unwrap();

        let table = catalog.table();
        assert_eq!(table.slot(SlotRole::Centroid), Some("centroid.moments"));
        let (x, y) = table.centroid(&catalog.records()[0]).unwrap();
        assert_eq!((x, y), (5.0, 5.0));
    }

    #[test]
    fn test_missing_reference_wcs() {
        let (mut task, mut catalog) = task_without_noise();
        let mut exposure = Exposure::new(12, 12);
        let references = vec![Some(catalog.records()[0].clone())];

        let err = task
            .measure(
                &mut exposure,
                &mut catalog,
                MeasureInputs {
                    references: Some(references.as_slice()),
                    ..MeasureInputs::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            MeasurementError::Config(ConfigError::MissingReferenceWcs)
        ));
    }
}
