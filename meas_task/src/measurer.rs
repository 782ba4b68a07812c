//! The measurer: a fixed, ordered set of algorithms applied to one source.

use shared::image_proc::exposure::Exposure;
use shared::wcs::Wcs;

use crate::algorithms::{
    AlgorithmError, AlgorithmKind, FieldScope, MeasurementAlgorithm, MeasurementContext,
};
use crate::error::ConfigError;
use crate::table::{FieldKind, Schema, SourceRecord, SourceTable};

/// Collects algorithms before their fields are declared.
pub struct MeasureSourcesBuilder {
    prefix: String,
    centroider: Option<Box<dyn MeasurementAlgorithm>>,
    algorithms: Vec<Box<dyn MeasurementAlgorithm>>,
}

impl MeasureSourcesBuilder {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            centroider: None,
            algorithms: Vec::new(),
        }
    }

    /// Algorithm run first on every source to refine the seed position.
    pub fn set_centroider(mut self, centroider: Box<dyn MeasurementAlgorithm>) -> Self {
        self.centroider = Some(centroider);
        self
    }

    pub fn add_algorithm(mut self, algorithm: Box<dyn MeasurementAlgorithm>) -> Self {
        self.algorithms.push(algorithm);
        self
    }

    /// Declare every algorithm's fields and freeze the algorithm order.
    pub fn build(self, schema: &mut Schema) -> Result<MeasureSources, ConfigError> {
        if let Some(centroider) = &self.centroider {
            if centroider.kind() != AlgorithmKind::Centroid {
                return Err(ConfigError::CentroiderNotCentroid {
                    name: centroider.name().to_string(),
                    kind: centroider.kind(),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for algorithm in self.centroider.iter().chain(&self.algorithms) {
            if !seen.insert(algorithm.name()) {
                return Err(ConfigError::DuplicateAlgorithm {
                    name: algorithm.name().to_string(),
                });
            }
        }

        for algorithm in self.centroider.iter().chain(&self.algorithms) {
            let scope = FieldScope::new(&self.prefix, algorithm.name());
            schema.add_field(
                &scope.flags(),
                FieldKind::Flag,
                &format!("set if {} failed", algorithm.name()),
            )?;
            algorithm.declare_fields(schema, &scope)?;
        }

        Ok(MeasureSources {
            prefix: self.prefix,
            centroider: self.centroider,
            algorithms: self.algorithms,
        })
    }
}

/// Reference position for forced measurement.
#[derive(Debug, Clone, Copy)]
pub struct ForcedReference<'a> {
    /// Position on the reference exposure, in its pixel frame
    pub position: (f64, f64),
    pub wcs: &'a Wcs,
}

impl<'a> ForcedReference<'a> {
    /// Resolve a reference record's position through the table's centroid
    /// slot, falling back to its first peak and then its bbox center.
    pub fn from_record(table: &SourceTable, record: &SourceRecord, wcs: &'a Wcs) -> Option<Self> {
        let position = table
            .centroid(record)
            .ok()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .or_else(|| record.footprint.peaks().first().map(|p| (p.x, p.y)))
            .or_else(|| record.footprint.bbox().map(|b| b.center()))?;
        Some(Self { position, wcs })
    }
}

/// Ordered algorithms with their fields already declared.
pub struct MeasureSources {
    prefix: String,
    centroider: Option<Box<dyn MeasurementAlgorithm>>,
    algorithms: Vec<Box<dyn MeasurementAlgorithm>>,
}

impl std::fmt::Debug for MeasureSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasureSources")
            .field("prefix", &self.prefix)
            .field("centroider", &self.centroider.as_ref().map(|c| c.name()))
            .field("algorithms", &self.algorithm_names())
            .finish()
    }
}

impl MeasureSources {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn centroider_name(&self) -> Option<&str> {
        self.centroider.as_ref().map(|c| c.name())
    }

    pub fn algorithm_names(&self) -> Vec<&str> {
        self.algorithms.iter().map(|a| a.name()).collect()
    }

    /// Measure `record` on `exposure` around its own footprint.
    pub fn apply(&self, record: &mut SourceRecord, exposure: &Exposure) -> Result<(), AlgorithmError> {
        let seed = record
            .footprint
            .peaks()
            .first()
            .map(|p| (p.x, p.y))
            .or_else(|| record.footprint.bbox().map(|b| b.center()));
        self.run(record, exposure, seed, false)
    }

    /// Measure `record` at a reference source's position.
    ///
    /// The reference position goes to sky through the reference WCS and
    /// back to pixels through the exposure's WCS.
    pub fn apply_forced(
        &self,
        record: &mut SourceRecord,
        exposure: &Exposure,
        reference: &ForcedReference<'_>,
    ) -> Result<(), AlgorithmError> {
        let wcs = exposure.wcs().ok_or(AlgorithmError::MissingWcs)?;
        let (rx, ry) = reference.position;
        let (ra, dec) = reference.wcs.pixel_to_sky(rx, ry);
        let center = wcs.sky_to_pixel(ra, dec);
        self.run(record, exposure, Some(center), true)
    }

    fn run(
        &self,
        record: &mut SourceRecord,
        exposure: &Exposure,
        seed: Option<(f64, f64)>,
        forced: bool,
    ) -> Result<(), AlgorithmError> {
        let Some(mut center) = seed else {
            log::debug!("Source {} has no position; flagging every algorithm", record.id);
            for algorithm in self.centroider.iter().chain(&self.algorithms) {
                let scope = FieldScope::new(&self.prefix, algorithm.name());
                record.set_flag(&scope.flags(), true);
            }
            return Ok(());
        };

        if let Some(centroider) = &self.centroider {
            let ctx = MeasurementContext {
                exposure,
                center,
                forced,
            };
            let scope = FieldScope::new(&self.prefix, centroider.name());
            if self.run_one(centroider.as_ref(), record, &ctx)? && !forced {
                let refined = (record.float(&scope.field("x")), record.float(&scope.field("y")));
                if refined.0.is_finite() && refined.1.is_finite() {
                    center = refined;
                }
            }
        }

        let ctx = MeasurementContext {
            exposure,
            center,
            forced,
        };
        for algorithm in &self.algorithms {
            self.run_one(algorithm.as_ref(), record, &ctx)?;
        }
        Ok(())
    }

    /// Run one algorithm, converting recoverable failures into its flag.
    ///
    /// Returns whether the algorithm succeeded.
    fn run_one(
        &self,
        algorithm: &dyn MeasurementAlgorithm,
        record: &mut SourceRecord,
        ctx: &MeasurementContext<'_>,
    ) -> Result<bool, AlgorithmError> {
        let scope = FieldScope::new(&self.prefix, algorithm.name());
        match algorithm.measure(record, ctx, &scope) {
            Ok(()) => {
                record.set_flag(&scope.flags(), false);
                Ok(true)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::debug!("{} failed on source {}: {}", algorithm.name(), record.id, e);
                record.set_flag(&scope.flags(), true);
                Ok(false)
            }
        }
    }
}
