//! Flux algorithms.
//!
//! Flux values live at the scoped base name (or `<base>.<i>` for one of
//! several apertures) with the 1σ error at `<value>.err`, which is the
//! layout flux slots resolve against.

use serde::{Deserialize, Serialize};
use shared::image_proc::aperture_photometry::aperture_flux;

use super::{
    parse_params, AlgorithmError, AlgorithmKind, FieldScope, MeasurementAlgorithm,
    MeasurementContext,
};
use crate::error::ConfigError;
use crate::table::{FieldKind, Schema, SchemaError, SourceRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NaiveFluxParams {
    pub background: f64,
}

/// Sum of footprint pixels.
#[derive(Debug, Clone)]
pub struct NaiveFlux {
    name: String,
    params: NaiveFluxParams,
}

impl NaiveFlux {
    pub fn new(name: &str, params: NaiveFluxParams) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }

    pub fn from_params(name: &str, params: Option<&serde_json::Value>) -> Result<Self, ConfigError> {
        Ok(Self::new(name, parse_params(name, params)?))
    }
}

impl MeasurementAlgorithm for NaiveFlux {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Flux
    }

    fn declare_fields(&self, schema: &mut Schema, scope: &FieldScope<'_>) -> Result<(), SchemaError> {
        schema.add_field(&scope.base(), FieldKind::Float, "footprint pixel sum")?;
        scope.add(schema, "err", FieldKind::Float, "footprint pixel sum error")
    }

    fn measure(
        &self,
        record: &mut SourceRecord,
        ctx: &MeasurementContext<'_>,
        scope: &FieldScope<'_>,
    ) -> Result<(), AlgorithmError> {
        let exposure = ctx.exposure;
        let footprint = record
            .footprint
            .clipped_to(exposure.width(), exposure.height());
        if footprint.is_empty() {
            return Err(AlgorithmError::EmptyFootprint);
        }

        let (mut flux, mut var_sum) = (0.0, 0.0);
        for (x, y) in footprint.pixels() {
            flux += exposure.image[[y, x]] - self.params.background;
            var_sum += exposure.variance[[y, x]].max(0.0);
        }
        if !flux.is_finite() {
            return Err(AlgorithmError::NonFinite { what: "flux" });
        }

        record.set_float(&scope.base(), flux);
        record.set_float(&scope.field("err"), var_sum.sqrt());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApertureParams {
    /// Aperture radii in pixels, one output per radius
    pub radii: Vec<f64>,
    pub background: f64,
}

impl Default for ApertureParams {
    fn default() -> Self {
        Self {
            radii: vec![5.0, 8.0],
            background: 0.0,
        }
    }
}

/// Circular aperture sums at each configured radius.
#[derive(Debug, Clone)]
pub struct ApertureFluxAlgorithm {
    name: String,
    params: ApertureParams,
}

impl ApertureFluxAlgorithm {
    pub fn new(name: &str, params: ApertureParams) -> Result<Self, ConfigError> {
        if params.radii.is_empty() || params.radii.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
            return Err(ConfigError::InvalidAlgorithm {
                algorithm: name.to_string(),
                reason: format!("aperture radii must be positive, got {:?}", params.radii),
            });
        }
        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    pub fn from_params(name: &str, params: Option<&serde_json::Value>) -> Result<Self, ConfigError> {
        Self::new(name, parse_params(name, params)?)
    }

    pub fn radii(&self) -> &[f64] {
        &self.params.radii
    }
}

impl MeasurementAlgorithm for ApertureFluxAlgorithm {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Flux
    }

    fn declare_fields(&self, schema: &mut Schema, scope: &FieldScope<'_>) -> Result<(), SchemaError> {
        for (i, radius) in self.params.radii.iter().enumerate() {
            scope.add(
                schema,
                &i.to_string(),
                FieldKind::Float,
                &format!("flux within {radius} pixels"),
            )?;
            scope.add(
                schema,
                &format!("{i}.err"),
                FieldKind::Float,
                &format!("flux error within {radius} pixels"),
            )?;
            scope.add(
                schema,
                &format!("{i}.truncated"),
                FieldKind::Flag,
                "aperture extends past the image edge",
            )?;
        }
        Ok(())
    }

    fn measure(
        &self,
        record: &mut SourceRecord,
        ctx: &MeasurementContext<'_>,
        scope: &FieldScope<'_>,
    ) -> Result<(), AlgorithmError> {
        let (cx, cy) = ctx.center;
        if !(cx.is_finite() && cy.is_finite()) {
            return Err(AlgorithmError::NoPosition);
        }
        let image = ctx.exposure.image.view();
        let variance = ctx.exposure.variance.view();

        // Inner apertures are still recorded when an outer one fails
        let mut first_error = None;
        for (i, &radius) in self.params.radii.iter().enumerate() {
            match aperture_flux(&image, &variance, cx, cy, radius, self.params.background) {
                Ok(result) => {
                    record.set_float(&scope.field(&i.to_string()), result.flux);
                    record.set_float(&scope.field(&format!("{i}.err")), result.flux_err);
                    record.set_flag(&scope.field(&format!("{i}.truncated")), result.truncated);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
