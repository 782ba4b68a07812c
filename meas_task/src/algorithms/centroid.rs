//! Centroid algorithms.

use serde::{Deserialize, Serialize};
use shared::image_proc::centroid::{footprint_centroid, naive_centroid};
use shared::image_proc::exposure::Exposure;

use super::{
    parse_params, AlgorithmError, AlgorithmKind, FieldScope, MeasurementAlgorithm,
    MeasurementContext,
};
use crate::error::ConfigError;
use crate::table::{FieldKind, Schema, SchemaError, SourceRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentroidParams {
    /// Constant sky level subtracted from every pixel
    pub background: f64,
}

fn declare_xy(schema: &mut Schema, scope: &FieldScope<'_>) -> Result<(), SchemaError> {
    scope.add(schema, "x", FieldKind::Float, "centroid column")?;
    scope.add(schema, "y", FieldKind::Float, "centroid row")?;
    scope.add(schema, "x_err", FieldKind::Float, "1-sigma error on x")?;
    scope.add(schema, "y_err", FieldKind::Float, "1-sigma error on y")?;
    scope.add(schema, "xy_cov", FieldKind::Float, "x/y covariance")
}

/// Covariance `(xx, yy, xy)` of a first-moment centroid at `center` over
/// `pixels`, propagated from the variance plane.
fn centroid_covariance(
    exposure: &Exposure,
    pixels: impl IntoIterator<Item = (usize, usize)>,
    (cx, cy): (f64, f64),
    background: f64,
) -> (f64, f64, f64) {
    let (mut sum, mut xx, mut yy, mut xy) = (0.0, 0.0, 0.0, 0.0);
    for (x, y) in pixels {
        let variance = exposure.variance[[y, x]];
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        sum += exposure.image[[y, x]] - background;
        xx += variance * dx * dx;
        yy += variance * dy * dy;
        xy += variance * dx * dy;
    }
    let norm = sum * sum;
    (xx / norm, yy / norm, xy / norm)
}

fn write_xy(
    record: &mut SourceRecord,
    scope: &FieldScope<'_>,
    (x, y): (f64, f64),
    (cov_xx, cov_yy, cov_xy): (f64, f64, f64),
) -> Result<(), AlgorithmError> {
    if !(x.is_finite() && y.is_finite()) {
        return Err(AlgorithmError::NonFinite { what: "centroid" });
    }
    record.set_float(&scope.field("x"), x);
    record.set_float(&scope.field("y"), y);
    record.set_float(&scope.field("x_err"), cov_xx.sqrt());
    record.set_float(&scope.field("y_err"), cov_yy.sqrt());
    record.set_float(&scope.field("xy_cov"), cov_xy);
    Ok(())
}

/// First moment of the 3×3 box around the pixel nearest the current center.
#[derive(Debug, Clone)]
pub struct NaiveCentroid {
    name: String,
    params: CentroidParams,
}

impl NaiveCentroid {
    pub fn new(name: &str, params: CentroidParams) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }

    pub fn from_params(name: &str, params: Option<&serde_json::Value>) -> Result<Self, ConfigError> {
        Ok(Self::new(name, parse_params(name, params)?))
    }
}

impl MeasurementAlgorithm for NaiveCentroid {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Centroid
    }

    fn declare_fields(&self, schema: &mut Schema, scope: &FieldScope<'_>) -> Result<(), SchemaError> {
        declare_xy(schema, scope)
    }

    fn measure(
        &self,
        record: &mut SourceRecord,
        ctx: &MeasurementContext<'_>,
        scope: &FieldScope<'_>,
    ) -> Result<(), AlgorithmError> {
        let (cx, cy) = ctx.center;
        if !(cx.is_finite() && cy.is_finite()) || cx < -0.5 || cy < -0.5 {
            return Err(AlgorithmError::NoPosition);
        }
        let (ix, iy) = (cx.round() as usize, cy.round() as usize);
        let image = ctx.exposure.image.view();
        let position = naive_centroid(&image, ix, iy, self.params.background)?;
        let box3 = (iy - 1..=iy + 1).flat_map(|y| (ix - 1..=ix + 1).map(move |x| (x, y)));
        let covariance = centroid_covariance(ctx.exposure, box3, position, self.params.background);
        write_xy(record, scope, position, covariance)
    }
}

/// Intensity-weighted first moment over the footprint.
#[derive(Debug, Clone)]
pub struct MomentsCentroid {
    name: String,
    params: CentroidParams,
}

impl MomentsCentroid {
    pub fn new(name: &str, params: CentroidParams) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }

    pub fn from_params(name: &str, params: Option<&serde_json::Value>) -> Result<Self, ConfigError> {
        Ok(Self::new(name, parse_params(name, params)?))
    }
}

impl MeasurementAlgorithm for MomentsCentroid {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Centroid
    }

    fn declare_fields(&self, schema: &mut Schema, scope: &FieldScope<'_>) -> Result<(), SchemaError> {
        declare_xy(schema, scope)
    }

    fn measure(
        &self,
        record: &mut SourceRecord,
        ctx: &MeasurementContext<'_>,
        scope: &FieldScope<'_>,
    ) -> Result<(), AlgorithmError> {
        let image = ctx.exposure.image.view();
        let moments = footprint_centroid(&image, &record.footprint, self.params.background)?;
        let (height, width) = image.dim();
        let clipped = record.footprint.clipped_to(width, height);
        let position = (moments.x, moments.y);
        let covariance =
            centroid_covariance(ctx.exposure, clipped.pixels(), position, self.params.background);
        write_xy(record, scope, position, covariance)
    }
}
