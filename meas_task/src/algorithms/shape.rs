use serde::{Deserialize, Serialize};
use shared::image_proc::centroid::footprint_moments_about;

use super::{
    parse_params, AlgorithmError, AlgorithmKind, FieldScope, MeasurementAlgorithm,
    MeasurementContext,
};
use crate::error::ConfigError;
use crate::table::{FieldKind, Schema, SchemaError, SourceRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeParams {
    pub background: f64,
}

/// Second central moments over the footprint about the current center.
#[derive(Debug, Clone)]
pub struct MomentsShape {
    name: String,
    params: ShapeParams,
}

impl MomentsShape {
    pub fn new(name: &str, params: ShapeParams) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }

    pub fn from_params(name: &str, params: Option<&serde_json::Value>) -> Result<Self, ConfigError> {
        Ok(Self::new(name, parse_params(name, params)?))
    }
}

impl MeasurementAlgorithm for MomentsShape {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Shape
    }

    fn declare_fields(&self, schema: &mut Schema, scope: &FieldScope<'_>) -> Result<(), SchemaError> {
        scope.add(schema, "xx", FieldKind::Float, "second moment in x")?;
        scope.add(schema, "yy", FieldKind::Float, "second moment in y")?;
        scope.add(schema, "xy", FieldKind::Float, "cross moment")
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
        let moments =
            footprint_moments_about(&image, &record.footprint, ctx.center, self.params.background)?;

        // Negative diagonal moments come from noise-dominated footprints
        if moments.m_xx < 0.0 || moments.m_yy < 0.0 {
            return Err(AlgorithmError::NonFinite { what: "shape" });
        }
        record.set_float(&scope.field("xx"), moments.m_xx);
        record.set_float(&scope.field("yy"), moments.m_yy);
        record.set_float(&scope.field("xy"), moments.m_xy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use shared::image_proc::exposure::Exposure;
    use shared::image_proc::footprint::Footprint;
    use shared::image_proc::test_patterns::add_gaussian_source;

    #[test]
    fn test_round_source_moments() {
        let mut image = Array2::zeros((40, 40));
        add_gaussian_source(&mut image, 20.0, 20.0, 5000.0, 2.0);
        let exposure = Exposure::from_image(image, 1.0);

        let algorithm = MomentsShape::new("shape.moments", ShapeParams::default());
        let scope = FieldScope::new("", algorithm.name());
        let mut record = SourceRecord::new(1, Footprint::from_rect(5, 5, 31, 31));
        let ctx = MeasurementContext {
            exposure: &exposure,
            center: (20.0, 20.0),
            forced: false,
        };
        algorithm.measure(&mut record, &ctx, &scope).unwrap();

        assert_relative_eq!(record.float("shape.moments.xx"), 4.0, epsilon = 1e-2);
        assert_relative_eq!(record.float("shape.moments.yy"), 4.0, epsilon = 1e-2);
        assert_relative_eq!(record.float("shape.moments.xy"), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_footprint_fails() {
        let exposure = Exposure::new(10, 10);
        let algorithm = MomentsShape::new("shape.moments", ShapeParams::default());
        let scope = FieldScope::new("", algorithm.name());
        let mut record = SourceRecord::new(1, Footprint::empty());
        let ctx = MeasurementContext {
            exposure: &exposure,
            center: (5.0, 5.0),
            forced: false,
        };
        assert!(algorithm.measure(&mut record, &ctx, &scope).is_err());
        assert!(record.float("shape.moments.xx").is_nan());
    }
}
