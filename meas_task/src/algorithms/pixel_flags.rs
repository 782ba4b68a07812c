use shared::image_proc::exposure::mask_bits;

use super::{AlgorithmError, AlgorithmKind, FieldScope, MeasurementAlgorithm, MeasurementContext};
use crate::table::{FieldKind, Schema, SchemaError, SourceRecord};

/// Mask-plane summary flags for the footprint.
///
/// - `edge`: footprint touches the image border, leaves the image, or
///   covers an EDGE pixel
/// - `bad`: footprint covers a BAD pixel
/// - `saturated`: footprint covers a SAT pixel
#[derive(Debug, Clone)]
pub struct PixelFlags {
    name: String,
}

impl PixelFlags {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl MeasurementAlgorithm for PixelFlags {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Flags
    }

    fn declare_fields(&self, schema: &mut Schema, scope: &FieldScope<'_>) -> Result<(), SchemaError> {
        scope.add(schema, "edge", FieldKind::Flag, "source is on the image edge")?;
        scope.add(schema, "bad", FieldKind::Flag, "source covers a bad pixel")?;
        scope.add(schema, "saturated", FieldKind::Flag, "source covers a saturated pixel")
    }

    fn measure(
        &self,
        record: &mut SourceRecord,
        ctx: &MeasurementContext<'_>,
        scope: &FieldScope<'_>,
    ) -> Result<(), AlgorithmError> {
        let exposure = ctx.exposure;
        let (width, height) = (exposure.width(), exposure.height());
        let bbox = record.footprint.bbox().ok_or(AlgorithmError::EmptyFootprint)?;

        let clipped = record.footprint.clipped_to(width, height);
        let mut edge = bbox.touches_edge(width, height) || clipped.area() < record.footprint.area();
        let mut bad = false;
        let mut saturated = false;
        for (x, y) in clipped.pixels() {
            let bits = exposure.mask[[y, x]];
            edge |= bits & mask_bits::EDGE != 0;
            bad |= bits & mask_bits::BAD != 0;
            saturated |= bits & mask_bits::SAT != 0;
        }

        record.set_flag(&scope.field("edge"), edge);
        record.set_flag(&scope.field("bad"), bad);
        record.set_flag(&scope.field("saturated"), saturated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::image_proc::exposure::Exposure;
    use shared::image_proc::footprint::Footprint;

    #[test]
    fn test_mask_bits_become_flags() {
        let mut exposure = Exposure::new(20, 20);
        exposure.mask[[6, 6]] = mask_bits::SAT;
        exposure.mask[[15, 15]] = mask_bits::BAD;

        let algorithm = PixelFlags::new("flags.pixel");
        let scope = FieldScope::new("", algorithm.name());
        let ctx = MeasurementContext {
            exposure: &exposure,
            center: (6.0, 6.0),
            forced: false,
        };

        let mut inner = SourceRecord::new(1, Footprint::from_rect(4, 4, 5, 5));
        algorithm.measure(&mut inner, &ctx, &scope).unwrap();
        assert!(inner.flag("flags.pixel.saturated"));
        assert!(!inner.flag("flags.pixel.bad"));
        assert!(!inner.flag("flags.pixel.edge"));

        let mut corner = SourceRecord::new(2, Footprint::from_rect(17, 14, 5, 3));
        algorithm.measure(&mut corner, &ctx, &scope).unwrap();
        assert!(corner.flag("flags.pixel.edge"));
        assert!(!corner.flag("flags.pixel.bad"));

        let mut covering = SourceRecord::new(3, Footprint::from_rect(14, 14, 3, 3));
        algorithm.measure(&mut covering, &ctx, &scope).unwrap();
        assert!(covering.flag("flags.pixel.bad"));
    }
}
