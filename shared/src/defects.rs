//! Sensor defect lists.
//!
//! Defects are rectangular bad regions described in a JSON document of the
//! form `{"Defects": [{"x0": .., "y0": .., "width": .., "height": ..}, ..]}`.
//! A region may give its far corner (`x1`, `y1`) instead of a size; the size
//! is then `x1 - x0 - 1` (resp. `y1 - y0 - 1`). A zero `width` also falls
//! back to `x1`.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image_proc::aabb::AABB;

#[derive(Error, Debug)]
pub enum DefectError {
    #[error("failed to read defect file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse defect list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("defect {index}: missing {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("defect {index}: non-positive extent {width}x{height}")]
    EmptyRegion { index: usize, width: i64, height: i64 },

    #[error("defect {index}: negative origin ({x0}, {y0})")]
    NegativeOrigin { index: usize, x0: i64, y0: i64 },
}

#[derive(Debug, Deserialize)]
struct DefectDocument {
    #[serde(rename = "Defects", default)]
    defects: Vec<RawRegion>,
}

#[derive(Debug, Deserialize)]
struct RawRegion {
    x0: Option<i64>,
    y0: Option<i64>,
    width: Option<i64>,
    height: Option<i64>,
    x1: Option<i64>,
    y1: Option<i64>,
}

/// Rectangular bad region with origin `(x0, y0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

impl Defect {
    pub fn bbox(&self) -> Option<AABB> {
        AABB::from_origin_size(self.x0, self.y0, self.width, self.height)
    }

    /// OR `bits` into every mask pixel covered by the defect.
    ///
    /// Returns the number of pixels touched after clipping to the mask.
    pub fn apply_to_mask(&self, mask: &mut Array2<u16>, bits: u16) -> usize {
        let (height, width) = mask.dim();
        let Some(clipped) = self.bbox().and_then(|b| b.clip_to(width, height)) else {
            return 0;
        };
        let mut touched = 0;
        for row in clipped.min_row..=clipped.max_row {
            for col in clipped.min_col..=clipped.max_col {
                mask[[row, col]] |= bits;
                touched += 1;
            }
        }
        touched
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.bbox().is_some_and(|b| b.contains(y, x))
    }
}

impl RawRegion {
    fn resolve(&self, index: usize) -> Result<Defect, DefectError> {
        let x0 = self
            .x0
            .ok_or(DefectError::MissingField { index, field: "x0" })?;
        let y0 = self
            .y0
            .ok_or(DefectError::MissingField { index, field: "y0" })?;

        let width = match self.width {
            Some(w) if w != 0 => w,
            _ => {
                let x1 = self.x1.ok_or(DefectError::MissingField {
                    index,
                    field: "width or x1",
                })?;
                x1 - x0 - 1
            }
        };
        let height = match self.height {
            Some(h) => h,
            None => {
                let y1 = self.y1.ok_or(DefectError::MissingField {
                    index,
                    field: "height or y1",
                })?;
                y1 - y0 - 1
            }
        };

        if x0 < 0 || y0 < 0 {
            return Err(DefectError::NegativeOrigin { index, x0, y0 });
        }
        if width <= 0 || height <= 0 {
            return Err(DefectError::EmptyRegion {
                index,
                width,
                height,
            });
        }

        Ok(Defect {
            x0: x0 as usize,
            y0: y0 as usize,
            width: width as usize,
            height: height as usize,
        })
    }
}

/// Parse a defect list from its JSON text.
pub fn parse_defects(json: &str) -> Result<Vec<Defect>, DefectError> {
    let document: DefectDocument = serde_json::from_str(json)?;
    document
        .defects
        .iter()
        .enumerate()
        .map(|(index, region)| region.resolve(index))
        .collect()
}

/// Load a defect list from a JSON file.
pub fn load_defects(path: &Path) -> Result<Vec<Defect>, DefectError> {
    let json = std::fs::read_to_string(path)?;
    let defects = parse_defects(&json)?;
    log::info!("Loaded {} defects from {}", defects.len(), path.display());
    Ok(defects)
}

/// Apply every defect to `mask`, returning the number of pixels touched.
pub fn apply_defects(defects: &[Defect], mask: &mut Array2<u16>, bits: u16) -> usize {
    defects.iter().map(|d| d.apply_to_mask(mask, bits)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::exposure::mask_bits;
    use std::io::Write;

    #[test]
    fn test_explicit_size() {
        let defects = parse_defects(r#"{"Defects": [{"x0": 2, "y0": 3, "width": 4, "height": 5}]}"#).unwrap();
        assert_eq!(
            defects,
            vec![Defect {
                x0: 2,
                y0: 3,
                width: 4,
                height: 5
            }]
        );
    }

    #[test]
    fn test_far_corner_fallback() {
        let json = r#"{"Defects": [
            {"x0": 10, "x1": 15, "y0": 0, "y1": 8},
            {"x0": 1, "width": 0, "x1": 4, "y0": 2, "height": 3}
        ]}"#;
        let defects = parse_defects(json).unwrap();
        assert_eq!(defects[0].width, 4);
        assert_eq!(defects[0].height, 7);
        assert_eq!(defects[1].width, 2);
        assert_eq!(defects[1].height, 3);
    }

    #[test]
    fn test_invalid_regions() {
        assert!(matches!(
            parse_defects(r#"{"Defects": [{"x0": 1, "y0": 1, "height": 2}]}"#),
            Err(DefectError::MissingField { index: 0, .. })
        ));
        assert!(matches!(
            parse_defects(r#"{"Defects": [{"x0": 1, "y0": 1, "x1": 2, "height": 2}]}"#),
            Err(DefectError::EmptyRegion { .. })
        ));
        assert!(matches!(parse_defects("not json"), Err(DefectError::Parse(_))));
        assert!(parse_defects("{}").unwrap().is_empty());
    }

    #[test]
    fn test_apply_to_mask_clips() {
        let mut mask = Array2::<u16>::zeros((6, 6));
        let defect = Defect {
            x0: 4,
            y0: 4,
            width: 5,
            height: 5,
        };
        assert_eq!(defect.apply_to_mask(&mut mask, mask_bits::BAD), 4);
        assert_eq!(mask[[5, 5]], mask_bits::BAD);
        assert_eq!(mask[[3, 3]], 0);
        assert!(defect.contains(4, 5));
        assert!(!defect.contains(3, 5));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Defects": [{{"x0": 0, "y0": 0, "width": 2, "height": 2}}]}}"#).unwrap();
        let defects = load_defects(file.path()).unwrap();
        assert_eq!(defects.len(), 1);

        let mut mask = Array2::<u16>::zeros((4, 4));
        assert_eq!(apply_defects(&defects, &mut mask, mask_bits::BAD), 4);
    }
}
