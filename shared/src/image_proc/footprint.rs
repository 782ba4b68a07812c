//! Footprints: the pixel set and peak list of one detected source.
//!
//! A footprint is stored as sorted, non-overlapping row spans. Pixel
//! iteration order is row-major (ascending y, then ascending x) and is the
//! order in which [`HeavyFootprint`] stores its values.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::aabb::AABB;

/// Errors from footprint construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FootprintError {
    /// A span was given with its start after its end.
    #[error("span on row {y} has x0 {x0} > x1 {x1}")]
    InvertedSpan {
        /// Row of the span.
        y: usize,
        /// Start column.
        x0: usize,
        /// End column.
        x1: usize,
    },

    /// Heavy footprint values do not line up with the footprint pixels.
    #[error("heavy footprint has {values} values for {pixels} pixels")]
    ValueCountMismatch {
        /// Number of values provided.
        values: usize,
        /// Number of footprint pixels.
        pixels: usize,
    },
}

/// Run of pixels `x0..=x1` on row `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub y: usize,
    pub x0: usize,
    pub x1: usize,
}

impl Span {
    pub fn new(y: usize, x0: usize, x1: usize) -> Result<Self, FootprintError> {
        if x0 > x1 {
            return Err(FootprintError::InvertedSpan { y, x0, x1 });
        }
        Ok(Self { y, x0, x1 })
    }

    /// Number of pixels in the span.
    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }
}

/// Local maximum inside a footprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

impl Peak {
    pub fn new(x: f64, y: f64, value: f64) -> Self {
        Self { x, y, value }
    }

    /// Integer pixel column of the peak.
    pub fn ix(&self) -> usize {
        self.x.round().max(0.0) as usize
    }

    /// Integer pixel row of the peak.
    pub fn iy(&self) -> usize {
        self.y.round().max(0.0) as usize
    }
}

/// Pixel set plus peak list for one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    spans: Vec<Span>,
    peaks: Vec<Peak>,
}

impl Footprint {
    /// Footprint from arbitrary spans; overlapping or touching spans on the
    /// same row are merged.
    pub fn new(mut spans: Vec<Span>) -> Self {
        spans.sort_by_key(|s| (s.y, s.x0));
        let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) if last.y == span.y && span.x0 <= last.x1 + 1 => {
                    last.x1 = last.x1.max(span.x1);
                }
                _ => merged.push(span),
            }
        }
        Self {
            spans: merged,
            peaks: Vec::new(),
        }
    }

    /// Footprint with no pixels.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every pixel of an inclusive bounding box.
    pub fn from_aabb(bbox: &AABB) -> Self {
        if !bbox.is_valid() {
            return Self::empty();
        }
        let spans = (bbox.min_row..=bbox.max_row)
            .map(|y| Span {
                y,
                x0: bbox.min_col,
                x1: bbox.max_col,
            })
            .collect();
        Self::new(spans)
    }

    /// Rectangle of `width` × `height` pixels with its corner at `(x0, y0)`.
    pub fn from_rect(x0: usize, y0: usize, width: usize, height: usize) -> Self {
        AABB::from_origin_size(x0, y0, width, height)
            .map(|bbox| Self::from_aabb(&bbox))
            .unwrap_or_default()
    }

    /// Pixels whose centers lie within `radius` of `(cx, cy)`, clipped at zero.
    pub fn from_circle(cx: f64, cy: f64, radius: f64) -> Self {
        let mut spans = Vec::new();
        if radius < 0.0 {
            return Self::empty();
        }
        let y_min = (cy - radius).ceil().max(0.0) as usize;
        let y_max = (cy + radius).floor();
        if y_max < 0.0 {
            return Self::empty();
        }
        for y in y_min..=(y_max as usize) {
            let dy = y as f64 - cy;
            let half = (radius * radius - dy * dy).sqrt();
            let x0 = (cx - half).ceil().max(0.0);
            let x1 = (cx + half).floor();
            if x1 >= x0 {
                spans.push(Span {
                    y,
                    x0: x0 as usize,
                    x1: x1 as usize,
                });
            }
        }
        Self::new(spans)
    }

    /// Builder-style peak addition.
    pub fn with_peak(mut self, peak: Peak) -> Self {
        self.peaks.push(peak);
        self
    }

    pub fn add_peak(&mut self, peak: Peak) {
        self.peaks.push(peak);
    }

    /// Order peaks brightest first.
    pub fn sort_peaks(&mut self) {
        self.peaks.sort_by(|a, b| b.value.total_cmp(&a.value));
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Number of pixels.
    pub fn area(&self) -> usize {
        self.spans.iter().map(Span::width).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn bbox(&self) -> Option<AABB> {
        if self.spans.is_empty() {
            return None;
        }
        let mut bbox = AABB::new();
        for span in &self.spans {
            bbox.expand_to_include(span.y, span.x0);
            bbox.expand_to_include(span.y, span.x1);
        }
        Some(bbox)
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        let start = self.spans.partition_point(|s| s.y < y);
        self.spans[start..]
            .iter()
            .take_while(|s| s.y == y)
            .any(|s| x >= s.x0 && x <= s.x1)
    }

    /// Row-major `(x, y)` pixel iterator.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.spans
            .iter()
            .flat_map(|s| (s.x0..=s.x1).map(move |x| (x, s.y)))
    }

    /// Copy restricted to an image of `width` × `height`; peaks are kept.
    pub fn clipped_to(&self, width: usize, height: usize) -> Footprint {
        let spans = self
            .spans
            .iter()
            .filter(|s| s.y < height && s.x0 < width)
            .map(|s| Span {
                y: s.y,
                x0: s.x0,
                x1: s.x1.min(width.saturating_sub(1)),
            })
            .collect();
        Footprint {
            spans,
            peaks: self.peaks.clone(),
        }
    }

    pub fn overlaps(&self, other: &Footprint) -> bool {
        match (self.bbox(), other.bbox()) {
            (Some(a), Some(b)) if a.overlaps(&b) => self.pixels().any(|(x, y)| other.contains(x, y)),
            _ => false,
        }
    }

    /// Boolean mask of the footprint over an image of the given shape.
    pub fn to_mask(&self, width: usize, height: usize) -> Array2<bool> {
        let mut mask = Array2::from_elem((height, width), false);
        for (x, y) in self.clipped_to(width, height).pixels() {
            mask[[y, x]] = true;
        }
        mask
    }
}

/// Footprint carrying its own pixel values.
///
/// Used to snapshot original pixels before they are overwritten and to
/// carry deblended child pixel values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeavyFootprint {
    footprint: Footprint,
    values: Vec<f64>,
}

impl HeavyFootprint {
    pub fn new(footprint: Footprint, values: Vec<f64>) -> Result<Self, FootprintError> {
        let pixels = footprint.area();
        if values.len() != pixels {
            return Err(FootprintError::ValueCountMismatch {
                values: values.len(),
                pixels,
            });
        }
        Ok(Self { footprint, values })
    }

    /// Snapshot the image under `footprint` (clipped to the image).
    pub fn from_image(footprint: &Footprint, image: &ArrayView2<f64>) -> Self {
        let (height, width) = image.dim();
        let footprint = footprint.clipped_to(width, height);
        let values = footprint.pixels().map(|(x, y)| image[[y, x]]).collect();
        Self { footprint, values }
    }

    /// Write the stored values back into `image`.
    pub fn insert_into(&self, image: &mut Array2<f64>) {
        let (height, width) = image.dim();
        for ((x, y), &value) in self.footprint.pixels().zip(&self.values) {
            if x < width && y < height {
                image[[y, x]] = value;
            }
        }
    }

    pub fn footprint(&self) -> &Footprint {
        &self.footprint
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}
