//! Axis-aligned bounding boxes in pixel coordinates.
//!
//! Rows increase downward (y), columns increase rightward (x), and both
//! bounds are inclusive. Footprints and defect regions report their extent
//! with this type.

use serde::{Deserialize, Serialize};

/// Inclusive rectangular region of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AABB {
    /// Minimum row (y) coordinate (inclusive)
    pub min_row: usize,
    /// Minimum column (x) coordinate (inclusive)
    pub min_col: usize,
    /// Maximum row (y) coordinate (inclusive)
    pub max_row: usize,
    /// Maximum column (x) coordinate (inclusive)
    pub max_col: usize,
}

impl Default for AABB {
    fn default() -> Self {
        Self::new()
    }
}

impl AABB {
    /// Empty box with inverted bounds, grown with [`AABB::expand_to_include`].
    pub fn new() -> Self {
        Self {
            min_row: usize::MAX,
            min_col: usize::MAX,
            max_row: 0,
            max_col: 0,
        }
    }

    /// Box from explicit inclusive bounds.
    pub fn from_coords(min_row: usize, min_col: usize, max_row: usize, max_col: usize) -> Self {
        Self {
            min_row,
            min_col,
            max_row,
            max_col,
        }
    }

    /// Box from an origin and a size in pixels.
    ///
    /// Returns `None` for a zero-sized box.
    pub fn from_origin_size(x0: usize, y0: usize, width: usize, height: usize) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self::from_coords(y0, x0, y0 + height - 1, x0 + width - 1))
    }

    /// True once at least one pixel has been included.
    pub fn is_valid(&self) -> bool {
        self.min_row <= self.max_row && self.min_col <= self.max_col
    }

    /// Grow the box to cover `(row, col)`.
    pub fn expand_to_include(&mut self, row: usize, col: usize) {
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
    }

    pub fn width(&self) -> usize {
        if self.is_valid() {
            self.max_col - self.min_col + 1
        } else {
            0
        }
    }

    pub fn height(&self) -> usize {
        if self.is_valid() {
            self.max_row - self.min_row + 1
        } else {
            0
        }
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// Center of the box in (x, y) pixel coordinates.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_col + self.max_col) as f64 / 2.0,
            (self.min_row + self.max_row) as f64 / 2.0,
        )
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.is_valid()
            && row >= self.min_row
            && row <= self.max_row
            && col >= self.min_col
            && col <= self.max_col
    }

    pub fn overlaps(&self, other: &AABB) -> bool {
        self.is_valid()
            && other.is_valid()
            && self.min_row <= other.max_row
            && other.min_row <= self.max_row
            && self.min_col <= other.max_col
            && other.min_col <= self.max_col
    }

    /// Intersection with an image of the given size, `None` if disjoint.
    pub fn clip_to(&self, width: usize, height: usize) -> Option<AABB> {
        if !self.is_valid() || width == 0 || height == 0 {
            return None;
        }
        if self.min_row >= height || self.min_col >= width {
            return None;
        }
        Some(AABB::from_coords(
            self.min_row,
            self.min_col,
            self.max_row.min(height - 1),
            self.max_col.min(width - 1),
        ))
    }

    /// True when the box touches the outermost row or column of the image.
    pub fn touches_edge(&self, width: usize, height: usize) -> bool {
        self.is_valid()
            && (self.min_row == 0
                || self.min_col == 0
                || self.max_row + 1 >= height
                || self.max_col + 1 >= width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_and_size() {
        let mut bbox = AABB::new();
        assert!(!bbox.is_valid());
        assert_eq!(bbox.area(), 0);

        bbox.expand_to_include(3, 4);
        bbox.expand_to_include(5, 2);
        assert_eq!(bbox, AABB::from_coords(3, 2, 5, 4));
        assert_eq!(bbox.width(), 3);
        assert_eq!(bbox.height(), 3);
        assert_eq!(bbox.center(), (3.0, 4.0));
    }

    #[test]
    fn test_from_origin_size() {
        let bbox = AABB::from_origin_size(10, 20, 5, 2).unwrap();
        assert_eq!(bbox.min_col, 10);
        assert_eq!(bbox.max_col, 14);
        assert_eq!(bbox.min_row, 20);
        assert_eq!(bbox.max_row, 21);
        assert!(AABB::from_origin_size(1, 1, 0, 3).is_none());
    }

    #[test]
    fn test_overlap_and_clip() {
        let a = AABB::from_coords(0, 0, 4, 4);
        let b = AABB::from_coords(4, 4, 8, 8);
        let c = AABB::from_coords(5, 5, 8, 8);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));

        let clipped = b.clip_to(6, 6).unwrap();
        assert_eq!(clipped, AABB::from_coords(4, 4, 5, 5));
        assert!(c.clip_to(5, 5).is_none());
    }

    #[test]
    fn test_touches_edge() {
        assert!(AABB::from_coords(0, 3, 2, 5).touches_edge(10, 10));
        assert!(AABB::from_coords(3, 3, 9, 5).touches_edge(10, 10));
        assert!(!AABB::from_coords(3, 3, 5, 5).touches_edge(10, 10));
    }
}
