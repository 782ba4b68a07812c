//! Threshold segmentation for source detection.
//!
//! Pixels at or above a threshold are grouped into 4-connected components
//! with a two-pass union-find labeler; each component becomes a footprint.

use ndarray::{Array2, ArrayView2};

use crate::image_proc::footprint::{Footprint, Peak, Span};

/// Binary mask of pixels at or above `threshold`. NaN never passes.
pub fn apply_threshold(image: &ArrayView2<f64>, threshold: f64) -> Array2<bool> {
    image.mapv(|pixel| pixel >= threshold)
}

fn find_root(labels: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != labels[current] {
        // Path halving
        labels[current] = labels[labels[current]];
        current = labels[current];
    }
    current
}

fn union_labels(labels: &mut [usize], label1: usize, label2: usize) {
    let root1 = find_root(labels, label1);
    let root2 = find_root(labels, label2);
    if root1 < root2 {
        labels[root2] = root1;
    } else if root2 < root1 {
        labels[root1] = root2;
    }
}

/// Two-pass 4-connected component labeling.
///
/// Background pixels get label 0, components get consecutive labels from 1
/// in raster order of their first pixel.
pub fn connected_components(binary: &ArrayView2<bool>) -> Array2<usize> {
    let (height, width) = binary.dim();
    let mut labels = Array2::zeros((height, width));
    let mut parent_table = vec![0];

    for i in 0..height {
        for j in 0..width {
            if !binary[[i, j]] {
                continue;
            }
            let up = if i > 0 { labels[[i - 1, j]] } else { 0 };
            let left = if j > 0 { labels[[i, j - 1]] } else { 0 };

            labels[[i, j]] = match (up, left) {
                (0, 0) => {
                    let label = parent_table.len();
                    parent_table.push(label);
                    label
                }
                (a, 0) | (0, a) => a,
                (a, b) => {
                    union_labels(&mut parent_table, a, b);
                    a.min(b)
                }
            };
        }
    }

    for i in 1..parent_table.len() {
        find_root(&mut parent_table, i);
    }

    let mut relabel_map = vec![0; parent_table.len()];
    let mut next_label = 1;
    for i in 1..parent_table.len() {
        let root = find_root(&mut parent_table, i);
        if relabel_map[root] == 0 {
            relabel_map[root] = next_label;
            next_label += 1;
        }
        relabel_map[i] = relabel_map[root];
    }

    labels.mapv_inplace(|label| relabel_map[label]);
    labels
}

/// Detect sources as footprints of connected above-threshold pixels.
///
/// Components smaller than `min_pixels` are discarded. Each footprint gets
/// one peak at its brightest pixel. Footprints are returned in raster order.
pub fn detect_footprints(image: &ArrayView2<f64>, threshold: f64, min_pixels: usize) -> Vec<Footprint> {
    let labels = connected_components(&apply_threshold(image, threshold).view());
    let n_labels = labels.iter().copied().max().unwrap_or(0);

    let mut spans: Vec<Vec<Span>> = vec![Vec::new(); n_labels + 1];
    let mut peaks: Vec<Option<Peak>> = vec![None; n_labels + 1];

    for ((y, x), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let value = image[[y, x]];
        if peaks[label].map_or(true, |p| value > p.value) {
            peaks[label] = Some(Peak::new(x as f64, y as f64, value));
        }

        let runs = &mut spans[label];
        match runs.last_mut() {
            Some(span) if span.y == y && span.x1 + 1 == x => span.x1 = x,
            _ => runs.push(Span { y, x0: x, x1: x }),
        }
    }

    let footprints: Vec<Footprint> = spans
        .into_iter()
        .zip(peaks)
        .skip(1)
        .filter_map(|(runs, peak)| {
            let footprint = Footprint::new(runs);
            if footprint.area() < min_pixels.max(1) {
                return None;
            }
            peak.map(|p| footprint.with_peak(p))
        })
        .collect();

    log::debug!(
        "Detected {} footprints above threshold {:.3} ({} components before size cut)",
        footprints.len(),
        threshold,
        n_labels
    );
    footprints
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn create_test_image(pattern: &[&[i32]]) -> Array2<f64> {
        let height = pattern.len();
        let width = pattern[0].len();
        Array2::from_shape_fn((height, width), |(i, j)| pattern[i][j] as f64)
    }

    #[test]
    fn test_empty_image() {
        let image = Array2::<f64>::zeros((5, 5));
        let labeled = connected_components(&apply_threshold(&image.view(), 0.5).view());
        assert!(labeled.iter().all(|&l| l == 0));
        assert!(detect_footprints(&image.view(), 0.5, 1).is_empty());
    }

    #[test]
    fn test_u_shape_merges_into_one_label() {
        let pattern: &[&[i32]] = &[
            &[1, 0, 0, 1],
            &[1, 0, 0, 1],
            &[1, 1, 1, 1],
        ];
        let image = create_test_image(pattern);
        let labeled = connected_components(&apply_threshold(&image.view(), 0.5).view());
        let labels: Vec<usize> = labeled.iter().copied().filter(|&l| l > 0).collect();
        assert_eq!(labels.len(), 8);
        assert!(labels.iter().all(|&l| l == 1));
    }

    #[test]
    fn test_diagonal_pixels_are_separate() {
        let pattern: &[&[i32]] = &[
            &[1, 0, 0],
            &[0, 1, 0],
            &[0, 0, 1],
        ];
        let image = create_test_image(pattern);
        let labeled = connected_components(&apply_threshold(&image.view(), 0.5).view());
        assert_eq!(labeled[[0, 0]], 1);
        assert_eq!(labeled[[1, 1]], 2);
        assert_eq!(labeled[[2, 2]], 3);
    }

    #[test]
    fn test_detect_footprints_with_peaks() {
        let mut image = Array2::<f64>::zeros((20, 20));
        for y in 3..6 {
            for x in 3..6 {
                image[[y, x]] = 10.0;
            }
        }
        image[[4, 5]] = 30.0;
        image[[15, 15]] = 10.0;

        let footprints = detect_footprints(&image.view(), 5.0, 2);
        assert_eq!(footprints.len(), 1);

        let fp = &footprints[0];
        assert_eq!(fp.area(), 9);
        assert_eq!(fp.peaks().len(), 1);
        assert_eq!(fp.peaks()[0].ix(), 5);
        assert_eq!(fp.peaks()[0].iy(), 4);
        assert_eq!(fp.peaks()[0].value, 30.0);

        assert_eq!(detect_footprints(&image.view(), 5.0, 1).len(), 2);
    }
}
