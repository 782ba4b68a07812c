//! Common utilities for meas_task tests

#![allow(dead_code)]

use meas_task::{Schema, SourceCatalog, SourceRecord, SourceTable};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::image_proc::exposure::Exposure;
use shared::image_proc::footprint::{Footprint, Peak};
use shared::image_proc::noise::normal_field;
use shared::image_proc::test_patterns::add_gaussian_source;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A star to render into a synthetic exposure
#[derive(Debug, Clone, Copy)]
pub struct Star {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub sigma: f64,
}

impl Star {
    pub fn new(x: f64, y: f64, flux: f64) -> Self {
        Self {
            x,
            y,
            flux,
            sigma: 1.0,
        }
    }
}

/// Zero-mean Gaussian background of `noise_sigma` with stars added; the
/// variance plane is `noise_sigma²` everywhere.
pub fn synthetic_exposure(
    width: usize,
    height: usize,
    noise_sigma: f64,
    stars: &[Star],
    seed: u64,
) -> Exposure {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut image: Array2<f64> = normal_field((height, width), 0.0, noise_sigma, &mut rng).unwrap();
    for star in stars {
        add_gaussian_source(&mut image, star.x, star.y, star.flux, star.sigma);
    }
    Exposure::from_image(image, noise_sigma * noise_sigma)
}

/// Square footprint of side `size` centered on integer pixel `(cx, cy)`
/// with a peak at the center.
pub fn square_footprint(cx: usize, cy: usize, size: usize) -> Footprint {
    let half = size / 2;
    Footprint::from_rect(cx - half, cy - half, size, size).with_peak(Peak::new(
        cx as f64,
        cy as f64,
        1.0,
    ))
}

/// Catalog over `schema` with ids 1.. in footprint order.
pub fn catalog(schema: Schema, footprints: Vec<Footprint>) -> SourceCatalog {
    let mut catalog = SourceCatalog::new(SourceTable::new(schema));
    for (i, footprint) in footprints.into_iter().enumerate() {
        catalog.push(SourceRecord::new(i as u64 + 1, footprint));
    }
    catalog
}

/// Pixel values of `footprint` in row-major span order.
pub fn footprint_pixels(exposure: &Exposure, footprint: &Footprint) -> Vec<f64> {
    footprint
        .pixels()
        .map(|(x, y)| exposure.image[[y, x]])
        .collect()
}

/// Measured values of every record, NaN-safe for equality checks.
pub fn measured_values(catalog: &SourceCatalog) -> Vec<String> {
    catalog
        .iter()
        .map(|record| format!("{}: {:?}", record.id, record.values().collect::<Vec<_>>()))
        .collect()
}
