//! Synthetic field measurement.
//!
//! Renders Gaussian stars on a noisy sky, detects them, measures every
//! detection with noise replacement and prints the slot values.
//!
//! Usage:
//! ```
//! cargo run --release --bin measure_field -- --stars 40 --seed 7
//! cargo run --release --bin measure_field -- --config meas.json --regions field.reg --display 2
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use meas_task::display::{DisplayHooks, Ds9RegionSink};
use meas_task::{
    MeasureInputs, MeasurementConfig, Schema, SlotRole, SourceCatalog, SourceMeasurementTask,
    SourceRecord, SourceTable,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::defects::{apply_defects, load_defects};
use shared::image_proc::detection::detect_footprints;
use shared::image_proc::exposure::{mask_bits, Exposure};
use shared::image_proc::test_patterns::{star_field, InjectedSource};

#[derive(Parser)]
#[command(name = "measure_field")]
#[command(about = "Detect and measure sources on a synthetic star field")]
#[command(version)]
struct Args {
    /// Image width in pixels
    #[arg(long, default_value_t = 256)]
    width: usize,

    /// Image height in pixels
    #[arg(long, default_value_t = 256)]
    height: usize,

    /// Number of stars to inject
    #[arg(short = 'n', long, default_value_t = 25)]
    stars: usize,

    /// Total flux of each star
    #[arg(long, default_value_t = 5000.0)]
    flux: f64,

    /// Gaussian PSF sigma in pixels
    #[arg(long, default_value_t = 1.5)]
    psf_sigma: f64,

    /// Flat sky level
    #[arg(long, default_value_t = 100.0)]
    sky: f64,

    /// Per-pixel noise sigma
    #[arg(long, default_value_t = 5.0)]
    noise: f64,

    /// Random seed for star positions and pixel noise
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Detection threshold in units of the noise sigma
    #[arg(short = 'k', long, default_value_t = 5.0)]
    threshold_sigma: f64,

    /// Minimum pixels per detection
    #[arg(long, default_value_t = 5)]
    min_pixels: usize,

    /// Bad-pixel regions (JSON) to mark in the mask plane
    #[arg(long, value_name = "FILE")]
    defects: Option<PathBuf>,

    /// Measurement configuration (JSON); defaults are used when absent
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write ds9 regions for every measured source to this file
    #[arg(long, value_name = "FILE")]
    regions: Option<PathBuf>,

    /// Diagnostic display level (0 = off)
    #[arg(long, default_value_t = 1)]
    display: u8,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => MeasurementConfig::load_from_file(path)?,
        None => MeasurementConfig::default(),
    };

    let margin = 4.0 * args.psf_sigma;
    anyhow::ensure!(
        (args.width.min(args.height) as f64) > 2.0 * margin,
        "image of {}x{} is too small for PSF sigma {}",
        args.width,
        args.height,
        args.psf_sigma
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let injected: Vec<InjectedSource> = (0..args.stars)
        .map(|_| InjectedSource {
            x: rng.gen_range(margin..args.width as f64 - margin),
            y: rng.gen_range(margin..args.height as f64 - margin),
            flux: args.flux,
            sigma: args.psf_sigma,
        })
        .collect();

    let (image, _) = star_field(
        args.width,
        args.height,
        args.sky,
        args.noise,
        &injected,
        &mut rng,
    )?;
    let image = image.mapv(|v| v - args.sky);
    let mut exposure = Exposure::from_image(image, args.noise * args.noise);

    if let Some(path) = &args.defects {
        let defects = load_defects(path)?;
        let flagged = apply_defects(&defects, &mut exposure.mask, mask_bits::BAD);
        println!("Masked {flagged} pixels in {} defects", defects.len());
    }

    let footprints = detect_footprints(
        &exposure.image.view(),
        args.threshold_sigma * args.noise,
        args.min_pixels,
    );
    println!(
        "Injected {} stars, detected {} sources",
        injected.len(),
        footprints.len()
    );

    let mut schema = Schema::minimal();
    let mut task = SourceMeasurementTask::new(config, &mut schema)?;

    let mut sources = SourceCatalog::new(SourceTable::new(schema));
    for (i, footprint) in footprints.into_iter().enumerate() {
        sources.push(SourceRecord::new(i as u64 + 1, footprint));
    }

    let regions = match &args.regions {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating region file {}", path.display()))?;
            let sink = Arc::new(Ds9RegionSink::new(BufWriter::new(file))?);
            task = task.with_hooks(Box::new(DisplayHooks::with_sink(args.display, sink.clone())));
            Some(sink)
        }
        None => None,
    };

    task.measure(&mut exposure, &mut sources, MeasureInputs::default())?;

    print_table(&sources);

    if let (Some(sink), Some(path)) = (regions, &args.regions) {
        drop(task);
        if let Ok(sink) = Arc::try_unwrap(sink) {
            use std::io::Write;
            sink.into_inner().flush()?;
        }
        println!("Wrote regions to {}", path.display());
    }

    Ok(())
}

fn print_table(sources: &SourceCatalog) {
    let table = sources.table();
    println!(
        "{:>5} {:>9} {:>9} {:>8} {:>8} {:>8} {:>11} {:>11}",
        "id", "x", "y", "xx", "yy", "xy", "apFlux", "instFlux"
    );
    for record in sources {
        let (x, y) = table.centroid(record).unwrap_or((f64::NAN, f64::NAN));
        let (xx, yy, xy) = table
            .shape(record)
            .unwrap_or((f64::NAN, f64::NAN, f64::NAN));
        let (ap, _) = table
            .flux(SlotRole::ApFlux, record)
            .unwrap_or((f64::NAN, f64::NAN));
        let (inst, _) = table
            .flux(SlotRole::InstFlux, record)
            .unwrap_or((f64::NAN, f64::NAN));
        println!(
            "{:>5} {:>9.3} {:>9.3} {:>8.3} {:>8.3} {:>8.3} {:>11.1} {:>11.1}",
            record.id, x, y, xx, yy, xy, ap, inst
        );
    }
}
