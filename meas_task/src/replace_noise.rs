//! Neighbour isolation by replacing detected footprints with noise.
//!
//! [`NoiseReplacer::begin`] snapshots the pixels under every footprint and
//! then overwrites them with noise. Sources are then shown one at a time
//! with [`NoiseReplacer::insert_source`] and hidden again with
//! [`NoiseReplacer::remove_source`]. [`NoiseReplacer::end`] writes every
//! snapshot back, leaving the image bit-identical to what `begin` saw.
//!
//! All snapshots, including the pixels under deblended (heavy) footprints,
//! are taken before any noise is written, so overlapping footprints restore
//! exactly whatever the order of later calls.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::image_proc::exposure::{mask_bits, Exposure};
use shared::image_proc::footprint::{Footprint, HeavyFootprint};
use shared::image_proc::noise::{measure_background, NoiseGenerator};

use crate::config::{NoiseReplacerConfig, NoiseSourceKind};
use crate::error::ReplaceError;
use crate::table::{SourceCatalog, SourceRecord};

/// Which real pixels a source shows when inserted.
#[derive(Debug, Clone)]
enum InsertPlan {
    /// The snapshot of the source's own footprint
    Own,
    /// The deblended pixel values of a child
    Heavy(HeavyFootprint),
    /// The snapshot of the parent at this catalog index
    Parent(usize),
}

#[derive(Debug)]
struct ReplaceState {
    generator: NoiseGenerator,
    rng: StdRng,
    ids: Vec<u64>,
    originals: Vec<HeavyFootprint>,
    /// Pixels under deblended footprints, which may reach outside every
    /// record footprint
    heavy_originals: Vec<HeavyFootprint>,
    plans: Vec<InsertPlan>,
    inserted: Option<usize>,
}

impl ReplaceState {
    /// Footprint whose pixels become real when `index` is inserted.
    fn shown_footprint(&self, index: usize) -> &Footprint {
        match &self.plans[index] {
            InsertPlan::Own => self.originals[index].footprint(),
            InsertPlan::Heavy(heavy) => heavy.footprint(),
            InsertPlan::Parent(parent) => self.originals[*parent].footprint(),
        }
    }

    fn check_index(&self, index: usize) -> Result<(), ReplaceError> {
        if index >= self.originals.len() {
            return Err(ReplaceError::IndexOutOfRange {
                index,
                len: self.originals.len(),
            });
        }
        Ok(())
    }

    fn renoise(&mut self, exposure: &mut Exposure, index: usize) {
        let footprint = self.shown_footprint(index).clone();
        self.generator.fill(exposure, &footprint, &mut self.rng);
    }
}

/// Swaps detected-source pixels for noise around the measurement loop.
#[derive(Debug, Default)]
pub struct NoiseReplacer {
    config: NoiseReplacerConfig,
    state: Option<ReplaceState>,
}

impl NoiseReplacer {
    pub fn new(config: NoiseReplacerConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn config(&self) -> &NoiseReplacerConfig {
        &self.config
    }

    /// True between `begin` and `end`.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Index of the source whose real pixels are currently visible.
    pub fn inserted(&self) -> Option<usize> {
        self.state.as_ref().and_then(|s| s.inserted)
    }

    /// Pick the noise model; an explicit image wins over a (mean, variance)
    /// pair, which wins over the configured source.
    fn select_generator(
        &self,
        exposure: &Exposure,
        sources: &SourceCatalog,
        noise_image: Option<&Array2<f64>>,
        noise_mean_var: Option<(f64, f64)>,
    ) -> Result<NoiseGenerator, ReplaceError> {
        let generator = if let Some(image) = noise_image {
            log::debug!("Replacing footprints with pixels from the supplied noise image");
            NoiseGenerator::image(image.clone())
        } else if let Some((mean, variance)) = noise_mean_var {
            log::debug!("Replacing footprints with Gaussian noise: mean {mean}, variance {variance}");
            NoiseGenerator::gaussian(mean, variance)?
        } else {
            match self.config.noise_source {
                NoiseSourceKind::Variance => {
                    log::debug!("Replacing footprints with noise from the variance plane");
                    NoiseGenerator::variance_plane(0.0)?
                }
                NoiseSourceKind::Measure => {
                    let stats = measure_background(
                        exposure,
                        sources.iter().map(|r| &r.footprint),
                        mask_bits::BAD,
                    )?;
                    log::debug!(
                        "Measured background for noise: mean {:.4}, variance {:.4} from {} pixels",
                        stats.mean,
                        stats.variance,
                        stats.npix
                    );
                    NoiseGenerator::gaussian(stats.mean, stats.variance)?
                }
            }
        };
        Ok(generator.with_offset(self.config.noise_offset)?)
    }

    /// Snapshot every footprint, then overwrite them all with noise.
    ///
    /// Nothing is written if the noise model is unusable for any footprint.
    pub fn begin(
        &mut self,
        exposure: &mut Exposure,
        sources: &SourceCatalog,
        noise_image: Option<&Array2<f64>>,
        noise_mean_var: Option<(f64, f64)>,
    ) -> Result<(), ReplaceError> {
        if self.state.is_some() {
            return Err(ReplaceError::AlreadyActive);
        }

        let generator = self.select_generator(exposure, sources, noise_image, noise_mean_var)?;
        let touched = sources.iter().flat_map(|r| {
            std::iter::once(&r.footprint).chain(r.heavy.as_ref().map(|h| h.footprint()))
        });
        generator.validate(exposure, touched)?;

        let image = exposure.image.view();
        let originals: Vec<HeavyFootprint> = sources
            .iter()
            .map(|r| HeavyFootprint::from_image(&r.footprint, &image))
            .collect();
        let heavy_originals: Vec<HeavyFootprint> = sources
            .iter()
            .filter_map(|r| r.heavy.as_ref())
            .map(|h| HeavyFootprint::from_image(h.footprint(), &image))
            .collect();
        let plans: Vec<InsertPlan> = sources.iter().map(|r| insert_plan(r, sources)).collect();
        let ids: Vec<u64> = sources.iter().map(|r| r.id).collect();

        let mut state = ReplaceState {
            generator,
            rng: StdRng::seed_from_u64(self.config.noise_seed),
            ids,
            originals,
            heavy_originals,
            plans,
            inserted: None,
        };
        let mut npix = 0;
        for original in &state.originals {
            npix += original.footprint().area();
            state
                .generator
                .fill(exposure, original.footprint(), &mut state.rng);
        }

        log::info!(
            "Replaced {} footprints ({} pixels) with noise",
            state.originals.len(),
            npix
        );
        self.state = Some(state);
        Ok(())
    }

    /// Make source `index`'s real pixels visible.
    ///
    /// A source still inserted from an earlier call is hidden first.
    pub fn insert_source(&mut self, exposure: &mut Exposure, index: usize) -> Result<(), ReplaceError> {
        let state = self.state.as_mut().ok_or(ReplaceError::NotActive)?;
        state.check_index(index)?;

        if let Some(previous) = state.inserted.take() {
            if previous != index {
                log::warn!(
                    "Inserting source {} while source {} is still inserted; hiding it first",
                    state.ids[index],
                    state.ids[previous]
                );
            }
            state.renoise(exposure, previous);
        }

        match &state.plans[index] {
            InsertPlan::Own => state.originals[index].insert_into(&mut exposure.image),
            InsertPlan::Heavy(heavy) => heavy.insert_into(&mut exposure.image),
            InsertPlan::Parent(parent) => state.originals[*parent].insert_into(&mut exposure.image),
        }
        state.inserted = Some(index);
        Ok(())
    }

    /// Hide `source` again behind freshly drawn noise.
    pub fn remove_source(
        &mut self,
        exposure: &mut Exposure,
        sources: &SourceCatalog,
        source: &SourceRecord,
    ) -> Result<(), ReplaceError> {
        let state = self.state.as_ref().ok_or(ReplaceError::NotActive)?;
        if sources.len() != state.ids.len() {
            return Err(ReplaceError::CatalogMismatch {
                expected: state.ids.len(),
                actual: sources.len(),
            });
        }
        // Ids need not be unique; the inserted source wins over the first match.
        let index = match state.inserted {
            Some(inserted) if state.ids[inserted] == source.id => inserted,
            _ => state
                .ids
                .iter()
                .position(|&id| id == source.id)
                .ok_or(ReplaceError::UnknownSource { id: source.id })?,
        };
        self.remove_index(exposure, index)
    }

    /// Hide the source at catalog position `index`.
    pub fn remove_index(&mut self, exposure: &mut Exposure, index: usize) -> Result<(), ReplaceError> {
        let state = self.state.as_mut().ok_or(ReplaceError::NotActive)?;
        state.check_index(index)?;
        state.renoise(exposure, index);
        if state.inserted == Some(index) {
            state.inserted = None;
        }
        Ok(())
    }

    /// Restore every footprint's original pixels and drop the snapshots.
    pub fn end(&mut self, exposure: &mut Exposure, sources: &SourceCatalog) -> Result<(), ReplaceError> {
        let state = self.state.as_ref().ok_or(ReplaceError::NotActive)?;
        if sources.len() != state.ids.len() {
            return Err(ReplaceError::CatalogMismatch {
                expected: state.ids.len(),
                actual: sources.len(),
            });
        }
        self.restore(exposure);
        Ok(())
    }

    /// Restore without checking the catalog; used when unwinding a failed run.
    pub fn abort(&mut self, exposure: &mut Exposure) {
        if self.state.is_some() {
            log::warn!("Restoring exposure after an interrupted measurement run");
            self.restore(exposure);
        }
    }

    fn restore(&mut self, exposure: &mut Exposure) {
        if let Some(state) = self.state.take() {
            for original in state.heavy_originals.iter().chain(&state.originals) {
                original.insert_into(&mut exposure.image);
            }
            log::info!("Restored {} footprints", state.originals.len());
        }
    }
}

impl Drop for NoiseReplacer {
    fn drop(&mut self) {
        if self.state.is_some() {
            log::warn!("Noise replacer dropped while active; exposure was not restored");
        }
    }
}

fn insert_plan(record: &SourceRecord, sources: &SourceCatalog) -> InsertPlan {
    if record.parent == 0 {
        return InsertPlan::Own;
    }
    if let Some(heavy) = &record.heavy {
        return InsertPlan::Heavy(heavy.clone());
    }
    match sources.index_of(record.parent) {
        Some(parent) => InsertPlan::Parent(parent),
        None => {
            log::debug!(
                "Parent {} of source {} is not in the catalog; using its own footprint",
                record.parent,
                record.id
            );
            InsertPlan::Own
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SourceTable;
    use shared::image_proc::footprint::Footprint;

    fn ramp_exposure() -> Exposure {
        let image = Array2::from_shape_fn((20, 20), |(y, x)| (y * 20 + x) as f64);
        Exposure::from_image(image, 4.0)
    }

    fn catalog(footprints: Vec<Footprint>) -> SourceCatalog {
        let mut catalog = SourceCatalog::new(SourceTable::default());
        for (i, fp) in footprints.into_iter().enumerate() {
            catalog.push(SourceRecord::new(i as u64 + 1, fp));
        }
        catalog
    }

    #[test]
    fn test_protocol_errors() {
        let mut exposure = ramp_exposure();
        let sources = catalog(vec![Footprint::from_rect(2, 2, 3, 3)]);
        let mut replacer = NoiseReplacer::default();

        assert_eq!(replacer.insert_source(&mut exposure, 0), Err(ReplaceError::NotActive));
        assert_eq!(replacer.end(&mut exposure, &sources), Err(ReplaceError::NotActive));

        replacer.begin(&mut exposure, &sources, None, None).unwrap();
        assert_eq!(
            replacer.begin(&mut exposure, &sources, None, None),
            Err(ReplaceError::AlreadyActive)
        );
        assert_eq!(
            replacer.insert_source(&mut exposure, 1),
            Err(ReplaceError::IndexOutOfRange { index: 1, len: 1 })
        );
        let stranger = SourceRecord::new(99, Footprint::empty());
        assert_eq!(
            replacer.remove_source(&mut exposure, &sources, &stranger),
            Err(ReplaceError::UnknownSource { id: 99 })
        );
        replacer.end(&mut exposure, &sources).unwrap();
        assert!(!replacer.is_active());
        assert_eq!(exposure, ramp_exposure());
    }

    #[test]
    fn test_explicit_image_takes_precedence() {
        let mut exposure = ramp_exposure();
        let sources = catalog(vec![Footprint::from_rect(5, 5, 2, 2)]);
        let noise = Array2::from_elem((20, 20), -7.0);
        let mut replacer = NoiseReplacer::default();

        replacer
            .begin(&mut exposure, &sources, Some(&noise), Some((100.0, 1.0)))
            .unwrap();
        assert_eq!(exposure.image[[5, 5]], -7.0);
        assert_eq!(exposure.image[[6, 6]], -7.0);
        assert_eq!(exposure.image[[4, 4]], 84.0);
        replacer.end(&mut exposure, &sources).unwrap();
    }

    #[test]
    fn test_offset_shifts_noise() {
        let mut exposure = ramp_exposure();
        let sources = catalog(vec![Footprint::from_rect(5, 5, 2, 2)]);
        let config = NoiseReplacerConfig {
            noise_offset: 3.0,
            ..NoiseReplacerConfig::default()
        };
        let mut replacer = NoiseReplacer::new(config);
        replacer
            .begin(&mut exposure, &sources, None, Some((10.0, 0.0)))
            .unwrap();
        assert_eq!(exposure.image[[5, 6]], 13.0);
        replacer.end(&mut exposure, &sources).unwrap();
    }

    #[test]
    fn test_child_reinserts_parent_or_heavy_pixels() {
        let mut exposure = ramp_exposure();
        let original = exposure.clone();

        let parent_fp = Footprint::from_rect(2, 2, 6, 3);
        let child_fp = Footprint::from_rect(2, 2, 2, 2);
        let heavy_fp = Footprint::from_rect(6, 2, 2, 2);
        let heavy = HeavyFootprint::new(heavy_fp.clone(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();

        let mut sources = SourceCatalog::new(SourceTable::default());
        sources.push(SourceRecord::new(1, parent_fp));
        sources.push(SourceRecord::new(2, child_fp).with_parent(1));
        sources.push(SourceRecord::new(3, heavy_fp).with_parent(1).with_heavy(heavy));

        let mut replacer = NoiseReplacer::new(NoiseReplacerConfig::default());
        replacer
            .begin(&mut exposure, &sources, None, Some((0.0, 0.0)))
            .unwrap();

        replacer.insert_source(&mut exposure, 1).unwrap();
        // Child without heavy pixels shows the whole parent
        assert_eq!(exposure.image[[4, 7]], original.image[[4, 7]]);
        replacer.remove_index(&mut exposure, 1).unwrap();
        assert_eq!(exposure.image[[4, 7]], 0.0);

        replacer.insert_source(&mut exposure, 2).unwrap();
        assert_eq!(exposure.image[[2, 6]], 1.0);
        assert_eq!(exposure.image[[3, 7]], 4.0);
        assert_eq!(exposure.image[[2, 2]], 0.0);

        replacer.end(&mut exposure, &sources).unwrap();
        assert_eq!(exposure, original);
    }

    #[test]
    fn test_measured_noise_source() {
        let mut exposure = ramp_exposure();
        exposure.image.fill(50.0);
        let sources = catalog(vec![Footprint::from_rect(0, 0, 4, 4)]);
        let config = NoiseReplacerConfig {
            noise_source: NoiseSourceKind::Measure,
            ..NoiseReplacerConfig::default()
        };
        let mut replacer = NoiseReplacer::new(config);
        replacer.begin(&mut exposure, &sources, None, None).unwrap();
        // Flat background has zero measured variance
        assert_eq!(exposure.image[[1, 1]], 50.0);
        replacer.end(&mut exposure, &sources).unwrap();
    }
}
