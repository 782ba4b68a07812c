//! Observation points around the measurement loop.
//!
//! Hooks only ever see shared references, so they cannot change measured
//! values or the exposure. Every method defaults to doing nothing.

use shared::image_proc::exposure::Exposure;

use crate::table::SourceCatalog;

pub trait MeasurementHooks {
    /// Before noise replacement, at the start of a run.
    fn pre_measure(&self, _exposure: &Exposure, _sources: &SourceCatalog) {}

    /// Before measuring source `index`, after it has been inserted.
    ///
    /// Also called once with `None` after every footprint has been replaced
    /// by noise and before the first source is inserted.
    fn pre_single_measure(&self, _exposure: &Exposure, _sources: &SourceCatalog, _index: Option<usize>) {
    }

    /// After measuring source `index`, before it is hidden again.
    fn post_single_measure(&self, _exposure: &Exposure, _sources: &SourceCatalog, _index: usize) {}

    /// After the exposure has been restored.
    fn post_measure(&self, _exposure: &Exposure, _sources: &SourceCatalog) {}
}

/// Hooks that observe nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl MeasurementHooks for NoopHooks {}

/// Runs several hook sets in order.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn MeasurementHooks>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hooks: Box<dyn MeasurementHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }
}

impl MeasurementHooks for HookChain {
    fn pre_measure(&self, exposure: &Exposure, sources: &SourceCatalog) {
        for hooks in &self.hooks {
            hooks.pre_measure(exposure, sources);
        }
    }

    fn pre_single_measure(&self, exposure: &Exposure, sources: &SourceCatalog, index: Option<usize>) {
        for hooks in &self.hooks {
            hooks.pre_single_measure(exposure, sources, index);
        }
    }

    fn post_single_measure(&self, exposure: &Exposure, sources: &SourceCatalog, index: usize) {
        for hooks in &self.hooks {
            hooks.post_single_measure(exposure, sources, index);
        }
    }

    fn post_measure(&self, exposure: &Exposure, sources: &SourceCatalog) {
        for hooks in &self.hooks {
            hooks.post_measure(exposure, sources);
        }
    }
}
