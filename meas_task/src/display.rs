//! Diagnostic display of a measurement run.
//!
//! A [`DisplaySink`] receives images and markers. One sink can be installed
//! process-wide with [`install_display`]; [`DisplayHooks`] draws through an
//! explicit sink or, failing that, the installed one. Sink failures are
//! logged and never reach the measurement loop.

use std::io::Write;
use std::sync::{Arc, Mutex, RwLock};

use once_cell::sync::Lazy;
use shared::image_proc::exposure::Exposure;
use thiserror::Error;

use crate::hooks::MeasurementHooks;
use crate::table::SourceCatalog;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("display I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("display unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayColor {
    Red,
    Green,
    Blue,
    Cyan,
    Magenta,
    Yellow,
    White,
}

impl DisplayColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayColor::Red => "red",
            DisplayColor::Green => "green",
            DisplayColor::Blue => "blue",
            DisplayColor::Cyan => "cyan",
            DisplayColor::Magenta => "magenta",
            DisplayColor::Yellow => "yellow",
            DisplayColor::White => "white",
        }
    }
}

/// Somewhere to draw diagnostics.
pub trait DisplaySink: Send + Sync {
    /// Show an image.
    fn mtv(&self, exposure: &Exposure, title: &str) -> Result<(), DisplayError>;

    /// Draw `symbol` (`+`, `*`, `o`, `x`, or any text label) at `(x, y)`.
    fn dot(&self, symbol: &str, x: f64, y: f64, size: f64, color: DisplayColor) -> Result<(), DisplayError>;

    /// Draw the ellipse of a covariance `(xx, yy, xy)` centered on `(x, y)`.
    fn ellipse(
        &self,
        x: f64,
        y: f64,
        moments: (f64, f64, f64),
        color: DisplayColor,
    ) -> Result<(), DisplayError>;
}

static DISPLAY: Lazy<RwLock<Option<Arc<dyn DisplaySink>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide display sink, returning the previous one.
pub fn install_display(sink: Arc<dyn DisplaySink>) -> Option<Arc<dyn DisplaySink>> {
    let mut slot = DISPLAY.write().unwrap_or_else(|e| e.into_inner());
    slot.replace(sink)
}

/// Remove the process-wide display sink.
pub fn uninstall_display() -> Option<Arc<dyn DisplaySink>> {
    let mut slot = DISPLAY.write().unwrap_or_else(|e| e.into_inner());
    slot.take()
}

pub fn installed_display() -> Option<Arc<dyn DisplaySink>> {
    DISPLAY.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Flag marking sources deblended as point sources; drawn as `*`.
pub const DEBLENDED_AS_PSF: &str = "deblend.deblended-as-psf";

/// Debug display of a measurement run.
///
/// - level 1: show the input exposure, mark every measured source with
///   `*` (deblended as PSF) or `+`, red for parents and magenta for
///   children, and its peaks in yellow
/// - level 2: label each source by id and draw its centroid error ellipse
///   instead
/// - level 3: also log `id ix iy` for each source as it is measured
pub struct DisplayHooks {
    level: u8,
    sink: Option<Arc<dyn DisplaySink>>,
}

impl DisplayHooks {
    /// Draw through whatever sink is installed when each hook fires.
    pub fn new(level: u8) -> Self {
        Self { level, sink: None }
    }

    pub fn with_sink(level: u8, sink: Arc<dyn DisplaySink>) -> Self {
        Self {
            level,
            sink: Some(sink),
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    fn sink(&self) -> Option<Arc<dyn DisplaySink>> {
        if self.level == 0 {
            return None;
        }
        self.sink.clone().or_else(installed_display)
    }

    fn draw_source(
        &self,
        sink: &dyn DisplaySink,
        sources: &SourceCatalog,
        index: usize,
    ) -> Result<(), DisplayError> {
        let Some(record) = sources.get(index) else {
            return Ok(());
        };
        let table = sources.table();
        let Ok((x, y)) = table.centroid(record) else {
            return Ok(());
        };
        if !(x.is_finite() && y.is_finite()) {
            return Ok(());
        }

        if self.level > 1 {
            sink.dot(&record.id.to_string(), x + 2.0, y, 3.0, DisplayColor::Red)?;
            if let Ok(cov) = table.centroid_err(record) {
                if cov.0.is_finite() && cov.1.is_finite() && cov.2.is_finite() {
                    sink.ellipse(x, y, cov, DisplayColor::Red)?;
                }
            }
        } else {
            let symbol = if record.flag(DEBLENDED_AS_PSF) { "*" } else { "+" };
            let color = if record.parent == 0 {
                DisplayColor::Red
            } else {
                DisplayColor::Magenta
            };
            sink.dot(symbol, x, y, 3.0, color)?;
            for peak in record.footprint.peaks() {
                sink.dot("+", peak.x, peak.y, 0.5, DisplayColor::Yellow)?;
            }
        }
        Ok(())
    }
}

fn report(result: Result<(), DisplayError>) {
    if let Err(e) = result {
        log::warn!("Display failed, continuing without it: {e}");
    }
}

impl MeasurementHooks for DisplayHooks {
    fn pre_measure(&self, exposure: &Exposure, _sources: &SourceCatalog) {
        if let Some(sink) = self.sink() {
            report(sink.mtv(exposure, "input"));
        }
    }

    fn pre_single_measure(&self, _exposure: &Exposure, sources: &SourceCatalog, index: Option<usize>) {
        if self.level <= 2 {
            return;
        }
        let Some(record) = index.and_then(|i| sources.get(i)) else {
            return;
        };
        if let Some(peak) = record.footprint.peaks().first() {
            log::info!("{:<9} {:4} {:4}", record.id, peak.ix(), peak.iy());
        }
    }

    fn post_single_measure(&self, _exposure: &Exposure, sources: &SourceCatalog, index: usize) {
        if let Some(sink) = self.sink() {
            report(self.draw_source(sink.as_ref(), sources, index));
        }
    }
}

/// Writes markers as ds9 region lines.
///
/// Images are not written; `mtv` emits a comment naming the frame.
pub struct Ds9RegionSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> Ds9RegionSink<W> {
    pub fn new(mut out: W) -> Result<Self, DisplayError> {
        writeln!(out, "# Region file format: DS9 version 4.1")?;
        writeln!(out, "image")?;
        Ok(Self {
            out: Mutex::new(out),
        })
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_line(&self, line: &str) -> Result<(), DisplayError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| DisplayError::Unavailable("region writer lock poisoned".to_string()))?;
        writeln!(out, "{line}")?;
        Ok(())
    }
}

impl<W: Write + Send> DisplaySink for Ds9RegionSink<W> {
    fn mtv(&self, exposure: &Exposure, title: &str) -> Result<(), DisplayError> {
        self.write_line(&format!(
            "# {title}: {}x{}",
            exposure.width(),
            exposure.height()
        ))
    }

    // ds9 pixel coordinates are 1-based
    fn dot(&self, symbol: &str, x: f64, y: f64, size: f64, color: DisplayColor) -> Result<(), DisplayError> {
        let (x, y) = (x + 1.0, y + 1.0);
        let color = color.as_str();
        let line = match symbol {
            "+" => format!("point({x:.3},{y:.3}) # point=cross color={color}"),
            "x" => format!("point({x:.3},{y:.3}) # point=x color={color}"),
            "*" => format!("point({x:.3},{y:.3}) # point=diamond color={color}"),
            "o" => format!("circle({x:.3},{y:.3},{size:.3}) # color={color}"),
            text => format!("# text({x:.3},{y:.3}) text={{{text}}} color={color}"),
        };
        self.write_line(&line)
    }

    fn ellipse(
        &self,
        x: f64,
        y: f64,
        (xx, yy, xy): (f64, f64, f64),
        color: DisplayColor,
    ) -> Result<(), DisplayError> {
        let sum = xx + yy;
        let diff = xx - yy;
        let root = (diff * diff + 4.0 * xy * xy).sqrt();
        let a = ((sum + root) / 2.0).max(0.0).sqrt();
        let b = ((sum - root) / 2.0).max(0.0).sqrt();
        let theta = 0.5 * (2.0 * xy).atan2(diff);
        self.write_line(&format!(
            "ellipse({:.3},{:.3},{a:.3},{b:.3},{:.2}) # color={}",
            x + 1.0,
            y + 1.0,
            theta.to_degrees(),
            color.as_str()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FieldKind, Schema, SlotRole, SourceRecord, SourceTable};
    use shared::image_proc::footprint::{Footprint, Peak};

    fn catalog() -> SourceCatalog {
        let mut schema = Schema::minimal();
        for field in ["c.x", "c.y", "c.x_err", "c.y_err", "c.xy_cov"] {
            schema.add_field(field, FieldKind::Float, "").unwrap();
        }
        schema.add_field(DEBLENDED_AS_PSF, FieldKind::Flag, "").unwrap();
        let mut table = SourceTable::new(schema);
        table.define_slot(SlotRole::Centroid, "c").unwrap();

        let mut catalog = SourceCatalog::new(table);
        let mut parent = SourceRecord::new(
            11,
            Footprint::from_rect(0, 0, 5, 5).with_peak(Peak::new(2.0, 2.0, 9.0)),
        );
        parent.set_float("c.x", 2.0);
        parent.set_float("c.y", 2.0);
        parent.set_float("c.x_err", 2.0);
        parent.set_float("c.y_err", 1.0);
        parent.set_float("c.xy_cov", 0.0);
        let mut child = SourceRecord::new(12, Footprint::from_rect(0, 0, 2, 2)).with_parent(11);
        child.set_float("c.x", 1.0);
        child.set_float("c.y", 1.0);
        child.set_flag(DEBLENDED_AS_PSF, true);
        catalog.push(parent);
        catalog.push(child);
        catalog
    }

    fn render(level: u8) -> String {
        let sink = Arc::new(Ds9RegionSink::new(Vec::new()).unwrap());
        let hooks = DisplayHooks::with_sink(level, sink.clone());
        let exposure = Exposure::new(5, 5);
        let sources = catalog();
        hooks.pre_measure(&exposure, &sources);
        hooks.post_single_measure(&exposure, &sources, 0);
        hooks.post_single_measure(&exposure, &sources, 1);
        drop(hooks);
        let sink = Arc::try_unwrap(sink).ok().unwrap();
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_level_one_marks_sources_and_peaks() {
        let text = render(1);
        assert!(text.contains("# input: 5x5"));
        assert!(text.contains("point(3.000,3.000) # point=cross color=red"));
        assert!(text.contains("point(2.000,2.000) # point=diamond color=magenta"));
        assert!(text.contains("color=yellow"));
        assert!(!text.contains("ellipse"));
    }

    #[test]
    fn test_level_two_labels_and_ellipses() {
        let text = render(2);
        assert!(text.contains("text={11}"));
        assert!(text.contains("ellipse(3.000,3.000,2.000,1.000,0.00) # color=red"));
        assert!(!text.contains("color=yellow"));
    }

    #[test]
    fn test_level_zero_draws_nothing() {
        let text = render(0);
        assert_eq!(text.lines().count(), 2);
    }

    struct Broken;

    impl DisplaySink for Broken {
        fn mtv(&self, _: &Exposure, _: &str) -> Result<(), DisplayError> {
            Err(DisplayError::Unavailable("no display".into()))
        }

        fn dot(&self, _: &str, _: f64, _: f64, _: f64, _: DisplayColor) -> Result<(), DisplayError> {
            Err(DisplayError::Unavailable("no display".into()))
        }

        fn ellipse(&self, _: f64, _: f64, _: (f64, f64, f64), _: DisplayColor) -> Result<(), DisplayError> {
            Err(DisplayError::Unavailable("no display".into()))
        }
    }

    #[test]
    fn test_sink_errors_are_swallowed() {
        let hooks = DisplayHooks::with_sink(3, Arc::new(Broken));
        let exposure = Exposure::new(5, 5);
        let sources = catalog();
        hooks.pre_measure(&exposure, &sources);
        hooks.pre_single_measure(&exposure, &sources, Some(0));
        hooks.post_single_measure(&exposure, &sources, 0);
    }

    #[test]
    fn test_install_and_uninstall() {
        let sink: Arc<dyn DisplaySink> = Arc::new(Broken);
        let previous = install_display(sink);
        assert!(installed_display().is_some());
        let removed = uninstall_display();
        assert!(removed.is_some());
        if let Some(previous) = previous {
            install_display(previous);
        }
    }
}
