//! Slot binding validation and table aliasing

mod common;

use common::{catalog, init_logging, square_footprint, synthetic_exposure, Star};
use meas_task::{
    ConfigError, MeasureInputs, MeasurementConfig, Schema, SlotRole, SourceMeasurementTask,
    SourceSlotConfig,
};

fn config_with(edit: impl FnOnce(&mut MeasurementConfig)) -> MeasurementConfig {
    let mut config = MeasurementConfig::default();
    edit(&mut config);
    config
}

#[test]
fn test_flux_slot_accepts_sub_field_of_scheduled_algorithm() {
    let config = config_with(|c| c.slots.psf_flux = Some("flux.aperture.0".to_string()));
    config.validate().unwrap();

    let config = config_with(|c| c.slots.model_flux = Some("flux.naive".to_string()));
    config.validate().unwrap();
}

#[test]
fn test_flux_slot_naming_unscheduled_algorithm_fails() {
    let config = config_with(|c| c.slots.psf_flux = Some("flux.psf".to_string()));
    let err = config.validate().unwrap_err();
    assert!(matches!(
        &err,
        ConfigError::SlotNotScheduled { slot: "psfFlux", name } if name == "flux.psf"
    ));
    assert_eq!(
        err.to_string(),
        "psfFlux slot 'flux.psf' does not match any scheduled algorithm"
    );

    // A scheduled name that merely extends the slot name does not count.
    let config = config_with(|c| c.slots.inst_flux = Some("flux".to_string()));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::SlotNotScheduled { slot: "instFlux", .. })
    ));
}

#[test]
fn test_centroid_and_shape_slots_need_exact_names() {
    let config = config_with(|c| c.slots.centroid = Some("centroid.naive".to_string()));
    config.validate().unwrap();

    let config = config_with(|c| c.slots.centroid = Some("centroid.sdss".to_string()));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::SlotNotScheduled { slot: "centroid", .. })
    ));

    let config = config_with(|c| c.slots.shape = Some("shape".to_string()));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::SlotNotScheduled { slot: "shape", .. })
    ));
}

#[test]
fn test_duplicate_names_fail() {
    let config = config_with(|c| c.algorithms.push("centroid.moments".to_string()));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::CentroiderInAlgorithms { name }) if name == "centroid.moments"
    ));

    let config = config_with(|c| c.algorithms.push("flux.naive".to_string()));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::DuplicateAlgorithm { name }) if name == "flux.naive"
    ));
}

#[test]
fn test_unbound_slots_always_validate() {
    let config = config_with(|c| {
        c.slots = SourceSlotConfig::unbound();
        c.centroider = None;
        c.algorithms.clear();
    });
    config.validate().unwrap();
}

#[test]
fn test_invalid_slots_stop_task_construction() {
    let config = config_with(|c| c.slots.ap_flux = Some("flux.gaussian".to_string()));
    let mut schema = Schema::minimal();
    let err = SourceMeasurementTask::new(config, &mut schema).err().unwrap();
    assert!(matches!(err, ConfigError::SlotNotScheduled { slot: "apFlux", .. }));
    assert!(schema.is_empty());
}

#[test]
fn test_measure_resolves_slots_through_prefix() {
    init_logging();
    let config = config_with(|c| {
        c.prefix = Some("base.".to_string());
        c.slots.psf_flux = Some("flux.aperture.1".to_string());
        c.slots.inst_flux = None;
    });
    let mut schema = Schema::minimal();
    let mut task = SourceMeasurementTask::new(config, &mut schema).unwrap();
    let mut sources = catalog(schema, vec![square_footprint(20, 20, 9)]);
    let mut exposure = synthetic_exposure(40, 40, 1.0, &[Star::new(20.0, 20.0, 8000.0)], 3);

    task.measure(&mut exposure, &mut sources, MeasureInputs::default())
        .unwrap();

    let table = sources.table();
    let record = &sources.records()[0];
    assert_eq!(table.slot(SlotRole::Centroid), Some("base.centroid.moments"));
    assert_eq!(table.slot(SlotRole::PsfFlux), Some("base.flux.aperture.1"));
    assert_eq!(table.slot(SlotRole::InstFlux), None);
    assert!(table.flux(SlotRole::InstFlux, record).is_err());

    let (psf_flux, _) = table.flux(SlotRole::PsfFlux, record).unwrap();
    assert_eq!(psf_flux, record.float("base.flux.aperture.1"));
    assert!(psf_flux > 7000.0, "psf flux {psf_flux}");
    assert!(!table.slot_flag(SlotRole::PsfFlux, record).unwrap());
}
