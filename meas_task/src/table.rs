//! Source tables: schema, records, catalogs and slot aliases.
//!
//! A [`Schema`] is fixed before measurement starts; every algorithm declares
//! the fields it writes when the measurer is built. Slots alias a role such
//! as "the centroid" to one algorithm's output and are resolved whenever a
//! record is read through the [`SourceTable`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use shared::image_proc::footprint::{Footprint, HeavyFootprint};
use thiserror::Error;

/// Errors from schema declaration and slot resolution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// A field with this name was already declared.
    #[error("field '{name}' is already declared")]
    DuplicateField { name: String },

    /// Slot target field is not in the schema.
    #[error("slot {slot} refers to undeclared field '{field}'")]
    SlotTargetMissing { slot: SlotRole, field: String },

    /// Field exists with a different kind.
    #[error("field '{name}' is not a {expected:?} field")]
    KindMismatch { name: String, expected: FieldKind },

    /// The slot has no binding.
    #[error("slot {slot} is not defined")]
    SlotUndefined { slot: SlotRole },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Float,
    Flag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub doc: String,
}

/// Ordered set of named output fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Empty schema ready for algorithm registration.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, name: &str, kind: FieldKind, doc: &str) -> Result<(), SchemaError> {
        if self.index.contains_key(name) {
            return Err(SchemaError::DuplicateField {
                name: name.to_string(),
            });
        }
        self.index.insert(name.to_string(), self.fields.len());
        self.fields.push(FieldDef {
            name: name.to_string(),
            kind,
            doc: doc.to_string(),
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<FieldKind> {
        self.index.get(name).map(|&i| self.fields[i].kind)
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn require(&self, slot: SlotRole, field: String, kind: FieldKind) -> Result<(), SchemaError> {
        match self.kind(&field) {
            None => Err(SchemaError::SlotTargetMissing { slot, field }),
            Some(k) if k != kind => Err(SchemaError::KindMismatch {
                name: field,
                expected: kind,
            }),
            Some(_) => Ok(()),
        }
    }
}

/// Named roles that can alias an algorithm's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlotRole {
    Centroid,
    Shape,
    ApFlux,
    ModelFlux,
    PsfFlux,
    InstFlux,
}

impl SlotRole {
    pub const ALL: [SlotRole; 6] = [
        SlotRole::Centroid,
        SlotRole::Shape,
        SlotRole::ApFlux,
        SlotRole::ModelFlux,
        SlotRole::PsfFlux,
        SlotRole::InstFlux,
    ];

    pub const FLUXES: [SlotRole; 4] = [
        SlotRole::ApFlux,
        SlotRole::ModelFlux,
        SlotRole::PsfFlux,
        SlotRole::InstFlux,
    ];

    /// Configuration name of the slot.
    pub fn name(&self) -> &'static str {
        match self {
            SlotRole::Centroid => "centroid",
            SlotRole::Shape => "shape",
            SlotRole::ApFlux => "apFlux",
            SlotRole::ModelFlux => "modelFlux",
            SlotRole::PsfFlux => "psfFlux",
            SlotRole::InstFlux => "instFlux",
        }
    }

    pub fn is_flux(&self) -> bool {
        !matches!(self, SlotRole::Centroid | SlotRole::Shape)
    }
}

impl std::fmt::Display for SlotRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Float(f64),
    Flag(bool),
}

/// One detected source and its measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: u64,
    /// Id of the deblend parent, 0 for top-level sources.
    pub parent: u64,
    pub footprint: Footprint,
    /// Deblended pixel values for children.
    pub heavy: Option<HeavyFootprint>,
    values: BTreeMap<String, FieldValue>,
}

impl SourceRecord {
    pub fn new(id: u64, footprint: Footprint) -> Self {
        Self {
            id,
            parent: 0,
            footprint,
            heavy: None,
            values: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: u64) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_heavy(mut self, heavy: HeavyFootprint) -> Self {
        self.heavy = Some(heavy);
        self
    }

    pub fn set_float(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), FieldValue::Float(value));
    }

    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.values.insert(name.to_string(), FieldValue::Flag(value));
    }

    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.values.get(name).copied()
    }

    /// Float value of `name`, NaN if never written.
    pub fn float(&self, name: &str) -> f64 {
        match self.values.get(name) {
            Some(FieldValue::Float(v)) => *v,
            _ => f64::NAN,
        }
    }

    /// Flag value of `name`, false if never written.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(FieldValue::Flag(true)))
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn clear_values(&mut self) {
        self.values.clear();
    }
}

/// Schema plus slot aliases shared by every record of a catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTable {
    schema: Schema,
    slots: BTreeMap<SlotRole, String>,
}

impl SourceTable {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            slots: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Alias `role` to the output named `name`.
    ///
    /// Centroid slots need `name.x` and `name.y`, shape slots `name.xx`,
    /// `name.yy` and `name.xy`, flux slots the float field `name` itself.
    pub fn define_slot(&mut self, role: SlotRole, name: &str) -> Result<(), SchemaError> {
        match role {
            SlotRole::Centroid => {
                for suffix in ["x", "y"] {
                    self.schema
                        .require(role, format!("{name}.{suffix}"), FieldKind::Float)?;
                }
            }
            SlotRole::Shape => {
                for suffix in ["xx", "yy", "xy"] {
                    self.schema
                        .require(role, format!("{name}.{suffix}"), FieldKind::Float)?;
                }
            }
            _ => self.schema.require(role, name.to_string(), FieldKind::Float)?,
        }
        self.slots.insert(role, name.to_string());
        Ok(())
    }

    pub fn clear_slot(&mut self, role: SlotRole) {
        self.slots.remove(&role);
    }

    pub fn slot(&self, role: SlotRole) -> Option<&str> {
        self.slots.get(&role).map(String::as_str)
    }

    fn slot_name(&self, role: SlotRole) -> Result<&str, SchemaError> {
        self.slot(role).ok_or(SchemaError::SlotUndefined { slot: role })
    }

    /// Centroid `(x, y)` through the centroid slot.
    pub fn centroid(&self, record: &SourceRecord) -> Result<(f64, f64), SchemaError> {
        let name = self.slot_name(SlotRole::Centroid)?;
        Ok((
            record.float(&format!("{name}.x")),
            record.float(&format!("{name}.y")),
        ))
    }

    /// Centroid covariance `(xx, yy, xy)` through the centroid slot.
    pub fn centroid_err(&self, record: &SourceRecord) -> Result<(f64, f64, f64), SchemaError> {
        let name = self.slot_name(SlotRole::Centroid)?;
        let x_err = record.float(&format!("{name}.x_err"));
        let y_err = record.float(&format!("{name}.y_err"));
        Ok((x_err * x_err, y_err * y_err, record.float(&format!("{name}.xy_cov"))))
    }

    /// Second moments `(xx, yy, xy)` through the shape slot.
    pub fn shape(&self, record: &SourceRecord) -> Result<(f64, f64, f64), SchemaError> {
        let name = self.slot_name(SlotRole::Shape)?;
        Ok((
            record.float(&format!("{name}.xx")),
            record.float(&format!("{name}.yy")),
            record.float(&format!("{name}.xy")),
        ))
    }

    /// Flux and its error through a flux slot.
    pub fn flux(&self, role: SlotRole, record: &SourceRecord) -> Result<(f64, f64), SchemaError> {
        let name = self.slot_name(role)?;
        Ok((record.float(name), record.float(&format!("{name}.err"))))
    }

    /// Failure flag of the algorithm behind a slot.
    ///
    /// Flux slots may point at a sub-field (`flux.aperture.0`); the flag of
    /// the longest declared `*.flags` prefix is used.
    pub fn slot_flag(&self, role: SlotRole, record: &SourceRecord) -> Result<bool, SchemaError> {
        let name = self.slot_name(role)?;
        let mut candidate = name;
        loop {
            let flag = format!("{candidate}.flags");
            if self.schema.kind(&flag) == Some(FieldKind::Flag) {
                return Ok(record.flag(&flag));
            }
            match candidate.rfind('.') {
                Some(pos) => candidate = &candidate[..pos],
                None => return Ok(false),
            }
        }
    }
}

/// Ordered sequence of records; insertion order is processing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCatalog {
    table: SourceTable,
    records: Vec<SourceRecord>,
}

impl SourceCatalog {
    pub fn new(table: SourceTable) -> Self {
        Self {
            table,
            records: Vec::new(),
        }
    }

    pub fn table(&self) -> &SourceTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut SourceTable {
        &mut self.table
    }

    pub fn push(&mut self, record: SourceRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SourceRecord> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SourceRecord> {
        self.records.get_mut(index)
    }

    pub fn index_of(&self, id: u64) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    pub fn find(&self, id: u64) -> Option<&SourceRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceRecord> {
        self.records.iter()
    }

    /// Table and mutable records at once.
    pub fn split_mut(&mut self) -> (&SourceTable, &mut [SourceRecord]) {
        (&self.table, &mut self.records)
    }
}

impl<'a> IntoIterator for &'a SourceCatalog {
    type Item = &'a SourceRecord;
    type IntoIter = std::slice::Iter<'a, SourceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
