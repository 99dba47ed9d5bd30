use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::identity::{PlantIdentity, WHOLE_PLANT_INVERTER};

/// Storage type of a column, rendered into backend-specific DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Int,
    Float,
    Bool,
    Text(usize),
    Time,
}

/// One typed cell, used for statement binding and CSV output alike.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Field {
    Int(Option<i64>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Text(Option<String>),
    Time(Option<DateTime<Utc>>),
}

impl Field {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Int(v) => v.map(|v| v as f64),
            Field::Float(v) => *v,
            Field::Bool(v) => v.map(|v| if v { 1.0 } else { 0.0 }),
            Field::Text(_) | Field::Time(_) => None,
        }
    }

    /// CSV rendering; nulls become empty cells.
    pub fn render(&self) -> String {
        match self {
            Field::Int(Some(v)) => v.to_string(),
            Field::Float(Some(v)) => v.to_string(),
            Field::Bool(Some(v)) => v.to_string(),
            Field::Text(Some(v)) => v.clone(),
            Field::Time(Some(v)) => v.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            _ => String::new(),
        }
    }
}

/// Typed column of a value struct.
pub trait Column: Copy + Eq + Send + Sync + fmt::Debug + 'static {
    const ALL: &'static [Self];

    fn name(self) -> &'static str;

    fn sql_type(self) -> SqlType;
}

/// Non-key part of a frame row.
pub trait Values: Clone + Send + Sync + fmt::Debug {
    type Column: Column;

    fn field(&self, column: Self::Column) -> Field;
}

/// Which key components a frame presents as index levels. `dt` is always one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexLevels {
    pub plant: bool,
    pub inverter: bool,
    pub age: bool,
}

impl IndexLevels {
    pub const TIME_ONLY: IndexLevels = IndexLevels {
        plant: false,
        inverter: false,
        age: false,
    };

    pub fn has_identity(&self) -> bool {
        self.plant && self.inverter
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(4);
        if self.plant {
            names.push("pp_id");
        }
        if self.inverter {
            names.push("inv_id");
        }
        names.push("dt");
        if self.age {
            names.push("age");
        }
        names
    }
}

/// Row key. Components are filled whenever they are known; `IndexLevels`
/// decides which of them are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RowKey {
    pub plant: Option<i64>,
    /// Storage inverter id, `-1` for the whole plant.
    pub inverter: Option<i64>,
    pub dt: DateTime<Utc>,
    pub age: Option<i64>,
}

impl RowKey {
    pub fn at(dt: DateTime<Utc>) -> Self {
        Self {
            plant: None,
            inverter: None,
            dt,
            age: None,
        }
    }

    pub fn for_identity(identity: PlantIdentity, dt: DateTime<Utc>) -> Self {
        Self {
            plant: Some(identity.plant_id),
            inverter: Some(identity.storage_inverter_id()),
            dt,
            age: None,
        }
    }

    pub fn identity(&self) -> Option<PlantIdentity> {
        self.plant.map(|pp| {
            PlantIdentity::from_storage(pp, self.inverter.unwrap_or(WHOLE_PLANT_INVERTER))
        })
    }

    fn level_fields(&self, levels: IndexLevels) -> Vec<Field> {
        let mut fields = Vec::with_capacity(4);
        if levels.plant {
            fields.push(Field::Int(self.plant));
        }
        if levels.inverter {
            fields.push(Field::Int(self.inverter));
        }
        fields.push(Field::Time(Some(self.dt)));
        if levels.age {
            fields.push(Field::Int(self.age));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row<V> {
    pub key: RowKey,
    pub values: V,
}

/// Indexed, ordered table of rows sharing one value type.
#[derive(Debug, Clone)]
pub struct Frame<V: Values> {
    pub levels: IndexLevels,
    pub columns: Vec<V::Column>,
    pub rows: Vec<Row<V>>,
}

impl<V: Values> Frame<V> {
    pub fn new(levels: IndexLevels, rows: Vec<Row<V>>) -> Self {
        Self {
            levels,
            columns: V::Column::ALL.to_vec(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.rows.iter().map(|row| row.key.dt).collect()
    }

    /// First and last timestamp in row order.
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => Some((first.key.dt, last.key.dt)),
            _ => None,
        }
    }

    /// Distinct identities named by the rows.
    pub fn identities(&self) -> BTreeSet<PlantIdentity> {
        self.rows.iter().filter_map(|row| row.key.identity()).collect()
    }

    /// Restrict the presented columns, keeping the canonical column order.
    pub fn project(mut self, columns: &[V::Column]) -> Self {
        self.columns = V::Column::ALL
            .iter()
            .copied()
            .filter(|column| columns.contains(column))
            .collect();
        self
    }

    /// Stamp every row with `identity` and present it as index levels.
    pub fn attach_identity(&mut self, identity: PlantIdentity) {
        for row in &mut self.rows {
            row.key.plant = Some(identity.plant_id);
            row.key.inverter = Some(identity.storage_inverter_id());
        }
        self.levels.plant = true;
        self.levels.inverter = true;
    }

    /// Numeric view of a column; non-numeric and null cells are `None`.
    pub fn column_f64(&self, column: V::Column) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|row| row.values.field(column).as_f64())
            .collect()
    }

    pub fn header(&self) -> Vec<&'static str> {
        let mut header = self.levels.names();
        header.extend(self.columns.iter().map(|column| column.name()));
        header
    }

    /// Presented index levels followed by the projected columns.
    pub fn record(&self, row: &Row<V>) -> Vec<Field> {
        let mut fields = row.key.level_fields(self.levels);
        fields.extend(self.columns.iter().map(|column| row.values.field(*column)));
        fields
    }

}
