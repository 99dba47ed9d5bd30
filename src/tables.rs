//! Persisted record kinds and their canonical column lists.
//!
//! Every table is described once here: key columns, value columns with their
//! storage types, and the ordering used by range scans. DDL, select lists,
//! insert statements and CSV headers are all generated from these lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, sqlite::SqliteRow, FromRow};

use crate::db::BackendKind;
use crate::error::SolarDbError;
use crate::frame::{Column, Field, SqlType, Values};
use crate::identity::PlantIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Table {
    Power,
    Weather,
    Exogenous,
    Meta,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Power, Table::Weather, Table::Exogenous, Table::Meta];

    pub fn name(self) -> &'static str {
        match self {
            Table::Power => "power",
            Table::Weather => "weather",
            Table::Exogenous => "exogenous",
            Table::Meta => "meta",
        }
    }

    pub fn key_columns(self) -> &'static [(&'static str, SqlType)] {
        match self {
            Table::Power => &[("pp_id", SqlType::Int), ("inv_id", SqlType::Int), ("dt", SqlType::Time)],
            Table::Weather => &[("pp_id", SqlType::Int), ("dt", SqlType::Time), ("age", SqlType::Int)],
            Table::Exogenous => &[("pp_id", SqlType::Int), ("dt", SqlType::Time)],
            Table::Meta => &[("pp_id", SqlType::Int), ("inv_id", SqlType::Int)],
        }
    }

    pub fn value_columns(self) -> Vec<(&'static str, SqlType)> {
        fn describe<C: Column>() -> Vec<(&'static str, SqlType)> {
            C::ALL.iter().map(|c| (c.name(), c.sql_type())).collect()
        }
        match self {
            Table::Power => describe::<PowerColumn>(),
            Table::Weather => describe::<WeatherColumn>(),
            Table::Exogenous => describe::<ExogenousColumn>(),
            Table::Meta => describe::<MetaColumn>(),
        }
    }

    /// Key columns followed by value columns.
    pub fn columns(self) -> Vec<(&'static str, SqlType)> {
        let mut columns = self.key_columns().to_vec();
        columns.extend(self.value_columns());
        columns
    }

    pub fn has_inverter(self) -> bool {
        matches!(self, Table::Power | Table::Meta)
    }

    pub fn has_time(self) -> bool {
        !matches!(self, Table::Meta)
    }

    /// Scan order: time first, then age, then identity.
    pub fn order_by(self) -> &'static str {
        match self {
            Table::Power => "dt ASC, pp_id ASC, inv_id ASC",
            Table::Weather => "dt ASC, age ASC, pp_id ASC",
            Table::Exogenous => "dt ASC, pp_id ASC",
            Table::Meta => "pp_id ASC, inv_id ASC",
        }
    }

    pub fn select_list(self) -> String {
        self.columns()
            .iter()
            .map(|(name, _)| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_sql(self, backend: BackendKind) -> String {
        let mut definitions: Vec<String> = self
            .key_columns()
            .iter()
            .map(|(name, ty)| format!("\"{name}\" {} NOT NULL", backend.type_name(*ty)))
            .collect();
        definitions.extend(
            self.value_columns()
                .iter()
                .map(|(name, ty)| format!("\"{name}\" {}", backend.type_name(*ty))),
        );
        let keys = self
            .key_columns()
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            self.name(),
            definitions.join(", "),
            keys
        )
    }

    pub fn insert_sql(self) -> String {
        let columns = self.columns();
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.name(),
            self.select_list(),
            placeholders
        )
    }

    pub fn csv_header(self) -> Vec<&'static str> {
        self.columns().into_iter().map(|(name, _)| name).collect()
    }
}

/// A persisted row: key fields plus a value struct.
pub trait Record:
    for<'r> FromRow<'r, SqliteRow> + for<'r> FromRow<'r, PgRow> + Clone + Send + Unpin + 'static
{
    type Values: Values;

    const TABLE: Table;

    fn key_fields(&self) -> Vec<Field>;

    fn values(&self) -> &Self::Values;

    /// All fields in `Table::columns` order.
    fn fields(&self) -> Vec<Field> {
        let mut fields = self.key_fields();
        let values = self.values();
        fields.extend(
            <Self::Values as Values>::Column::ALL
                .iter()
                .map(|column| values.field(*column)),
        );
        fields
    }
}

macro_rules! columns {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => ($column:literal, $ty:expr)),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl Column for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $column),+
                }
            }

            fn sql_type(self) -> SqlType {
                match self {
                    $($name::$variant => $ty),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = SolarDbError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($column => Ok($name::$variant),)+
                    other => Err(SolarDbError::Config(format!(
                        "unknown {} column '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

columns!(
    /// Value columns of the `power` table.
    PowerColumn {
        PowerAc => ("power_ac", SqlType::Int),
        PowerDc => ("power_dc", SqlType::Int),
        EnergyHour => ("energy_hour", SqlType::Int),
        EnergyDay => ("energy_day", SqlType::Int),
        EnergyWeek => ("energy_week", SqlType::Int),
        EnergyMonth => ("energy_month", SqlType::Int),
        Interpolated => ("ipolated", SqlType::Bool),
        Extrapolated => ("epolated", SqlType::Bool),
    }
);

columns!(
    /// Value columns of the `weather` table.
    WeatherColumn {
        SrcDt => ("src_dt", SqlType::Time),
        Summary => ("summary", SqlType::Text(50)),
        PrecipInt => ("precip_int", SqlType::Float),
        PrecipProb => ("precip_prob", SqlType::Float),
        Temp => ("temp", SqlType::Float),
        ApparentTemp => ("apparent_temp", SqlType::Float),
        DewPoint => ("dew_point", SqlType::Float),
        Humidity => ("humidity", SqlType::Float),
        Pressure => ("pressure", SqlType::Float),
        WindSpeed => ("wind_speed", SqlType::Float),
        WindBearing => ("wind_bearing", SqlType::Float),
        CloudCover => ("cloud_cover", SqlType::Float),
        Visibility => ("visibility", SqlType::Float),
        Interpolated => ("ipolated", SqlType::Bool),
        Extrapolated => ("epolated", SqlType::Bool),
    }
);

columns!(
    /// Value columns of the `exogenous` table.
    ExogenousColumn {
        SunAltitude => ("sun_altitude", SqlType::Float),
        SunAzimuth => ("sun_azimuth", SqlType::Float),
        SunIrradiance => ("sun_irradiance", SqlType::Float),
        Status => ("status", SqlType::Int),
        Error => ("error", SqlType::Int),
        Clear => ("clear", SqlType::Float),
    }
);

columns!(
    /// Value columns of the `meta` table.
    MetaColumn {
        Freq => ("freq", SqlType::Int),
        Capacity => ("capacity", SqlType::Float),
        Inverters => ("inverters", SqlType::Float),
        Interval => ("interval", SqlType::Time),
        Location => ("location", SqlType::Text(16)),
        PosLat => ("pos_lat", SqlType::Float),
        PosLong => ("pos_long", SqlType::Float),
    }
);

impl WeatherColumn {
    /// Physical quantities, interpolated when smoothing.
    pub const FEATURES: &'static [WeatherColumn] = &[
        WeatherColumn::PrecipInt,
        WeatherColumn::PrecipProb,
        WeatherColumn::Temp,
        WeatherColumn::ApparentTemp,
        WeatherColumn::DewPoint,
        WeatherColumn::Humidity,
        WeatherColumn::Pressure,
        WeatherColumn::WindSpeed,
        WeatherColumn::WindBearing,
        WeatherColumn::CloudCover,
        WeatherColumn::Visibility,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PowerValues {
    pub power_ac: Option<i64>,
    pub power_dc: Option<i64>,
    pub energy_hour: Option<i64>,
    pub energy_day: Option<i64>,
    pub energy_week: Option<i64>,
    pub energy_month: Option<i64>,
    pub ipolated: Option<bool>,
    pub epolated: Option<bool>,
}

impl PowerValues {
    /// Placeholder for a missing sample: zero power, flagged as extrapolated.
    pub fn zero_filled() -> Self {
        Self {
            power_ac: Some(0),
            power_dc: Some(0),
            energy_hour: Some(0),
            energy_day: Some(0),
            energy_week: Some(0),
            energy_month: Some(0),
            ipolated: Some(false),
            epolated: Some(true),
        }
    }

    pub fn power(&self, column: PowerColumn) -> Option<f64> {
        self.field(column).as_f64()
    }
}

impl Values for PowerValues {
    type Column = PowerColumn;

    fn field(&self, column: PowerColumn) -> Field {
        match column {
            PowerColumn::PowerAc => Field::Int(self.power_ac),
            PowerColumn::PowerDc => Field::Int(self.power_dc),
            PowerColumn::EnergyHour => Field::Int(self.energy_hour),
            PowerColumn::EnergyDay => Field::Int(self.energy_day),
            PowerColumn::EnergyWeek => Field::Int(self.energy_week),
            PowerColumn::EnergyMonth => Field::Int(self.energy_month),
            PowerColumn::Interpolated => Field::Bool(self.ipolated),
            PowerColumn::Extrapolated => Field::Bool(self.epolated),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WeatherValues {
    pub src_dt: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub precip_int: Option<f64>,
    pub precip_prob: Option<f64>,
    pub temp: Option<f64>,
    pub apparent_temp: Option<f64>,
    pub dew_point: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_bearing: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub visibility: Option<f64>,
    pub ipolated: Option<bool>,
    pub epolated: Option<bool>,
}

impl WeatherValues {
    /// Value of a physical column; `None` for the ancillary ones.
    pub fn feature(&self, column: WeatherColumn) -> Option<f64> {
        match column {
            WeatherColumn::PrecipInt => self.precip_int,
            WeatherColumn::PrecipProb => self.precip_prob,
            WeatherColumn::Temp => self.temp,
            WeatherColumn::ApparentTemp => self.apparent_temp,
            WeatherColumn::DewPoint => self.dew_point,
            WeatherColumn::Humidity => self.humidity,
            WeatherColumn::Pressure => self.pressure,
            WeatherColumn::WindSpeed => self.wind_speed,
            WeatherColumn::WindBearing => self.wind_bearing,
            WeatherColumn::CloudCover => self.cloud_cover,
            WeatherColumn::Visibility => self.visibility,
            WeatherColumn::SrcDt
            | WeatherColumn::Summary
            | WeatherColumn::Interpolated
            | WeatherColumn::Extrapolated => None,
        }
    }

    pub fn feature_mut(&mut self, column: WeatherColumn) -> Option<&mut Option<f64>> {
        match column {
            WeatherColumn::PrecipInt => Some(&mut self.precip_int),
            WeatherColumn::PrecipProb => Some(&mut self.precip_prob),
            WeatherColumn::Temp => Some(&mut self.temp),
            WeatherColumn::ApparentTemp => Some(&mut self.apparent_temp),
            WeatherColumn::DewPoint => Some(&mut self.dew_point),
            WeatherColumn::Humidity => Some(&mut self.humidity),
            WeatherColumn::Pressure => Some(&mut self.pressure),
            WeatherColumn::WindSpeed => Some(&mut self.wind_speed),
            WeatherColumn::WindBearing => Some(&mut self.wind_bearing),
            WeatherColumn::CloudCover => Some(&mut self.cloud_cover),
            WeatherColumn::Visibility => Some(&mut self.visibility),
            WeatherColumn::SrcDt
            | WeatherColumn::Summary
            | WeatherColumn::Interpolated
            | WeatherColumn::Extrapolated => None,
        }
    }
}

impl Values for WeatherValues {
    type Column = WeatherColumn;

    fn field(&self, column: WeatherColumn) -> Field {
        match column {
            WeatherColumn::SrcDt => Field::Time(self.src_dt),
            WeatherColumn::Summary => Field::Text(self.summary.clone()),
            WeatherColumn::Interpolated => Field::Bool(self.ipolated),
            WeatherColumn::Extrapolated => Field::Bool(self.epolated),
            feature => Field::Float(self.feature(feature)),
        }
    }
}

impl AsRef<WeatherValues> for WeatherValues {
    fn as_ref(&self) -> &WeatherValues {
        self
    }
}

/// Status and error codes shared by the exogenous `status` and `error` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    None = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Wait = 4,
    Under = 5,
    Over = 6,
    ExtError = 7,
    IntError = 8,
    Unknown = 9,
}

impl StatusCode {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        let status = match code {
            0 => StatusCode::None,
            1 => StatusCode::Info,
            2 => StatusCode::Warning,
            3 => StatusCode::Error,
            4 => StatusCode::Wait,
            5 => StatusCode::Under,
            6 => StatusCode::Over,
            7 => StatusCode::ExtError,
            8 => StatusCode::IntError,
            9 => StatusCode::Unknown,
            _ => return None,
        };
        Some(status)
    }
}

impl TryFrom<i64> for StatusCode {
    type Error = SolarDbError;

    fn try_from(code: i64) -> Result<Self, SolarDbError> {
        StatusCode::from_code(code)
            .ok_or_else(|| SolarDbError::contract(format!("unknown status code {code}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExogenousValues {
    pub sun_altitude: Option<f64>,
    pub sun_azimuth: Option<f64>,
    pub sun_irradiance: Option<f64>,
    pub status: Option<i64>,
    pub error: Option<i64>,
    pub clear: Option<f64>,
}

impl ExogenousValues {
    /// Unknown `status` or `error` codes are a data-contract error.
    pub fn check_codes(&self) -> Result<(), SolarDbError> {
        for code in [self.status, self.error].into_iter().flatten() {
            StatusCode::try_from(code)?;
        }
        Ok(())
    }
}

impl Values for ExogenousValues {
    type Column = ExogenousColumn;

    fn field(&self, column: ExogenousColumn) -> Field {
        match column {
            ExogenousColumn::SunAltitude => Field::Float(self.sun_altitude),
            ExogenousColumn::SunAzimuth => Field::Float(self.sun_azimuth),
            ExogenousColumn::SunIrradiance => Field::Float(self.sun_irradiance),
            ExogenousColumn::Status => Field::Int(self.status),
            ExogenousColumn::Error => Field::Int(self.error),
            ExogenousColumn::Clear => Field::Float(self.clear),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MetaValues {
    /// Reporting frequency in minutes.
    pub freq: Option<i64>,
    /// Capacity in kWp.
    pub capacity: Option<f64>,
    pub inverters: Option<f64>,
    /// Start of the covered data interval.
    pub interval: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub pos_lat: Option<f64>,
    pub pos_long: Option<f64>,
}

impl Values for MetaValues {
    type Column = MetaColumn;

    fn field(&self, column: MetaColumn) -> Field {
        match column {
            MetaColumn::Freq => Field::Int(self.freq),
            MetaColumn::Capacity => Field::Float(self.capacity),
            MetaColumn::Inverters => Field::Float(self.inverters),
            MetaColumn::Interval => Field::Time(self.interval),
            MetaColumn::Location => Field::Text(self.location.clone()),
            MetaColumn::PosLat => Field::Float(self.pos_lat),
            MetaColumn::PosLong => Field::Float(self.pos_long),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PowerRecord {
    pub pp_id: i64,
    pub inv_id: i64,
    pub dt: DateTime<Utc>,
    #[sqlx(flatten)]
    pub values: PowerValues,
}

impl PowerRecord {
    pub fn identity(&self) -> PlantIdentity {
        PlantIdentity::from_storage(self.pp_id, self.inv_id)
    }
}

impl Record for PowerRecord {
    type Values = PowerValues;
    const TABLE: Table = Table::Power;

    fn key_fields(&self) -> Vec<Field> {
        vec![
            Field::Int(Some(self.pp_id)),
            Field::Int(Some(self.inv_id)),
            Field::Time(Some(self.dt)),
        ]
    }

    fn values(&self) -> &PowerValues {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WeatherRecord {
    pub pp_id: i64,
    pub dt: DateTime<Utc>,
    /// Forecast lead time in hours, 0 for measured weather.
    pub age: i64,
    #[sqlx(flatten)]
    pub values: WeatherValues,
}

impl Record for WeatherRecord {
    type Values = WeatherValues;
    const TABLE: Table = Table::Weather;

    fn key_fields(&self) -> Vec<Field> {
        vec![
            Field::Int(Some(self.pp_id)),
            Field::Time(Some(self.dt)),
            Field::Int(Some(self.age)),
        ]
    }

    fn values(&self) -> &WeatherValues {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExogenousRecord {
    pub pp_id: i64,
    pub dt: DateTime<Utc>,
    #[sqlx(flatten)]
    pub values: ExogenousValues,
}

impl Record for ExogenousRecord {
    type Values = ExogenousValues;
    const TABLE: Table = Table::Exogenous;

    fn key_fields(&self) -> Vec<Field> {
        vec![Field::Int(Some(self.pp_id)), Field::Time(Some(self.dt))]
    }

    fn values(&self) -> &ExogenousValues {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MetaRecord {
    pub pp_id: i64,
    pub inv_id: i64,
    #[sqlx(flatten)]
    pub values: MetaValues,
}

impl MetaRecord {
    pub fn identity(&self) -> PlantIdentity {
        PlantIdentity::from_storage(self.pp_id, self.inv_id)
    }
}

impl Record for MetaRecord {
    type Values = MetaValues;
    const TABLE: Table = Table::Meta;

    fn key_fields(&self) -> Vec<Field> {
        vec![Field::Int(Some(self.pp_id)), Field::Int(Some(self.inv_id))]
    }

    fn values(&self) -> &MetaValues {
        &self.values
    }
}
