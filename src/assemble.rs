use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::PRIMARY_FREQUENCY;
use crate::db::SolarDb;
use crate::error::{Result, SolarDbError};
use crate::frame::{Column, Field, Frame, IndexLevels, Row, RowKey, SqlType, Values};
use crate::identity::{IdentityFilter, PlantIdentity};
use crate::query::{AgeSelection, RangeQuery, WeatherQuery};
use crate::tables::{ExogenousColumn, ExogenousValues, PowerValues, WeatherColumn, WeatherValues};
use crate::time::TimeBound;

const IDENTITY_LEVELS: IndexLevels = IndexLevels {
    plant: true,
    inverter: true,
    age: false,
};

/// How weather features are sampled for a prediction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherScheme {
    /// Measured weather (age 0).
    Measured,
    /// Forecasts of a fixed lead time.
    Forecast,
    /// The freshest forecast available at the start of the window.
    Realistic,
}

impl FromStr for WeatherScheme {
    type Err = SolarDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "measured" => Ok(WeatherScheme::Measured),
            "forecast" => Ok(WeatherScheme::Forecast),
            "realistic" => Ok(WeatherScheme::Realistic),
            other => Err(SolarDbError::Config(format!(
                "unknown weather sampling scheme '{other}'"
            ))),
        }
    }
}

impl fmt::Display for WeatherScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeatherScheme::Measured => "measured",
            WeatherScheme::Forecast => "forecast",
            WeatherScheme::Realistic => "realistic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureColumn {
    Weather(WeatherColumn),
    Exogenous(ExogenousColumn),
}

impl Column for FeatureColumn {
    const ALL: &'static [Self] = &[
        FeatureColumn::Weather(WeatherColumn::SrcDt),
        FeatureColumn::Weather(WeatherColumn::Summary),
        FeatureColumn::Weather(WeatherColumn::PrecipInt),
        FeatureColumn::Weather(WeatherColumn::PrecipProb),
        FeatureColumn::Weather(WeatherColumn::Temp),
        FeatureColumn::Weather(WeatherColumn::ApparentTemp),
        FeatureColumn::Weather(WeatherColumn::DewPoint),
        FeatureColumn::Weather(WeatherColumn::Humidity),
        FeatureColumn::Weather(WeatherColumn::Pressure),
        FeatureColumn::Weather(WeatherColumn::WindSpeed),
        FeatureColumn::Weather(WeatherColumn::WindBearing),
        FeatureColumn::Weather(WeatherColumn::CloudCover),
        FeatureColumn::Weather(WeatherColumn::Visibility),
        FeatureColumn::Weather(WeatherColumn::Interpolated),
        FeatureColumn::Weather(WeatherColumn::Extrapolated),
        FeatureColumn::Exogenous(ExogenousColumn::SunAltitude),
        FeatureColumn::Exogenous(ExogenousColumn::SunAzimuth),
        FeatureColumn::Exogenous(ExogenousColumn::SunIrradiance),
        FeatureColumn::Exogenous(ExogenousColumn::Status),
        FeatureColumn::Exogenous(ExogenousColumn::Error),
        FeatureColumn::Exogenous(ExogenousColumn::Clear),
    ];

    fn name(self) -> &'static str {
        match self {
            FeatureColumn::Weather(column) => column.name(),
            FeatureColumn::Exogenous(column) => column.name(),
        }
    }

    fn sql_type(self) -> SqlType {
        match self {
            FeatureColumn::Weather(column) => column.sql_type(),
            FeatureColumn::Exogenous(column) => column.sql_type(),
        }
    }
}

/// Weather with the exogenous signals of the same slot merged in.
/// Slots without exogenous data keep all-`None` exogenous values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureValues {
    pub weather: WeatherValues,
    pub exogenous: ExogenousValues,
}

impl Values for FeatureValues {
    type Column = FeatureColumn;

    fn field(&self, column: FeatureColumn) -> Field {
        match column {
            FeatureColumn::Weather(column) => self.weather.field(column),
            FeatureColumn::Exogenous(column) => self.exogenous.field(column),
        }
    }
}

impl AsRef<WeatherValues> for FeatureValues {
    fn as_ref(&self) -> &WeatherValues {
        &self.weather
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictionColumn {
    Power,
}

impl Column for PredictionColumn {
    const ALL: &'static [Self] = &[PredictionColumn::Power];

    fn name(self) -> &'static str {
        "power"
    }

    fn sql_type(self) -> SqlType {
        SqlType::Float
    }
}

/// Predicted power of one slot; `None` until a model fills it in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PredictionValues {
    pub power: Option<f64>,
}

impl Values for PredictionValues {
    type Column = PredictionColumn;

    fn field(&self, _column: PredictionColumn) -> Field {
        Field::Float(self.power)
    }
}

#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub identity: PlantIdentity,
    pub start: TimeBound,
    pub end: TimeBound,
    pub scheme: WeatherScheme,
    /// Lead time in hours, required by `WeatherScheme::Forecast`.
    pub forecast_delta: Option<i64>,
    pub history_count: usize,
    pub history_fallback: bool,
}

/// Inputs of one prediction round.
#[derive(Debug, Clone)]
pub struct PredictionFrames {
    /// Power history preceding the window; empty when no history was requested.
    pub history: Frame<PowerValues>,
    pub features: Frame<FeatureValues>,
    /// Same index as `features`, with an unset `power` column.
    pub target: Frame<PredictionValues>,
}

pub struct SolarDbAssembler {
    db: SolarDb,
}

impl SolarDbAssembler {
    pub fn new(db: SolarDb) -> Self {
        Self { db }
    }

    /// `count` power rows on the primary grid ending just before `start`.
    ///
    /// With `fallback` the stored rows from `start - count` onward are
    /// relabelled onto the grid as they are, so fewer than `count` rows may
    /// come back. Otherwise every grid slot is present and gaps are zero
    /// filled and flagged as extrapolated.
    pub async fn prepare_history(
        &self,
        identity: PlantIdentity,
        start: impl Into<TimeBound>,
        count: usize,
        fallback: bool,
    ) -> Result<Frame<PowerValues>> {
        let start = start.into().start_instant();
        let step = PRIMARY_FREQUENCY.delta();
        let out_of_range = || SolarDbError::InvalidTime {
            input: format!("{} minus {count} slots", start.to_rfc3339()),
            reason: "history window leaves the supported time range".to_string(),
        };
        let slots = i32::try_from(count).map_err(|_| {
            SolarDbError::Config(format!("history count {count} is too large"))
        })?;
        let span = step.checked_mul(slots).ok_or_else(out_of_range)?;
        let alt_start = start.checked_sub_signed(span).ok_or_else(out_of_range)?;
        let grid: Vec<DateTime<Utc>> = (0..slots).map(|i| alt_start + step * i).collect();

        let fetch_end = if fallback {
            start.checked_add_signed(span).ok_or_else(out_of_range)?
        } else {
            start
        };
        let query = RangeQuery::new(identity)
            .between(alt_start, fetch_end)
            .all_indices(true);
        let mut stored = self.db.get_pp_power(&query).await?.rows;
        stored.truncate(count);
        debug!(
            "History for {}: {} stored rows for {} slots",
            identity,
            stored.len(),
            count
        );

        let rows: Vec<Row<PowerValues>> = if fallback {
            stored
                .into_iter()
                .zip(&grid)
                .map(|(row, dt)| Row {
                    key: RowKey::for_identity(identity, *dt),
                    values: row.values,
                })
                .collect()
        } else {
            let by_dt: HashMap<DateTime<Utc>, PowerValues> = stored
                .into_iter()
                .map(|row| (row.key.dt, row.values))
                .collect();
            grid.iter()
                .map(|dt| Row {
                    key: RowKey::for_identity(identity, *dt),
                    values: by_dt
                        .get(dt)
                        .map(fill_missing_power)
                        .unwrap_or_else(PowerValues::zero_filled),
                })
                .collect()
        };

        Ok(Frame::new(IDENTITY_LEVELS, rows))
    }

    /// Smoothed weather for `[start, end)` merged with the exogenous data of
    /// the same slots. Date bounds are taken at midnight.
    pub async fn prepare_weather(
        &self,
        identity: PlantIdentity,
        start: impl Into<TimeBound>,
        end: impl Into<TimeBound>,
        scheme: WeatherScheme,
        forecast_delta: Option<i64>,
    ) -> Result<Frame<FeatureValues>> {
        let start = start.into().start_instant();
        let end = end.into().start_instant();

        let selection = match scheme {
            WeatherScheme::Measured => AgeSelection::FixedAge(0),
            WeatherScheme::Forecast => {
                let delta = forecast_delta.ok_or_else(|| {
                    SolarDbError::Config(
                        "weather scheme 'forecast' requires a forecast delta".to_string(),
                    )
                })?;
                AgeSelection::FixedAge(delta)
            }
            WeatherScheme::Realistic => AgeSelection::LatestBefore(start),
        };

        let weather_query = WeatherQuery::new(
            RangeQuery::new(identity)
                .between(start, end)
                .all_indices(true),
        )
        .select(selection)
        .smooth(true);
        let weather = self.db.get_pp_weather(&weather_query).await?;

        let exogenous_query = RangeQuery::<ExogenousColumn>::new(IdentityFilter::Exact(identity))
            .between(start, end)
            .all_indices(true);
        let exogenous: HashMap<(Option<i64>, DateTime<Utc>), ExogenousValues> = self
            .db
            .get_pp_exogenous(&exogenous_query)
            .await?
            .rows
            .into_iter()
            .map(|row| ((row.key.plant, row.key.dt), row.values))
            .collect();

        let rows: Vec<Row<FeatureValues>> = weather
            .rows
            .into_iter()
            .map(|row| {
                let exogenous = exogenous
                    .get(&(row.key.plant, row.key.dt))
                    .cloned()
                    .unwrap_or_default();
                Row {
                    key: RowKey {
                        age: row.key.age,
                        ..RowKey::for_identity(identity, row.key.dt)
                    },
                    values: FeatureValues {
                        weather: row.values,
                        exogenous,
                    },
                }
            })
            .collect();
        info!(
            "Prepared {} feature rows for {} using the {} scheme",
            rows.len(),
            identity,
            scheme
        );

        Ok(Frame::new(IDENTITY_LEVELS, rows))
    }

    pub async fn prepare_prediction(&self, request: &PredictionRequest) -> Result<PredictionFrames> {
        let history = self
            .prepare_history(
                request.identity,
                request.start,
                request.history_count,
                request.history_fallback,
            )
            .await?;
        let features = self
            .prepare_weather(
                request.identity,
                request.start,
                request.end,
                request.scheme,
                request.forecast_delta,
            )
            .await?;
        let target = Frame::new(
            features.levels,
            features
                .rows
                .iter()
                .map(|row| Row {
                    key: row.key,
                    values: PredictionValues::default(),
                })
                .collect(),
        );

        Ok(PredictionFrames {
            history,
            features,
            target,
        })
    }
}

fn fill_missing_power(values: &PowerValues) -> PowerValues {
    PowerValues {
        power_ac: values.power_ac.or(Some(0)),
        power_dc: values.power_dc.or(Some(0)),
        energy_hour: values.energy_hour.or(Some(0)),
        energy_day: values.energy_day.or(Some(0)),
        energy_week: values.energy_week.or(Some(0)),
        energy_month: values.energy_month.or(Some(0)),
        ipolated: values.ipolated.or(Some(false)),
        epolated: values.epolated.or(Some(true)),
    }
}
