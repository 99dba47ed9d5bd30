use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{info, warn};

use crate::assemble::PredictionValues;
use crate::config::PRIMARY_FREQUENCY;
use crate::db::SolarDb;
use crate::error::{Result, SolarDbError};
use crate::frame::{Column, Frame, Values};
use crate::identity::PlantIdentity;
use crate::query::{AgeSelection, RangeQuery, WeatherQuery};
use crate::tables::{PowerColumn, PowerValues, WeatherColumn, WeatherValues};

/// Power column a prediction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionTarget {
    #[default]
    PowerAc,
    PowerDc,
}

impl PredictionTarget {
    pub fn column(self) -> PowerColumn {
        match self {
            PredictionTarget::PowerAc => PowerColumn::PowerAc,
            PredictionTarget::PowerDc => PowerColumn::PowerDc,
        }
    }
}

impl FromStr for PredictionTarget {
    type Err = SolarDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "power_ac" => Ok(PredictionTarget::PowerAc),
            "power_dc" => Ok(PredictionTarget::PowerDc),
            other => Err(SolarDbError::Config(format!(
                "unknown prediction target '{other}', expected power_ac or power_dc"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorStats {
    /// Relative error of the time-integrated totals.
    pub error: f64,
    pub mse: f64,
    pub rmse: f64,
    /// RMSE normalised by the ground-truth sum of squares.
    pub rrmse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerStats {
    #[serde(flatten)]
    pub errors: ErrorStats,
    pub r2: f64,
    /// `None` when undefined (fewer than two samples or a constant series).
    pub pearson: Option<f64>,
    pub spearman: Option<f64>,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub power: PowerStats,
    /// Per weather feature, when a weather frame was supplied.
    pub weather: Option<BTreeMap<String, ErrorStats>>,
    pub history: Option<PowerStats>,
}

pub struct SolarDbEvaluator {
    db: SolarDb,
}

impl SolarDbEvaluator {
    pub fn new(db: SolarDb) -> Self {
        Self { db }
    }

    /// Score `prediction` against stored ground truth.
    ///
    /// The prediction must name exactly one identity, either through its
    /// index levels or through `identity`, and every `power` value must be
    /// set. A weather frame must match the prediction in length and span.
    pub async fn evaluate_prediction<W>(
        &self,
        prediction: &Frame<PredictionValues>,
        target: PredictionTarget,
        history: Option<&Frame<PowerValues>>,
        weather: Option<&Frame<W>>,
        identity: Option<PlantIdentity>,
    ) -> Result<EvaluationReport>
    where
        W: Values + AsRef<WeatherValues>,
    {
        let prediction = with_identity(prediction, identity, "prediction")?;

        if let Some(row) = prediction
            .rows
            .iter()
            .find(|row| !row.values.power.is_some_and(f64::is_finite))
        {
            return Err(SolarDbError::contract(format!(
                "prediction frame has no valid power value at {}",
                row.key.dt
            )));
        }

        let identities = prediction.identities();
        let plant = match (identities.len(), identities.iter().next()) {
            (1, Some(identity)) => *identity,
            (count, _) => {
                return Err(SolarDbError::contract(format!(
                    "prediction frame must name exactly one plant or inverter, found {count}"
                )))
            }
        };
        let (start, end) = prediction
            .time_span()
            .ok_or_else(|| SolarDbError::contract("prediction frame is empty"))?;

        let weather = weather.filter(|frame| !frame.is_empty());
        if let Some(weather) = weather {
            if weather.len() != prediction.len() {
                return Err(SolarDbError::contract(format!(
                    "prediction and weather frames differ in length ({} vs {})",
                    prediction.len(),
                    weather.len()
                )));
            }
            if weather.time_span() != Some((start, end)) {
                return Err(SolarDbError::contract(format!(
                    "weather frame does not cover the prediction range <{start}, {end}>"
                )));
            }
        }

        let history = match history.filter(|frame| !frame.is_empty()) {
            Some(frame) => {
                let frame = with_identity(frame, identity, "history")?;
                if frame.identities().iter().any(|id| *id != plant) {
                    return Err(SolarDbError::contract(format!(
                        "history frame does not belong to {plant}"
                    )));
                }
                Some(frame)
            }
            None => None,
        };

        let predicted: Vec<(DateTime<Utc>, Option<f64>)> = prediction
            .rows
            .iter()
            .map(|row| (row.key.dt, row.values.power))
            .collect();
        let power = self
            .evaluate_power(plant, &predicted, start, end, target, false)
            .await?;

        let weather = match weather {
            Some(frame) => Some(self.evaluate_weather(plant, frame, start, end).await?),
            None => None,
        };

        let history = match history {
            Some(frame) => {
                let values: Vec<(DateTime<Utc>, Option<f64>)> = frame
                    .rows
                    .iter()
                    .map(|row| (row.key.dt, row.values.power(target.column())))
                    .collect();
                let (h_start, h_end) = frame
                    .time_span()
                    .ok_or_else(|| SolarDbError::contract("history frame is empty"))?;
                Some(
                    self.evaluate_power(plant, &values, h_start, h_end, target, true)
                        .await?,
                )
            }
            None => None,
        };

        info!(
            "Evaluated {} predictions for {}: rmse {:.3}",
            power.samples, plant, power.errors.rmse
        );
        Ok(EvaluationReport {
            power,
            weather,
            history,
        })
    }

    /// Pairs candidate values with stored power at the same timestamps. With
    /// `fallback`, missing ground truth is replaced by the candidate itself.
    async fn evaluate_power(
        &self,
        plant: PlantIdentity,
        candidate: &[(DateTime<Utc>, Option<f64>)],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        target: PredictionTarget,
        fallback: bool,
    ) -> Result<PowerStats> {
        let query = RangeQuery::new(plant)
            .between(start, end)
            .columns(vec![target.column()]);
        let ground = self.db.get_pp_power(&query).await?;
        let truth: HashMap<DateTime<Utc>, f64> = ground
            .rows
            .iter()
            .filter_map(|row| row.values.power(target.column()).map(|v| (row.key.dt, v)))
            .collect();

        let pairs: Vec<(f64, f64)> = if truth.is_empty() && fallback {
            candidate
                .iter()
                .filter_map(|(_, value)| value.map(|v| (v, v)))
                .collect()
        } else {
            candidate
                .iter()
                .filter_map(|(dt, value)| Some((((*value)?), *truth.get(dt)?)))
                .collect()
        };
        if pairs.is_empty() {
            return Err(SolarDbError::contract(format!(
                "no stored power for {plant} in <{start}, {end}>"
            )));
        }
        Ok(power_stats(&pairs))
    }

    async fn evaluate_weather<W>(
        &self,
        plant: PlantIdentity,
        frame: &Frame<W>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<String, ErrorStats>>
    where
        W: Values + AsRef<WeatherValues>,
    {
        // The smoothed grid is half-open, so extend it to include `end`.
        let query = WeatherQuery::new(
            RangeQuery::new(plant)
                .between(start, end + PRIMARY_FREQUENCY.delta())
                .columns(WeatherColumn::FEATURES.to_vec()),
        )
        .select(AgeSelection::FixedAge(0))
        .smooth(true);
        let ground = self.db.get_pp_weather(&query).await?;
        let truth: HashMap<DateTime<Utc>, &WeatherValues> = ground
            .rows
            .iter()
            .map(|row| (row.key.dt, &row.values))
            .collect();

        let mut stats = BTreeMap::new();
        for column in WeatherColumn::FEATURES {
            let pairs: Vec<(f64, f64)> = frame
                .rows
                .iter()
                .filter_map(|row| {
                    let predicted = row.values.as_ref().feature(*column)?;
                    let measured = truth.get(&row.key.dt)?.feature(*column)?;
                    Some((predicted, measured))
                })
                .collect();
            if pairs.is_empty() {
                warn!("No measured {} to compare against for {}", column.name(), plant);
                continue;
            }
            stats.insert(column.name().to_string(), error_stats(&pairs));
        }
        Ok(stats)
    }
}

/// Present `identity` as index levels when the frame does not carry them.
fn with_identity<V: Values>(
    frame: &Frame<V>,
    identity: Option<PlantIdentity>,
    what: &str,
) -> Result<Frame<V>> {
    let mut frame = frame.clone();
    if !frame.levels.has_identity() {
        match identity {
            Some(identity) => frame.attach_identity(identity),
            None if !frame.is_empty() => {
                return Err(SolarDbError::contract(format!(
                    "{what} frame has no pp_id/inv_id levels and no identity was given"
                )))
            }
            None => {}
        }
    }
    Ok(frame)
}

/// Statistics over `(predicted, ground)` pairs.
pub fn error_stats(pairs: &[(f64, f64)]) -> ErrorStats {
    let n = pairs.len() as f64;
    let hours = PRIMARY_FREQUENCY.hours();
    let pred_int: f64 = pairs.iter().map(|(p, _)| p).sum::<f64>() * hours;
    let ground_int: f64 = pairs.iter().map(|(_, g)| g).sum::<f64>() * hours;
    let error = 1.0 - pred_int / (ground_int + f64::EPSILON);

    let mse = pairs.iter().map(|(p, g)| (p - g).powi(2)).sum::<f64>() / n;
    let sq_sum: f64 = pairs.iter().map(|(_, g)| g.powi(2)).sum();
    ErrorStats {
        error,
        mse,
        rmse: mse.sqrt(),
        rrmse: (mse / (sq_sum + f64::EPSILON)).sqrt(),
    }
}

pub fn power_stats(pairs: &[(f64, f64)]) -> PowerStats {
    let predicted: Vec<f64> = pairs.iter().map(|(p, _)| *p).collect();
    let ground: Vec<f64> = pairs.iter().map(|(_, g)| *g).collect();
    PowerStats {
        errors: error_stats(pairs),
        r2: r2_score(&ground, &predicted),
        pearson: pearson(&predicted, &ground),
        spearman: spearman(&predicted, &ground),
        samples: pairs.len(),
    }
}

/// Coefficient of determination, as `sklearn.metrics.r2_score`. A constant
/// ground truth scores 1 when matched exactly and 0 otherwise.
pub fn r2_score(ground: &[f64], predicted: &[f64]) -> f64 {
    let n = ground.len() as f64;
    let mean = ground.iter().sum::<f64>() / n;
    let ss_res: f64 = ground
        .iter()
        .zip(predicted)
        .map(|(g, p)| (g - p).powi(2))
        .sum();
    let ss_tot: f64 = ground.iter().map(|g| (g - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Pearson correlation as `scipy.stats.pearsonr`, but `None` instead of NaN
/// for fewer than two samples or a zero-variance series.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        cov += (a - mean_x) * (b - mean_y);
        var_x += (a - mean_x).powi(2);
        var_y += (b - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Spearman correlation as `scipy.stats.spearmanr`: Pearson over average ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    pearson(&ranks(x), &ranks(y))
}

/// 1-based ranks, ties sharing their average rank (`rankdata(method="average")`).
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| values[*a].total_cmp(&values[*b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }
    ranks
}
