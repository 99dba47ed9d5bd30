//! Smoothing of hourly weather onto the five-minute grid.
//!
//! Plants are resampled independently (in parallel) and concatenated. Physical
//! columns are interpolated linearly in elapsed time between the known
//! samples of each column; `src_dt` is interpolated as an instant; `summary`,
//! the provenance flags and `age` are carried forward.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::{PRIMARY_FREQUENCY, SECONDARY_FREQUENCY};
use crate::frame::{Row, RowKey};
use crate::tables::{WeatherColumn, WeatherValues};
use crate::time::date_latest;

/// Requested bounds of a smoothing query, before any hour rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmoothWindow {
    pub start: Option<DateTime<Utc>>,
    /// Exclusive end of the output grid. `None` extends each plant to the
    /// end of its last day.
    pub end: Option<DateTime<Utc>>,
}

/// Resample rows reduced to one per `(plant, dt)` onto the primary grid.
///
/// Output is ordered by time, then plant.
pub fn smooth_weather(
    rows: Vec<Row<WeatherValues>>,
    window: SmoothWindow,
) -> Vec<Row<WeatherValues>> {
    if rows.is_empty() {
        warn!("No weather rows to smooth");
        return Vec::new();
    }

    let mut groups: BTreeMap<Option<i64>, Vec<Row<WeatherValues>>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.key.plant).or_default().push(row);
    }
    debug!("Smoothing weather of {} plant group(s)", groups.len());

    let mut smoothed: Vec<Row<WeatherValues>> = groups
        .into_par_iter()
        .map(|(plant, rows)| resample_group(plant, rows, window))
        .flatten()
        .collect();

    smoothed.sort_by(|a, b| (a.key.dt, a.key.plant).cmp(&(b.key.dt, b.key.plant)));
    smoothed
}

fn resample_group(
    plant: Option<i64>,
    mut rows: Vec<Row<WeatherValues>>,
    window: SmoothWindow,
) -> Vec<Row<WeatherValues>> {
    rows.sort_by_key(|row| row.key.dt);

    if window.end.is_none() {
        if let Some(extension) = rows.last().and_then(extend_right_edge) {
            rows.push(extension);
        }
    }

    let (first_dt, last_dt) = match (rows.first(), rows.last()) {
        (Some(first), Some(last)) => (first.key.dt, last.key.dt),
        _ => {
            warn!("Plant {:?} has no weather rows to smooth", plant);
            return Vec::new();
        }
    };

    let grid_start = window.start.unwrap_or(first_dt);
    let grid_end = window
        .end
        .unwrap_or_else(|| last_dt + PRIMARY_FREQUENCY.delta());
    let grid = PRIMARY_FREQUENCY.grid(grid_start, grid_end);
    if grid.is_empty() {
        return Vec::new();
    }
    if rows.len() < 2 {
        debug!(
            "Plant {:?} has a single weather anchor, holding it constant forward",
            plant
        );
    }

    let grid_us: Vec<i64> = grid.iter().map(|dt| dt.timestamp_micros()).collect();
    let row_us: Vec<i64> = rows.iter().map(|row| row.key.dt.timestamp_micros()).collect();

    let mut output: Vec<Row<WeatherValues>> = grid
        .iter()
        .map(|dt| Row {
            key: RowKey {
                plant,
                inverter: None,
                dt: *dt,
                age: None,
            },
            values: WeatherValues::default(),
        })
        .collect();

    for column in WeatherColumn::FEATURES {
        let anchors: Vec<(i64, f64)> = rows
            .iter()
            .zip(&row_us)
            .filter_map(|(row, t)| {
                row.values
                    .feature(*column)
                    .filter(|v| v.is_finite())
                    .map(|v| (*t, v))
            })
            .collect();
        for (out, value) in output.iter_mut().zip(interpolate(&anchors, &grid_us)) {
            if let Some(slot) = out.values.feature_mut(*column) {
                *slot = value;
            }
        }
    }

    let src_anchors: Vec<(i64, f64)> = rows
        .iter()
        .zip(&row_us)
        .filter_map(|(row, t)| {
            row.values
                .src_dt
                .map(|src| src.timestamp_micros())
                .filter(|us| *us >= 0)
                .map(|us| (*t, us as f64))
        })
        .collect();
    for (out, value) in output.iter_mut().zip(interpolate(&src_anchors, &grid_us)) {
        out.values.src_dt = value.and_then(|us| DateTime::from_timestamp_micros(us.round() as i64));
    }

    let summaries = carried(&rows, &row_us, &grid_us, |row| row.values.summary.clone());
    let ipolated = carried(&rows, &row_us, &grid_us, |row| row.values.ipolated);
    let epolated = carried(&rows, &row_us, &grid_us, |row| row.values.epolated);
    let ages = carried(&rows, &row_us, &grid_us, |row| row.key.age);

    for (i, out) in output.iter_mut().enumerate() {
        out.values.summary = summaries[i].clone();
        out.values.ipolated = ipolated[i];
        out.values.epolated = epolated[i];
        out.key.age = ages[i];
    }

    output
}

/// Synthetic trailing row at the last five-minute slot of the final data day.
fn extend_right_edge(last: &Row<WeatherValues>) -> Option<Row<WeatherValues>> {
    let dt = PRIMARY_FREQUENCY.floor(date_latest(last.key.dt.date_naive()));
    if dt <= last.key.dt {
        return None;
    }
    let mut values = last.values.clone();
    values.ipolated = Some(false);
    values.epolated = Some(true);
    values.src_dt = last
        .values
        .src_dt
        .map(|src| dt - (last.key.dt - src));
    Some(Row {
        key: RowKey { dt, ..last.key },
        values,
    })
}

/// Forward-filled view of one ancillary column.
fn carried<T: Clone>(
    rows: &[Row<WeatherValues>],
    row_us: &[i64],
    grid_us: &[i64],
    select: impl Fn(&Row<WeatherValues>) -> Option<T>,
) -> Vec<Option<T>> {
    let anchors: Vec<(i64, T)> = rows
        .iter()
        .zip(row_us)
        .filter_map(|(row, t)| select(row).map(|v| (*t, v)))
        .collect();
    forward_fill(&anchors, grid_us)
}

/// Time-weighted linear interpolation of sorted anchors onto a sorted grid.
///
/// Points before the first anchor stay unknown; points after the last one
/// hold its value.
pub(crate) fn interpolate(anchors: &[(i64, f64)], grid: &[i64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(grid.len());
    let mut next = 0usize;
    for &t in grid {
        while next < anchors.len() && anchors[next].0 <= t {
            next += 1;
        }
        let value = match (next.checked_sub(1).map(|i| anchors[i]), anchors.get(next)) {
            (None, _) => None,
            (Some((t0, v0)), _) if t0 == t => Some(v0),
            (Some((_, v0)), None) => Some(v0),
            (Some((t0, v0)), Some(&(t1, v1))) => {
                let weight = (t - t0) as f64 / (t1 - t0) as f64;
                Some(v0 + (v1 - v0) * weight)
            }
        };
        out.push(value);
    }
    out
}

/// Last anchor at or before each grid point.
pub(crate) fn forward_fill<T: Clone>(anchors: &[(i64, T)], grid: &[i64]) -> Vec<Option<T>> {
    let mut out = Vec::with_capacity(grid.len());
    let mut next = 0usize;
    for &t in grid {
        while next < anchors.len() && anchors[next].0 <= t {
            next += 1;
        }
        out.push(next.checked_sub(1).map(|i| anchors[i].1.clone()));
    }
    out
}

/// Hour-aligned fetch bounds for a smoothing query.
pub fn widen_to_hours(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    (
        start.map(|s| SECONDARY_FREQUENCY.floor(s)),
        end.map(|e| SECONDARY_FREQUENCY.ceil(e)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, d, h, m, 0).unwrap()
    }

    fn weather(plant: i64, dt: DateTime<Utc>, temp: Option<f64>, summary: &str) -> Row<WeatherValues> {
        Row {
            key: RowKey {
                plant: Some(plant),
                inverter: None,
                dt,
                age: Some(0),
            },
            values: WeatherValues {
                src_dt: Some(dt),
                summary: Some(summary.to_string()),
                temp,
                ipolated: Some(false),
                epolated: Some(false),
                ..WeatherValues::default()
            },
        }
    }

    #[test]
    fn test_interpolation_is_linear_in_time() {
        let rows = vec![
            weather(1, at(1, 0, 0), Some(10.0), "clear"),
            weather(1, at(1, 1, 0), Some(12.0), "cloudy"),
        ];
        let window = SmoothWindow {
            start: Some(at(1, 0, 0)),
            end: Some(at(1, 1, 0)),
        };
        let out = smooth_weather(rows, window);
        assert_eq!(out.len(), 12);
        for (i, row) in out.iter().enumerate() {
            assert_eq!(row.key.dt, at(1, 0, 0) + Duration::minutes(5 * i as i64));
            assert_relative_eq!(row.values.temp.unwrap(), 10.0 + 2.0 * i as f64 / 12.0, epsilon = 1e-9);
            assert_eq!(row.values.summary.as_deref(), Some("clear"));
            assert_eq!(row.key.age, Some(0));
        }
        assert_relative_eq!(out[11].values.temp.unwrap(), 11.833333333, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_samples_interpolate_across_gap() {
        let rows = vec![
            weather(1, at(1, 0, 0), Some(0.0), "a"),
            weather(1, at(1, 1, 0), None, "b"),
            weather(1, at(1, 2, 0), Some(24.0), "c"),
        ];
        let window = SmoothWindow {
            start: Some(at(1, 0, 0)),
            end: Some(at(1, 2, 0)),
        };
        let out = smooth_weather(rows, window);
        assert_eq!(out.len(), 24);
        assert_relative_eq!(out[12].values.temp.unwrap(), 12.0, epsilon = 1e-9);
        assert_eq!(out[11].values.summary.as_deref(), Some("a"));
        assert_eq!(out[12].values.summary.as_deref(), Some("b"));
    }

    #[test]
    fn test_open_end_extends_to_end_of_day() {
        let rows = vec![
            weather(1, at(1, 22, 0), Some(1.0), "x"),
            weather(1, at(1, 23, 0), Some(3.0), "y"),
        ];
        let out = smooth_weather(rows, SmoothWindow::default());
        // 22:00 through 23:55 inclusive.
        assert_eq!(out.len(), 24);
        let last = out.last().unwrap();
        assert_eq!(last.key.dt, at(1, 23, 55));
        assert_eq!(last.values.temp, Some(3.0));
        assert_eq!(last.values.epolated, Some(true));
        assert_eq!(last.values.ipolated, Some(false));
        assert_eq!(last.values.src_dt, Some(at(1, 23, 55)));
        // Flags only change at the synthetic anchor.
        assert_eq!(out[22].values.epolated, Some(false));
    }

    #[test]
    fn test_plants_are_resampled_independently() {
        let rows = vec![
            weather(1, at(1, 0, 0), Some(0.0), "a"),
            weather(2, at(1, 0, 0), Some(100.0), "b"),
            weather(1, at(1, 1, 0), Some(12.0), "a"),
            weather(2, at(1, 1, 0), Some(100.0), "b"),
        ];
        let window = SmoothWindow {
            start: Some(at(1, 0, 0)),
            end: Some(at(1, 1, 0)),
        };
        let out = smooth_weather(rows, window);
        assert_eq!(out.len(), 24);
        assert_eq!(out[0].key.plant, Some(1));
        assert_eq!(out[1].key.plant, Some(2));
        assert_relative_eq!(out[2].values.temp.unwrap(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(out[3].values.temp.unwrap(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_anchor_holds_forward() {
        let rows = vec![weather(1, at(1, 0, 30), Some(5.0), "a")];
        let window = SmoothWindow {
            start: Some(at(1, 0, 0)),
            end: Some(at(1, 1, 0)),
        };
        let out = smooth_weather(rows, window);
        assert_eq!(out.len(), 12);
        assert_eq!(out[0].values.temp, None);
        assert_eq!(out[5].values.temp, None);
        assert_eq!(out[6].values.temp, Some(5.0));
        assert_eq!(out[11].values.temp, Some(5.0));
    }

    #[test]
    fn test_negative_src_dt_is_unknown() {
        let mut first = weather(1, at(1, 0, 0), Some(0.0), "a");
        first.values.src_dt = DateTime::from_timestamp(-10, 0);
        let second = weather(1, at(1, 1, 0), Some(1.0), "a");
        let window = SmoothWindow {
            start: Some(at(1, 0, 0)),
            end: Some(at(1, 1, 0)),
        };
        let out = smooth_weather(vec![first, second], window);
        assert_eq!(out[0].values.src_dt, None);
    }

    #[test]
    fn test_empty_input() {
        assert!(smooth_weather(Vec::new(), SmoothWindow::default()).is_empty());
    }

    #[test]
    fn test_widen_to_hours() {
        let (start, end) = widen_to_hours(Some(at(1, 10, 35)), Some(at(1, 11, 5)));
        assert_eq!(start, Some(at(1, 10, 0)));
        assert_eq!(end, Some(at(1, 12, 0)));
    }
}
