use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::db::{RecordFilter, SolarDb};
use crate::error::{Result, SolarDbError};
use crate::frame::{Frame, IndexLevels, Row, RowKey, Values};
use crate::identity::IdentityFilter;
use crate::resample::{smooth_weather, widen_to_hours, SmoothWindow};
use crate::tables::{
    ExogenousColumn, ExogenousRecord, ExogenousValues, PowerColumn, PowerRecord, PowerValues,
    WeatherColumn, WeatherRecord, WeatherValues,
};
use crate::time::TimeBound;

/// Inclusive range query over one record kind.
#[derive(Debug, Clone)]
pub struct RangeQuery<C> {
    pub filter: IdentityFilter,
    pub start: Option<TimeBound>,
    pub end: Option<TimeBound>,
    /// Projection; `None` keeps every value column.
    pub columns: Option<Vec<C>>,
    /// Present plant (and inverter) levels regardless of the filter.
    pub all_indices: bool,
}

impl<C> Default for RangeQuery<C> {
    fn default() -> Self {
        Self {
            filter: IdentityFilter::All,
            start: None,
            end: None,
            columns: None,
            all_indices: false,
        }
    }
}

impl<C> RangeQuery<C> {
    pub fn new(filter: impl Into<IdentityFilter>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::default()
        }
    }

    pub fn start(mut self, start: impl Into<TimeBound>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn end(mut self, end: impl Into<TimeBound>) -> Self {
        self.end = Some(end.into());
        self
    }

    pub fn between(self, start: impl Into<TimeBound>, end: impl Into<TimeBound>) -> Self {
        self.start(start).end(end)
    }

    pub fn columns(mut self, columns: Vec<C>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn all_indices(mut self, all_indices: bool) -> Self {
        self.all_indices = all_indices;
        self
    }

    fn bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (
            self.start.map(TimeBound::start_instant),
            self.end.map(TimeBound::end_instant),
        )
    }

    fn full_index(&self) -> bool {
        self.all_indices || self.filter == IdentityFilter::All
    }
}

/// Which forecast age a weather query reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeSelection {
    /// Records with exactly this age; 0 is measured weather.
    FixedAge(i64),
    /// Per timestamp, the freshest forecast issued at or before the cutoff.
    LatestBefore(DateTime<Utc>),
}

#[derive(Debug, Clone, Default)]
pub struct WeatherQuery {
    pub range: RangeQuery<WeatherColumn>,
    pub selection: Option<AgeSelection>,
    /// Interpolate onto the five-minute grid. Requires a selection.
    pub smooth: bool,
}

impl WeatherQuery {
    pub fn new(range: RangeQuery<WeatherColumn>) -> Self {
        Self {
            range,
            ..Self::default()
        }
    }

    pub fn select(mut self, selection: AgeSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn smooth(mut self, smooth: bool) -> Self {
        self.smooth = smooth;
        self
    }
}

fn project<V: Values>(frame: Frame<V>, columns: &Option<Vec<V::Column>>) -> Frame<V> {
    match columns {
        Some(columns) => frame.project(columns),
        None => frame,
    }
}

impl SolarDb {
    /// Power records indexed by `dt`, plus `inv_id` for a plant filter and
    /// `pp_id, inv_id` for all plants or `all_indices`.
    pub async fn get_pp_power(&self, query: &RangeQuery<PowerColumn>) -> Result<Frame<PowerValues>> {
        let (start, end) = query.bounds();
        let filter = RecordFilter::for_identity(query.filter).between(start, end);
        let records: Vec<PowerRecord> = self.fetch(&filter).await?;
        debug!("Fetched {} power records", records.len());

        let levels = if query.full_index() {
            IndexLevels {
                plant: true,
                inverter: true,
                age: false,
            }
        } else if matches!(query.filter, IdentityFilter::Plant(_)) {
            IndexLevels {
                plant: false,
                inverter: true,
                age: false,
            }
        } else {
            IndexLevels::TIME_ONLY
        };

        let rows = records
            .into_iter()
            .map(|record| Row {
                key: RowKey {
                    plant: Some(record.pp_id),
                    inverter: Some(record.inv_id),
                    dt: record.dt,
                    age: None,
                },
                values: record.values,
            })
            .collect();
        Ok(project(Frame::new(levels, rows), &query.columns))
    }

    /// Weather records, optionally reduced to one age and smoothed onto the
    /// primary grid.
    ///
    /// Smoothing widens the fetched range outward to whole hours and returns
    /// the half-open grid `[start, end)` of the requested bounds.
    pub async fn get_pp_weather(&self, query: &WeatherQuery) -> Result<Frame<WeatherValues>> {
        if query.smooth && query.selection.is_none() {
            return Err(SolarDbError::Config(
                "smoothing requires a fixed age or a source cutoff".to_string(),
            ));
        }

        let (start, end) = query.range.bounds();
        let (fetch_start, fetch_end) = if query.smooth {
            widen_to_hours(start, end)
        } else {
            (start, end)
        };

        let mut filter = RecordFilter::for_identity(query.range.filter).between(fetch_start, fetch_end);
        match query.selection {
            Some(AgeSelection::FixedAge(age)) => filter.age = Some(age),
            Some(AgeSelection::LatestBefore(cutoff)) => filter.src_dt_max = Some(cutoff),
            None => {}
        }
        let mut records: Vec<WeatherRecord> = self.fetch(&filter).await?;
        debug!("Fetched {} weather records", records.len());

        if let Some(AgeSelection::LatestBefore(_)) = query.selection {
            // Rows arrive ordered by (dt, age): the first per key is the freshest.
            let mut seen = HashSet::new();
            records.retain(|record| seen.insert((record.pp_id, record.dt)));
        }

        let levels = IndexLevels {
            plant: query.range.full_index(),
            inverter: false,
            age: query.selection.is_none(),
        };

        let mut rows: Vec<Row<WeatherValues>> = records
            .into_iter()
            .map(|record| Row {
                key: RowKey {
                    plant: Some(record.pp_id),
                    inverter: None,
                    dt: record.dt,
                    age: Some(record.age),
                },
                values: record.values,
            })
            .collect();

        if query.smooth {
            let fetched = rows.len();
            rows = smooth_weather(rows, SmoothWindow { start, end });
            info!("Smoothed {} weather records into {} rows", fetched, rows.len());
        }

        Ok(project(Frame::new(levels, rows), &query.range.columns))
    }

    /// Exogenous records indexed by `dt`, plus `pp_id` for all plants or
    /// `all_indices`.
    pub async fn get_pp_exogenous(
        &self,
        query: &RangeQuery<ExogenousColumn>,
    ) -> Result<Frame<ExogenousValues>> {
        let (start, end) = query.bounds();
        let filter = RecordFilter::for_identity(query.filter).between(start, end);
        let records: Vec<ExogenousRecord> = self.fetch(&filter).await?;
        debug!("Fetched {} exogenous records", records.len());

        let levels = IndexLevels {
            plant: query.full_index(),
            inverter: false,
            age: false,
        };
        let rows = records
            .into_iter()
            .map(|record| Row {
                key: RowKey {
                    plant: Some(record.pp_id),
                    inverter: None,
                    dt: record.dt,
                    age: None,
                },
                values: record.values,
            })
            .collect();
        Ok(project(Frame::new(levels, rows), &query.columns))
    }
}
