//! Query, resampling, assembly, evaluation and export over photovoltaic
//! power and weather time series.

pub mod assemble;
pub mod config;
pub mod db;
pub mod error;
pub mod evaluate;
pub mod export;
pub mod frame;
pub mod identity;
pub mod query;
pub mod resample;
pub mod tables;
pub mod time;

pub use assemble::{
    FeatureValues, PredictionFrames, PredictionRequest, PredictionValues, SolarDbAssembler,
    WeatherScheme,
};
pub use config::{Config, PRIMARY_FREQUENCY, SECONDARY_FREQUENCY};
pub use db::{RecordFilter, SolarDb};
pub use error::{ErrorKind, Result, SolarDbError};
pub use evaluate::{EvaluationReport, PredictionTarget, SolarDbEvaluator};
pub use export::{ExportInterval, ExportOptions, ExportSummary, SolarDbExporter};
pub use frame::{Frame, IndexLevels, Row, RowKey};
pub use identity::{resolve, IdentityFilter, IntoPlantIdentity, PlantIdentity};
pub use query::{AgeSelection, RangeQuery, WeatherQuery};
pub use tables::{
    ExogenousRecord, MetaRecord, PowerRecord, Table, WeatherColumn, WeatherRecord,
};
pub use time::{Frequency, TimeBound};

#[cfg(test)]
mod tests;
