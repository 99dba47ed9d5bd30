use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db::{RecordFilter, SolarDb};
use crate::error::{Result, SolarDbError};
use crate::frame::{Field, Frame, Values};
use crate::identity::{IdentityFilter, PlantIdentity};
use crate::query::{RangeQuery, WeatherQuery};
use crate::tables::{ExogenousRecord, PowerRecord, Record, Table, WeatherRecord};
use crate::time::TimeBound;

/// Export window, applied to every plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportInterval {
    /// Inclusive calendar dates.
    Dates { start: NaiveDate, end: NaiveDate },
    /// Months since each plant's first power record; `0/1` is the first month.
    Months { first: u32, last: u32 },
}

impl ExportInterval {
    /// Parse `first/last` month indices.
    pub fn parse_months(s: &str) -> Result<Self> {
        let invalid = |reason: &str| SolarDbError::InvalidTime {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let (first, last) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected IDX/IDX"))?;
        let first: u32 = first.trim().parse().map_err(|_| invalid("first index is not a number"))?;
        let last: u32 = last.trim().parse().map_err(|_| invalid("last index is not a number"))?;
        if last <= first {
            return Err(invalid("last month must follow the first"));
        }
        Ok(ExportInterval::Months { first, last })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub separate_pp: bool,
    /// Only with `separate_pp`: one power file per inverter.
    pub separate_inv: bool,
    pub interval: Option<ExportInterval>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportSummary {
    pub files: Vec<PathBuf>,
    pub records: u64,
}

type Bounds = Option<(TimeBound, TimeBound)>;

/// One plant and the power scopes exported for it.
#[derive(Debug, Clone)]
struct PlantScope {
    plant_id: i64,
    power: Vec<IdentityFilter>,
    bounds: Bounds,
}

/// Filename prefix for an export scope. The aggregate of an inverter-split
/// plant is `inv A`.
pub fn format_scope(scope: IdentityFilter) -> String {
    match scope {
        IdentityFilter::All => String::new(),
        IdentityFilter::Plant(pp) => format!("pp{pp}"),
        IdentityFilter::Exact(identity) => match identity.inverter_id {
            None => format!("pp{}_invA", identity.plant_id),
            Some(inv) => format!("pp{}_inv{}", identity.plant_id, inv),
        },
    }
}

fn target_name(prefix: &str, suffix: &str) -> String {
    if prefix.is_empty() {
        format!("solardb{suffix}")
    } else {
        format!("{prefix}_solardb{suffix}")
    }
}

/// Writes the store out as CSV files or per-scope SQLite files.
pub struct SolarDbExporter {
    db: SolarDb,
}

impl SolarDbExporter {
    pub fn new(db: SolarDb) -> Self {
        Self { db }
    }

    /// Resolve the plants to export with their power scopes and windows.
    async fn prepare(&self, options: &ExportOptions) -> Result<Vec<PlantScope>> {
        let identities = self.db.list_pp_inverters(None).await?;
        let plants: BTreeSet<i64> = identities.iter().map(|id| id.plant_id).collect();
        info!(
            "Total power plants: {} | inverters: {}",
            plants.len(),
            identities.len()
        );

        let mut scopes = Vec::with_capacity(plants.len());
        for plant_id in plants {
            let bounds = match options.interval {
                None => None,
                Some(ExportInterval::Dates { start, end }) => {
                    Some((TimeBound::Date(start), TimeBound::Date(end)))
                }
                Some(ExportInterval::Months { first, last }) => {
                    let plant = PlantIdentity::whole_plant(plant_id);
                    match self.db.get_pp_interval(plant).await? {
                        Some((data_start, _)) => Some(month_window(data_start, first, last)?),
                        None => {
                            warn!("No power data for {}, skipping month-relative export", plant);
                            continue;
                        }
                    }
                }
            };
            let power = if options.separate_pp && options.separate_inv {
                identities
                    .iter()
                    .filter(|id| id.plant_id == plant_id)
                    .map(|id| IdentityFilter::Exact(*id))
                    .collect()
            } else {
                vec![IdentityFilter::Plant(plant_id)]
            };
            scopes.push(PlantScope {
                plant_id,
                power,
                bounds,
            });
        }
        Ok(scopes)
    }

    fn plant_prefix(options: &ExportOptions, plant_id: i64) -> String {
        Self::power_prefix(options, IdentityFilter::Plant(plant_id))
    }

    fn power_prefix(options: &ExportOptions, scope: IdentityFilter) -> String {
        if options.separate_pp {
            format_scope(scope)
        } else {
            String::new()
        }
    }

    /// Export every table as `;`-delimited CSV into `dir`.
    pub async fn export_csv(&self, dir: &Path, options: &ExportOptions) -> Result<ExportSummary> {
        info!("Exporting database CSVs to \"{}\"", dir.display());
        fs::create_dir_all(dir).map_err(|e| SolarDbError::io(dir, e))?;
        let scopes = self.prepare(options).await?;

        let path_for = |prefix: &str, table: Table| {
            dir.join(target_name(prefix, &format!("_{}.csv", table.name())))
        };
        let mut targets = BTreeSet::new();
        for scope in &scopes {
            for filter in &scope.power {
                targets.insert(path_for(&Self::power_prefix(options, *filter), Table::Power));
            }
            let prefix = Self::plant_prefix(options, scope.plant_id);
            for table in [Table::Weather, Table::Exogenous, Table::Meta] {
                targets.insert(path_for(&prefix, table));
            }
        }
        check_targets(&targets, options.overwrite)?;

        let mut writers = CsvWriters::default();
        for (idx, scope) in scopes.iter().enumerate() {
            info!("[{}/{}] Exporting plant {}", idx + 1, scopes.len(), scope.plant_id);

            for filter in &scope.power {
                let query = bounded(RangeQuery::new(*filter).all_indices(true), scope.bounds);
                let frame = self.db.get_pp_power(&query).await?;
                let path = path_for(&Self::power_prefix(options, *filter), Table::Power);
                writers.write_frame(&path, &frame)?;
            }

            let prefix = Self::plant_prefix(options, scope.plant_id);
            let plant = IdentityFilter::Plant(scope.plant_id);

            let weather = WeatherQuery::new(bounded(
                RangeQuery::new(plant).all_indices(true),
                scope.bounds,
            ));
            let frame = self.db.get_pp_weather(&weather).await?;
            writers.write_frame(&path_for(&prefix, Table::Weather), &frame)?;

            let exogenous = bounded(RangeQuery::new(plant).all_indices(true), scope.bounds);
            let frame = self.db.get_pp_exogenous(&exogenous).await?;
            writers.write_frame(&path_for(&prefix, Table::Exogenous), &frame)?;

            let meta = self.db.get_pp_info(plant).await?;
            writers.write_records(&path_for(&prefix, Table::Meta), &meta)?;
        }

        let summary = writers.finish()?;
        info!(
            "Exported {} records into {} CSV files",
            summary.records,
            summary.files.len()
        );
        Ok(summary)
    }

    /// Export each scope into its own SQLite file in `dir`. With
    /// `separate_inv` every inverter identity gets its own file holding its
    /// power records alongside the plant's weather and exogenous data.
    pub async fn export_db(&self, dir: &Path, options: &ExportOptions) -> Result<ExportSummary> {
        info!("Exporting database files to \"{}\"", dir.display());
        fs::create_dir_all(dir).map_err(|e| SolarDbError::io(dir, e))?;
        let scopes = self.prepare(options).await?;

        let path_for = |filter: IdentityFilter| {
            dir.join(target_name(&Self::power_prefix(options, filter), ".db"))
        };
        let targets: BTreeSet<PathBuf> = scopes
            .iter()
            .flat_map(|scope| scope.power.iter().map(|filter| path_for(*filter)))
            .collect();
        check_targets(&targets, options.overwrite)?;

        let mut targets: HashMap<PathBuf, SolarDb> = HashMap::new();
        let mut summary = ExportSummary::default();
        for (idx, scope) in scopes.iter().enumerate() {
            let (start, end) = match scope.bounds {
                Some((start, end)) => (Some(start.start_instant()), Some(end.end_instant())),
                None => (None, None),
            };
            let plant = RecordFilter::for_identity(IdentityFilter::Plant(scope.plant_id))
                .between(start, end);

            for filter in &scope.power {
                let path = path_for(*filter);
                info!(
                    "[{}/{}] Exporting {:?} -> \"{}\"",
                    idx + 1,
                    scopes.len(),
                    filter,
                    path.display()
                );
                if !targets.contains_key(&path) {
                    let target = SolarDb::open_file(&path, true).await?;
                    target.drop_tables().await?;
                    target.check_create_tables().await?;
                    summary.files.push(path.clone());
                    targets.insert(path.clone(), target);
                }
                let Some(target) = targets.get(&path) else {
                    continue;
                };

                let range = RecordFilter::for_identity(*filter).between(start, end);
                let power: Vec<PowerRecord> = self.db.fetch(&range).await?;
                summary.records += target.insert(&power).await?;
                let weather: Vec<WeatherRecord> = self.db.fetch(&plant).await?;
                summary.records += target.insert(&weather).await?;
                let exogenous: Vec<ExogenousRecord> = self.db.fetch(&plant).await?;
                summary.records += target.insert(&exogenous).await?;
                let meta = self.db.get_pp_info(*filter).await?;
                summary.records += target.insert(&meta).await?;
            }
        }

        for target in targets.into_values() {
            target.close().await;
        }
        info!(
            "Exported {} records into {} database files",
            summary.records,
            summary.files.len()
        );
        Ok(summary)
    }
}

/// `[data_start + first months, data_start + last months - 1 s]`.
fn month_window(data_start: DateTime<Utc>, first: u32, last: u32) -> Result<(TimeBound, TimeBound)> {
    let overflow = || SolarDbError::InvalidTime {
        input: format!("{first}/{last}"),
        reason: "month interval overflows the calendar".to_string(),
    };
    let start = data_start
        .checked_add_months(Months::new(first))
        .ok_or_else(overflow)?;
    let end = data_start
        .checked_add_months(Months::new(last))
        .ok_or_else(overflow)?
        - Duration::seconds(1);
    Ok((TimeBound::Instant(start), TimeBound::Instant(end)))
}

fn bounded<C>(query: RangeQuery<C>, bounds: Bounds) -> RangeQuery<C> {
    match bounds {
        Some((start, end)) => query.between(start, end),
        None => query,
    }
}

fn check_targets(targets: &BTreeSet<PathBuf>, overwrite: bool) -> Result<()> {
    if overwrite {
        return Ok(());
    }
    match targets.iter().find(|path| path.exists()) {
        Some(path) => Err(SolarDbError::AlreadyExists { path: path.clone() }),
        None => Ok(()),
    }
}

/// Open CSV files keyed by path; the header goes out with the first write.
#[derive(Default)]
struct CsvWriters {
    writers: HashMap<PathBuf, csv::Writer<File>>,
    order: Vec<PathBuf>,
    records: u64,
}

impl CsvWriters {
    fn writer(&mut self, path: &Path, header: &[&str]) -> Result<&mut csv::Writer<File>> {
        if !self.writers.contains_key(path) {
            let file = File::create(path).map_err(|e| SolarDbError::io(path, e))?;
            let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(file);
            writer.write_record(header)?;
            debug!("Opened {}", path.display());
            self.writers.insert(path.to_path_buf(), writer);
            self.order.push(path.to_path_buf());
        }
        self.writers
            .get_mut(path)
            .ok_or_else(|| SolarDbError::contract(format!("no writer for {}", path.display())))
    }

    fn write_rows<I>(&mut self, path: &Path, header: &[&str], rows: I) -> Result<()>
    where
        I: IntoIterator<Item = Vec<Field>>,
    {
        let writer = self.writer(path, header)?;
        let mut written = 0u64;
        for row in rows {
            writer.write_record(row.iter().map(Field::render))?;
            written += 1;
        }
        self.records += written;
        Ok(())
    }

    fn write_frame<V: Values>(&mut self, path: &Path, frame: &Frame<V>) -> Result<()> {
        let header = frame.header();
        self.write_rows(path, &header, frame.rows.iter().map(|row| frame.record(row)))
    }

    fn write_records<R: Record>(&mut self, path: &Path, records: &[R]) -> Result<()> {
        let header = R::TABLE.csv_header();
        self.write_rows(path, &header, records.iter().map(R::fields))
    }

    fn finish(mut self) -> Result<ExportSummary> {
        for (path, writer) in self.writers.iter_mut() {
            writer.flush().map_err(|e| SolarDbError::io(path, e))?;
        }
        Ok(ExportSummary {
            files: self.order,
            records: self.records,
        })
    }
}
