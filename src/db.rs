use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::{Config, DEFAULT_DUMP_BATCH_SIZE, DEFAULT_INSERT_CHUNK_SIZE};
use crate::error::{Result, SolarDbError};
use crate::frame::{Field, SqlType};
use crate::identity::{IdentityFilter, PlantIdentity};
use crate::tables::{ExogenousRecord, MetaRecord, PowerRecord, Record, Table, WeatherRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

impl BackendKind {
    pub fn type_name(self, ty: SqlType) -> String {
        match (self, ty) {
            (BackendKind::Sqlite, SqlType::Int) => "INTEGER".to_string(),
            (BackendKind::Postgres, SqlType::Int) => "BIGINT".to_string(),
            (BackendKind::Sqlite, SqlType::Float) => "REAL".to_string(),
            (BackendKind::Postgres, SqlType::Float) => "DOUBLE PRECISION".to_string(),
            (_, SqlType::Bool) => "BOOLEAN".to_string(),
            (BackendKind::Sqlite, SqlType::Text(_)) => "TEXT".to_string(),
            (BackendKind::Postgres, SqlType::Text(len)) => format!("VARCHAR({len})"),
            (BackendKind::Sqlite, SqlType::Time) => "DATETIME".to_string(),
            (BackendKind::Postgres, SqlType::Time) => "TIMESTAMPTZ".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// Runs the same body against whichever pool backs the handle.
macro_rules! with_pool {
    ($backend:expr, $pool:ident => $body:expr) => {
        match $backend {
            Backend::Sqlite($pool) => $body,
            Backend::Postgres($pool) => $body,
        }
    };
}

macro_rules! bind_fields {
    ($query:expr, $fields:expr) => {{
        let mut query = $query;
        for field in $fields {
            query = match field {
                Field::Int(v) => query.bind(v),
                Field::Float(v) => query.bind(v),
                Field::Bool(v) => query.bind(v),
                Field::Text(v) => query.bind(v),
                Field::Time(v) => query.bind(v),
            };
        }
        query
    }};
}

/// WHERE clause under construction. Placeholders are numbered in bind order.
#[derive(Debug, Default, Clone)]
pub(crate) struct Filter {
    clauses: Vec<String>,
    binds: Vec<Field>,
}

impl Filter {
    pub(crate) fn push(&mut self, column: &str, op: &str, value: Field) {
        self.binds.push(value);
        self.clauses
            .push(format!("\"{}\" {} ${}", column, op, self.binds.len()));
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Row selection for a range scan over one table.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub identity: IdentityFilter,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Weather only: exact forecast age.
    pub age: Option<i64>,
    /// Weather only: latest admissible forecast origin, inclusive.
    pub src_dt_max: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn for_identity(identity: impl Into<IdentityFilter>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    fn to_filter(&self, table: Table) -> Filter {
        let mut filter = Filter::default();
        match self.identity {
            IdentityFilter::All => {}
            IdentityFilter::Plant(pp) => filter.push("pp_id", "=", Field::Int(Some(pp))),
            IdentityFilter::Exact(identity) => {
                filter.push("pp_id", "=", Field::Int(Some(identity.plant_id)));
                if table.has_inverter() {
                    filter.push(
                        "inv_id",
                        "=",
                        Field::Int(Some(identity.storage_inverter_id())),
                    );
                }
            }
        }
        if table.has_time() {
            if let Some(start) = self.start {
                filter.push("dt", ">=", Field::Time(Some(start)));
            }
            if let Some(end) = self.end {
                filter.push("dt", "<=", Field::Time(Some(end)));
            }
        }
        if table == Table::Weather {
            if let Some(age) = self.age {
                filter.push("age", "=", Field::Int(Some(age)));
            }
            if let Some(cutoff) = self.src_dt_max {
                filter.push("src_dt", "<=", Field::Time(Some(cutoff)));
            }
        }
        filter
    }
}

/// Handle to the backing store. One pooled connection, shared by clones.
#[derive(Debug, Clone)]
pub struct SolarDb {
    backend: Backend,
    url: String,
    insert_chunk_size: usize,
}

impl SolarDb {
    /// Open `url`, creating the tables if they are absent.
    ///
    /// A bare path (no `:`) names a SQLite file which must exist unless
    /// `create_db` is set. `sqlite:` and `postgres://` URLs are passed to sqlx.
    pub async fn connect(url: &str, create_db: bool) -> Result<Self> {
        Self::open(url, create_db, false, DEFAULT_INSERT_CHUNK_SIZE).await
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Self::open(
            &config.database_url,
            config.create_db,
            config.statement_logging,
            config.insert_chunk_size,
        )
        .await
    }

    async fn open(
        url: &str,
        create_db: bool,
        statement_logging: bool,
        insert_chunk_size: usize,
    ) -> Result<Self> {
        let backend = if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let mut options = PgConnectOptions::from_str(url)?;
            options = if statement_logging {
                options.log_statements(log::LevelFilter::Debug)
            } else {
                options.disable_statement_logging()
            };
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?;
            Backend::Postgres(pool)
        } else {
            let mut options = if url.starts_with("sqlite:") {
                if let Some(path) = sqlite_file(url) {
                    ensure_exists(&path, create_db)?;
                }
                SqliteConnectOptions::from_str(url)?
            } else if url.contains(':') {
                return Err(SolarDbError::Config(format!(
                    "unsupported database url '{url}', expected a file path, sqlite: or postgres://"
                )));
            } else {
                let path = PathBuf::from(url);
                ensure_exists(&path, create_db)?;
                SqliteConnectOptions::new().filename(path)
            };
            options = options.create_if_missing(create_db);
            options = if statement_logging {
                options.log_statements(log::LevelFilter::Debug)
            } else {
                options.disable_statement_logging()
            };
            // In-memory databases live as long as their connection.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?;
            Backend::Sqlite(pool)
        };

        let db = Self {
            backend,
            url: url.to_string(),
            insert_chunk_size: insert_chunk_size.max(1),
        };
        db.check_create_tables().await?;
        info!("Connected to {} ({:?})", db.url, db.kind());
        Ok(db)
    }

    pub fn kind(&self) -> BackendKind {
        match self.backend {
            Backend::Sqlite(_) => BackendKind::Sqlite,
            Backend::Postgres(_) => BackendKind::Postgres,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn close(&self) {
        with_pool!(&self.backend, pool => pool.close().await);
    }

    pub async fn check_create_tables(&self) -> Result<()> {
        for table in Table::ALL {
            let sql = table.create_sql(self.kind());
            debug!("Ensuring table {}", table.name());
            with_pool!(&self.backend, pool => {
                sqlx::query(&sql).execute(pool).await?;
            });
        }
        Ok(())
    }

    pub async fn drop_tables(&self) -> Result<()> {
        for table in Table::ALL {
            let sql = format!("DROP TABLE IF EXISTS {}", table.name());
            with_pool!(&self.backend, pool => {
                sqlx::query(&sql).execute(pool).await?;
            });
        }
        Ok(())
    }

    pub async fn insert_power(&self, records: &[PowerRecord]) -> Result<u64> {
        self.insert(records).await
    }

    pub async fn insert_weather(&self, records: &[WeatherRecord]) -> Result<u64> {
        self.insert(records).await
    }

    /// Rejects the batch if any record carries an unknown status or error code.
    pub async fn insert_exogenous(&self, records: &[ExogenousRecord]) -> Result<u64> {
        for record in records {
            record.values.check_codes()?;
        }
        self.insert(records).await
    }

    pub async fn insert_meta(&self, records: &[MetaRecord]) -> Result<u64> {
        self.insert(records).await
    }

    /// Insert records one transaction per chunk.
    pub async fn insert<R: Record>(&self, records: &[R]) -> Result<u64> {
        let sql = R::TABLE.insert_sql();
        let mut inserted = 0u64;
        for (batch_idx, chunk) in records.chunks(self.insert_chunk_size).enumerate() {
            with_pool!(&self.backend, pool => {
                let mut tx = pool.begin().await?;
                for record in chunk {
                    let query = bind_fields!(sqlx::query(&sql), record.fields());
                    inserted += query.execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            });
            debug!(
                "Batch {}: inserted {} records into {}",
                batch_idx,
                chunk.len(),
                R::TABLE.name()
            );
        }
        Ok(inserted)
    }

    /// Ordered range scan.
    pub async fn fetch<R: Record>(&self, filter: &RecordFilter) -> Result<Vec<R>> {
        self.select(&filter.to_filter(R::TABLE), None).await
    }

    pub(crate) async fn select<R: Record>(
        &self,
        filter: &Filter,
        page: Option<(usize, usize)>,
    ) -> Result<Vec<R>> {
        let table = R::TABLE;
        let mut sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            table.select_list(),
            table.name(),
            filter.sql(),
            table.order_by()
        );
        if let Some((limit, offset)) = page {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        debug!("Query: {}", sql);
        let records = with_pool!(&self.backend, pool => {
            bind_fields!(sqlx::query_as::<_, R>(&sql), filter.binds.iter().cloned())
                .fetch_all(pool)
                .await?
        });
        Ok(records)
    }

    pub async fn count_records(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = with_pool!(&self.backend, pool => {
            sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await?
        });
        Ok(count)
    }

    /// Does the identity have at least one power record?
    pub async fn pp_exists(&self, identity: PlantIdentity) -> Result<bool> {
        let mut filter = Filter::default();
        filter.push("pp_id", "=", Field::Int(Some(identity.plant_id)));
        if let Some(inv) = identity.inverter_id {
            filter.push("inv_id", "=", Field::Int(Some(inv)));
        }
        let sql = format!("SELECT COUNT(*) FROM power{}", filter.sql());
        let count: i64 = with_pool!(&self.backend, pool => {
            bind_fields!(sqlx::query_scalar::<_, i64>(&sql), filter.binds.iter().cloned())
                .fetch_one(pool)
                .await?
        });
        Ok(count > 0)
    }

    /// Meta records for the filter. A whole-plant `Exact` identity covers
    /// the plant's inverters too.
    pub async fn get_pp_info(&self, filter: IdentityFilter) -> Result<Vec<MetaRecord>> {
        let filter = match filter {
            IdentityFilter::Exact(identity) if identity.is_whole_plant() => {
                IdentityFilter::Plant(identity.plant_id)
            }
            other => other,
        };
        self.fetch(&RecordFilter::for_identity(filter)).await
    }

    /// Identities listed in the meta table, sorted.
    pub async fn list_pp_inverters(&self, plant_id: Option<i64>) -> Result<Vec<PlantIdentity>> {
        let filter = plant_id.map_or(IdentityFilter::All, IdentityFilter::Plant);
        let records: Vec<MetaRecord> = self.fetch(&RecordFilter::for_identity(filter)).await?;
        let identities: BTreeSet<PlantIdentity> =
            records.iter().map(MetaRecord::identity).collect();
        Ok(identities.into_iter().collect())
    }

    /// Inclusive span of the identity's power records, `None` if it has none.
    /// A whole-plant identity spans all of the plant's records.
    pub async fn get_pp_interval(
        &self,
        identity: PlantIdentity,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let mut filter = Filter::default();
        filter.push("pp_id", "=", Field::Int(Some(identity.plant_id)));
        if let Some(inv) = identity.inverter_id {
            filter.push("inv_id", "=", Field::Int(Some(inv)));
        }
        let sql = format!("SELECT MIN(dt), MAX(dt) FROM power{}", filter.sql());
        type Span = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);
        let (first, last): Span = with_pool!(&self.backend, pool => {
                bind_fields!(sqlx::query_as::<_, Span>(&sql), filter.binds.iter().cloned())
                    .fetch_one(pool)
                    .await?
            });
        Ok(first.zip(last))
    }

    /// Copy every table into a fresh SQLite file at `path`.
    pub async fn dump_as_sqlite(
        &self,
        path: &Path,
        overwrite: bool,
        batch_size: Option<usize>,
    ) -> Result<u64> {
        if path.exists() && !overwrite {
            return Err(SolarDbError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let batch_size = batch_size.unwrap_or(DEFAULT_DUMP_BATCH_SIZE).max(1);
        let target = SolarDb::open_file(path, true).await?;
        target.drop_tables().await?;
        target.check_create_tables().await?;

        let mut copied = self.copy_table::<PowerRecord>(&target, batch_size).await?;
        copied += self.copy_table::<WeatherRecord>(&target, batch_size).await?;
        copied += self.copy_table::<ExogenousRecord>(&target, batch_size).await?;
        copied += self.copy_table::<MetaRecord>(&target, batch_size).await?;
        target.close().await;

        info!("Dumped {} records into {}", copied, path.display());
        Ok(copied)
    }

    pub(crate) async fn open_file(path: &Path, create_db: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create_db)
            .disable_statement_logging();
        ensure_exists(path, create_db)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self {
            backend: Backend::Sqlite(pool),
            url: path.display().to_string(),
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        };
        db.check_create_tables().await?;
        Ok(db)
    }

    async fn copy_table<R: Record>(&self, target: &SolarDb, batch_size: usize) -> Result<u64> {
        let total = row_total(R::TABLE, self.count_records(R::TABLE).await?)?;
        let filter = Filter::default();
        let mut fetched = 0usize;
        let mut copied = 0u64;
        while fetched < total {
            let records: Vec<R> = self.select(&filter, Some((batch_size, fetched))).await?;
            if records.is_empty() {
                break;
            }
            fetched += records.len();
            copied += target.insert(&records).await?;
            debug!("Copied {}/{} rows of {}", fetched, total, R::TABLE.name());
        }
        Ok(copied)
    }
}

fn row_total(table: Table, count: i64) -> Result<usize> {
    usize::try_from(count).map_err(|_| {
        SolarDbError::contract(format!("invalid row count {count} for {}", table.name()))
    })
}

/// File behind a `sqlite:` URL, `None` for in-memory databases.
fn sqlite_file(url: &str) -> Option<PathBuf> {
    let rest = url.trim_start_matches("sqlite:").trim_start_matches("//");
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" || rest.contains("mode=memory") {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

fn ensure_exists(path: &Path, create_db: bool) -> Result<()> {
    if !create_db && !path.exists() {
        return Err(SolarDbError::DatabaseMissing {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_file_from_url() {
        assert_eq!(sqlite_file("sqlite::memory:"), None);
        assert_eq!(sqlite_file("sqlite://data/solar.db"), Some(PathBuf::from("data/solar.db")));
        assert_eq!(sqlite_file("sqlite:solar.db?mode=rwc"), Some(PathBuf::from("solar.db")));
        assert_eq!(sqlite_file("sqlite:file:x?mode=memory"), None);
    }

    #[test]
    fn test_filter_numbers_placeholders() {
        let filter = RecordFilter {
            identity: IdentityFilter::Exact(PlantIdentity::inverter(3, 1)),
            start: Some(chrono::Utc::now()),
            ..RecordFilter::default()
        }
        .to_filter(Table::Power);
        assert_eq!(
            filter.sql(),
            " WHERE \"pp_id\" = $1 AND \"inv_id\" = $2 AND \"dt\" >= $3"
        );
        let weather = RecordFilter::for_identity(PlantIdentity::inverter(3, 1)).to_filter(Table::Weather);
        assert_eq!(weather.sql(), " WHERE \"pp_id\" = $1");
    }

    #[test]
    fn test_row_total_rejects_negative_count() {
        assert_eq!(row_total(Table::Meta, 4).unwrap(), 4);
        let err = row_total(Table::Power, -1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataContract);
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let err = SolarDb::connect(path.to_str().unwrap(), false).await.unwrap_err();
        assert!(matches!(err, SolarDbError::DatabaseMissing { .. }));
        assert!(SolarDb::connect("mysql://localhost/solar", true).await.is_err());
    }
}
