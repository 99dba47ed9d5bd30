use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use solardb::export::{ExportInterval, ExportOptions, SolarDbExporter};
use solardb::time::parse_date_interval;
use solardb::{Config, PlantIdentity, SolarDb, Table};

#[derive(Parser, Debug)]
#[command(name = "solardb")]
#[command(about = "Query, dump and export photovoltaic power and weather records", long_about = None)]
struct Args {
    /// Database file path, sqlite: or postgres:// URL (overrides SOLARDB_URL)
    #[arg(long)]
    db_path: Option<String>,

    /// Create the database file if it does not exist
    #[arg(long)]
    create_db: bool,

    /// Log every SQL statement at debug level
    #[arg(long)]
    statement_logging: bool,

    /// Print table counts and known identities as JSON
    #[arg(long)]
    summary: bool,

    /// Copy the whole database into a SQLite file
    #[arg(long, value_name = "PATH")]
    dump: Option<PathBuf>,

    /// Replace existing dump or export targets
    #[arg(long)]
    overwrite: bool,

    /// Rows per page when dumping
    #[arg(long)]
    batch_size: Option<usize>,

    /// Export the database as CSVs into the directory
    #[arg(long, value_name = "DIR")]
    export_csv: Option<PathBuf>,

    /// Export the database as SQLite files into the directory
    #[arg(long, value_name = "DIR")]
    export_db: Option<PathBuf>,

    /// Export power plants separately
    #[arg(long)]
    separate_pp: bool,

    /// Export inverters separately (with --separate-pp)
    #[arg(long)]
    separate_inv: bool,

    /// Limit exports to the inclusive date interval
    #[arg(long, value_name = "%d.%m.%Y/%d.%m.%Y", conflicts_with = "month_interval")]
    dt_interval: Option<String>,

    /// Limit exports to months since each plant's first record, e.g. 0/1
    #[arg(long, value_name = "IDX/IDX")]
    month_interval: Option<String>,
}

#[derive(Serialize)]
struct DatabaseSummary {
    url: String,
    counts: Vec<(&'static str, i64)>,
    identities: Vec<PlantIdentity>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("solardb=info".parse()?),
        )
        .init();

    dotenv::dotenv().ok();

    let args = Args::parse();

    let mut config = Config::from_env().context("Invalid SOLARDB_* environment")?;
    if let Some(url) = &args.db_path {
        config.database_url = url.clone();
    }
    config.create_db |= args.create_db;
    config.statement_logging |= args.statement_logging;
    if let Some(batch_size) = args.batch_size {
        config.dump_batch_size = batch_size;
    }

    let db = SolarDb::from_config(&config)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    let interval = match (&args.dt_interval, &args.month_interval) {
        (Some(dates), _) => {
            let (start, end) = parse_date_interval(dates, "%d.%m.%Y", '/')
                .context("Invalid --dt-interval")?;
            Some(ExportInterval::Dates { start, end })
        }
        (None, Some(months)) => {
            Some(ExportInterval::parse_months(months).context("Invalid --month-interval")?)
        }
        (None, None) => None,
    };
    let options = ExportOptions {
        separate_pp: args.separate_pp,
        separate_inv: args.separate_inv,
        interval,
        overwrite: args.overwrite,
    };

    let total_start = Instant::now();

    if args.summary {
        let mut counts = Vec::new();
        for table in Table::ALL {
            counts.push((table.name(), db.count_records(table).await?));
        }
        let summary = DatabaseSummary {
            url: db.url().to_string(),
            counts,
            identities: db.list_pp_inverters(None).await?,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if let Some(path) = &args.dump {
        let copied = db
            .dump_as_sqlite(path, args.overwrite, Some(config.dump_batch_size))
            .await
            .with_context(|| format!("Failed to dump into {}", path.display()))?;
        info!("Dumped {} records", copied);
    }

    let exporter = SolarDbExporter::new(db.clone());
    if let Some(dir) = &args.export_csv {
        let summary = exporter
            .export_csv(dir, &options)
            .await
            .with_context(|| format!("CSV export into {} failed", dir.display()))?;
        println!("{}", serde_json::to_string(&summary)?);
    }
    if let Some(dir) = &args.export_db {
        let summary = exporter
            .export_db(dir, &options)
            .await
            .with_context(|| format!("Database export into {} failed", dir.display()))?;
        println!("{}", serde_json::to_string(&summary)?);
    }

    db.close().await;
    info!(
        "Finished in {:.2} seconds",
        total_start.elapsed().as_secs_f32()
    );
    Ok(())
}
