use serde::{Deserialize, Serialize};

use crate::error::{Result, SolarDbError};
use crate::time::Frequency;

/// Cadence of power and exogenous records.
pub const PRIMARY_FREQUENCY: Frequency = Frequency::from_secs(300);
/// Cadence of weather records.
pub const SECONDARY_FREQUENCY: Frequency = Frequency::from_secs(3600);

pub const DEFAULT_DUMP_BATCH_SIZE: usize = 131_072;
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub create_db: bool,
    pub statement_logging: bool,
    pub dump_batch_size: usize,
    pub insert_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::from("solar.db"),
            create_db: false,
            statement_logging: false,
            dump_batch_size: DEFAULT_DUMP_BATCH_SIZE,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SOLARDB_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            config.database_url = url;
        }

        if let Ok(create_db) = std::env::var("SOLARDB_CREATE_DB") {
            config.create_db = parse_flag("SOLARDB_CREATE_DB", &create_db)?;
        }

        if let Ok(logging) = std::env::var("SOLARDB_STATEMENT_LOGGING") {
            config.statement_logging = parse_flag("SOLARDB_STATEMENT_LOGGING", &logging)?;
        }

        if let Ok(batch_size) = std::env::var("SOLARDB_DUMP_BATCH_SIZE") {
            config.dump_batch_size = batch_size.parse().map_err(|_| {
                SolarDbError::Config(format!("SOLARDB_DUMP_BATCH_SIZE is not a number: {batch_size}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(SolarDbError::Config("database url is empty".to_string()));
        }
        if self.dump_batch_size == 0 || self.insert_chunk_size == 0 {
            return Err(SolarDbError::Config("batch sizes must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(SolarDbError::Config(format!("{name} is not a boolean: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dump_batch_size, 131_072);
        assert!(!config.create_db);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "TRUE").unwrap());
        assert!(!parse_flag("X", "0").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = Config {
            dump_batch_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
