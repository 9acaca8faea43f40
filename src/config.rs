use std::env;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use thiserror::Error;

use crate::store::StoreError;

/// Environment variable naming the directory that holds the roster database.
pub const DATA_DIR_VAR: &str = "STUDENTD_DATA_DIR";

const DB_FILE: &str = "students.sqlite3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("STUDENTD_DATA_DIR is not set; refusing to start without a storage location")]
    MissingDataDir,
}

/// Connection parameters, read from the process environment exactly once at
/// startup and carried explicitly from there on.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl StoreConfig {
    /// An absent or empty storage location is fatal for the whole process,
    /// not a per-operation failure.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dir = env::var(DATA_DIR_VAR)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingDataDir)?;
        Ok(StoreConfig {
            data_dir: PathBuf::from(dir),
        })
    }
}

/// Hands out one connection per operation. Callers hold the connection for
/// the duration of a single request; dropping it closes the database.
pub struct Connector {
    db_path: PathBuf,
}

impl Connector {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.data_dir).map_err(StoreError::DataDir)?;
        Ok(Connector {
            db_path: config.data_dir.join(DB_FILE),
        })
    }

    pub fn acquire(&self) -> Result<Connection, StoreError> {
        Connection::open(&self.db_path).map_err(StoreError::Connection)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
