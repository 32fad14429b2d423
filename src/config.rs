use std::path::PathBuf;

use crate::AppError;

pub const APP_IDENTIFIER: &str = "taskchain";
pub const DB_FILE_NAME: &str = "taskchain.sqlite3";
pub const DEFAULT_LOG_FILTER: &str = "taskchain=info,sqlx=warn";

pub const ENV_DB: &str = "TASKCHAIN_DB";
pub const ENV_LOG: &str = "TASKCHAIN_LOG";
pub const ENV_LOG_DIR: &str = "TASKCHAIN_LOG_DIR";
pub const ENV_FAKE_APPDATA: &str = "TASKCHAIN_FAKE_APPDATA";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is set but empty")]
    EmptyValue { var: &'static str },
    #[error("failed to resolve application data directory")]
    NoDataDir,
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::EmptyValue { .. } => "CONFIG/EMPTY_VALUE",
            ConfigError::NoDataDir => "CONFIG/NO_DATA_DIR",
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(error: ConfigError) -> Self {
        let app = AppError::new(error.code(), error.to_string());
        match error {
            ConfigError::EmptyValue { var } => app.with_context("var", var),
            ConfigError::NoDataDir => app,
        }
    }
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log_filter: String,
    /// Directory for the rolling JSON log file; stdout only when `None`.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(overrides: ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |var: &'static str| -> Result<Option<String>, ConfigError> {
            match env(var) {
                Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue { var }),
                other => Ok(other),
            }
        };

        let db_path = match overrides.db_path {
            Some(path) => path,
            None => match non_empty(ENV_DB)? {
                Some(path) => PathBuf::from(path),
                None => match non_empty(ENV_FAKE_APPDATA)? {
                    Some(fake) => PathBuf::from(fake).join(DB_FILE_NAME),
                    None => default_data_dir()?.join(DB_FILE_NAME),
                },
            },
        };

        let log_filter = non_empty(ENV_LOG)?.unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_dir = match overrides.log_dir {
            Some(dir) => Some(dir),
            None => match non_empty(ENV_LOG_DIR)? {
                Some(dir) => Some(PathBuf::from(dir)),
                None => non_empty(ENV_FAKE_APPDATA)?.map(|fake| PathBuf::from(fake).join("logs")),
            },
        };

        Ok(AppConfig {
            db_path,
            log_filter,
            log_dir,
        })
    }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or(ConfigError::NoDataDir)?;
    Ok(base.join(APP_IDENTIFIER))
}
