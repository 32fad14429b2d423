use std::collections::HashMap;
use std::fmt;
use std::io::Error as IoError;

use serde::{Deserialize, Serialize};
use sqlx::Error as SqlxError;

pub const TASK_NOT_FOUND: &str = "TASK/NOT_FOUND";
pub const UNIT_NOT_FOUND: &str = "UNIT/NOT_FOUND";
pub const RELATIONSHIP_NOT_FOUND: &str = "RELATIONSHIP/NOT_FOUND";
pub const CHAIN_SELF_LINK: &str = "CHAIN/SELF_LINK";
pub const CHAIN_CROSS_UNIT: &str = "CHAIN/CROSS_UNIT";
pub const CHAIN_CYCLE: &str = "CHAIN/CYCLE";
pub const CHAIN_DELETED_TASK: &str = "CHAIN/DELETED_TASK";
pub const CHAIN_OPERATION_FAILED: &str = "CHAIN/OPERATION_FAILED";
pub const CHAIN_OPERATION_FAILED_MESSAGE: &str = "The chain operation could not be completed.";

/// Error surfaced by every chain and repository call. Serializes flat so a
/// UI can show `message` and branch on `code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn task_not_found(task_id: i64) -> Self {
        AppError::new(TASK_NOT_FOUND, "Task not found").with_context("task_id", task_id.to_string())
    }

    pub fn unit_not_found(unit_id: i64) -> Self {
        AppError::new(UNIT_NOT_FOUND, "Unit not found").with_context("unit_id", unit_id.to_string())
    }

    /// Wraps a lower-layer failure as a generic chain failure, keeping the original as cause.
    pub fn operation_failed(operation: &'static str, cause: AppError) -> Self {
        AppError::new(CHAIN_OPERATION_FAILED, CHAIN_OPERATION_FAILED_MESSAGE)
            .with_context("operation", operation)
            .with_cause(cause)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn is_not_found(&self) -> bool {
        self.code.ends_with("/NOT_FOUND")
    }

    /// Errors caused by the request itself (unknown ids, rejected links)
    /// rather than by storage.
    pub fn is_domain(&self) -> bool {
        self.is_not_found()
            || (self.code.starts_with("CHAIN/") && self.code != CHAIN_OPERATION_FAILED)
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: AppError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            let mut pairs: Vec<_> = self.context.iter().collect();
            pairs.sort();
            write!(f, "[{}] {} (", self.code, self.message)?;
            for (idx, (key, value)) in pairs.into_iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            f.write_str(")")
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let mut app_error = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::ColumnNotFound(name) => {
                AppError::new("SQLX/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column_index", index.to_string())
            }
            SqlxError::Decode(decode_err) => AppError::new("SQLX/DECODE", decode_err.to_string()),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_failed_keeps_storage_cause() {
        let storage = AppError::from(SqlxError::PoolClosed);
        let error = AppError::operation_failed("delete_task", storage.clone());

        assert_eq!(error.code(), CHAIN_OPERATION_FAILED);
        assert_eq!(
            error.context().get("operation").map(String::as_str),
            Some("delete_task")
        );
        assert_eq!(error.cause(), Some(&storage));
        assert!(!error.is_domain());
    }

    #[test]
    fn domain_errors_are_not_found_or_rejected_links() {
        assert!(AppError::task_not_found(42).is_domain());
        assert!(AppError::unit_not_found(7).is_not_found());
        assert!(AppError::new(RELATIONSHIP_NOT_FOUND, "gone").is_domain());
        assert!(AppError::new(CHAIN_DELETED_TASK, "deleted").is_domain());
        assert!(!AppError::new("Sqlite/2067", "UNIQUE constraint failed").is_domain());
    }

    #[test]
    fn display_lists_context_sorted() {
        let error = AppError::new(CHAIN_CYCLE, "loop")
            .with_context("parent_id", "3")
            .with_context("child_id", "1");
        assert_eq!(error.to_string(), "[CHAIN/CYCLE] loop (child_id=1, parent_id=3)");
        assert_eq!(AppError::new("X/Y", "plain").to_string(), "[X/Y] plain");
    }

    #[test]
    fn sqlx_row_not_found_translates_to_specific_code() {
        let app_error = AppError::from(SqlxError::RowNotFound);
        assert_eq!(app_error.code(), "SQLX/ROW_NOT_FOUND");
        assert_eq!(app_error.message, "Record not found");
    }

    #[test]
    fn sqlx_io_keeps_os_code() {
        let app_error = AppError::from(SqlxError::Io(IoError::from_raw_os_error(2)));
        assert_eq!(app_error.code(), "IO/NotFound");
        assert_eq!(app_error.context().get("os_code"), Some(&"2".to_string()));
        assert_eq!(app_error.context().get("source").map(String::as_str), Some("sqlx"));
    }

    #[test]
    fn json_shape_is_flat_struct() {
        let error = AppError::new(CHAIN_CROSS_UNIT, "nope").with_context("unit_id", "1");
        let value = serde_json::to_value(&error).expect("serialize app error");
        assert_eq!(value["code"], "CHAIN/CROSS_UNIT");
        assert_eq!(value["message"], "nope");
        assert_eq!(value["context"]["unit_id"], "1");
        assert!(value.get("cause").is_none());
    }
}
