//! Chain maintenance for maintenance tasks.
//!
//! A chain is the path of tasks of one unit joined by active
//! `task_relationships` rows. Every public operation here takes the pool,
//! runs in a single transaction (mutations) or on a single connection
//! (reads), and surfaces storage failures as `CHAIN/OPERATION_FAILED`.

use std::time::Instant;

use futures::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{db::with_tx, AppError, AppResult};

pub mod mutate;
pub mod restore;
pub mod summary;
pub mod sync;
pub mod traversal;

pub use mutate::{
    add_task_relationship, delete_task, mark_relationship_manually_removed,
    permanent_delete_task, remove_task_from_chain, BypassEdge, LinkOutcome, SkipReason,
    UnlinkOutcome,
};
pub use restore::{restore_task, RestoreOutcome};
pub use summary::{chain_summary, unit_chains};
pub use sync::{is_chain_locked, update_task, SyncOutcome};
pub use traversal::{get_full_task_chain, get_related_tasks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChainOp {
    RelatedTasks,
    FullChain,
    Summary,
    UnitChains,
    AddRelationship,
    DeleteTask,
    RemoveFromChain,
    MarkManuallyRemoved,
    RestoreTask,
    PermanentDelete,
    UpdateTask,
    ChainLocked,
}

impl ChainOp {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ChainOp::RelatedTasks => "get_related_tasks",
            ChainOp::FullChain => "get_full_task_chain",
            ChainOp::Summary => "chain_summary",
            ChainOp::UnitChains => "unit_chains",
            ChainOp::AddRelationship => "add_task_relationship",
            ChainOp::DeleteTask => "delete_task",
            ChainOp::RemoveFromChain => "remove_task_from_chain",
            ChainOp::MarkManuallyRemoved => "mark_relationship_manually_removed",
            ChainOp::RestoreTask => "restore_task",
            ChainOp::PermanentDelete => "permanent_delete_task",
            ChainOp::UpdateTask => "update_task",
            ChainOp::ChainLocked => "is_chain_locked",
        }
    }
}

/// Domain errors reach the caller unchanged; everything else becomes a generic failure.
fn surface(op: ChainOp, err: AppError) -> AppError {
    if err.is_domain() {
        err
    } else {
        AppError::operation_failed(op.as_str(), err)
    }
}

fn finish<T>(op: ChainOp, started: Instant, result: AppResult<T>) -> AppResult<T> {
    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(value) => {
            tracing::debug!(
                target: "taskchain",
                event = "chain_op",
                operation = op.as_str(),
                duration_ms
            );
            Ok(value)
        }
        Err(err) => {
            let err = surface(op, err);
            tracing::warn!(
                target: "taskchain",
                event = "chain_op_failed",
                operation = op.as_str(),
                duration_ms,
                code = err.code(),
                error = %err
            );
            Err(err)
        }
    }
}

/// Runs a mutation in one transaction.
pub(crate) async fn in_tx<T, F>(pool: &SqlitePool, op: ChainOp, f: F) -> AppResult<T>
where
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, AppResult<T>>,
{
    let started = Instant::now();
    let result = with_tx(pool, f).await;
    finish(op, started, result)
}

/// Runs a read on one pooled connection.
pub(crate) async fn with_conn<T, F>(pool: &SqlitePool, op: ChainOp, f: F) -> AppResult<T>
where
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, AppResult<T>>,
{
    let started = Instant::now();
    let result = match pool.acquire().await {
        Ok(mut conn) => f(&mut *conn).await,
        Err(err) => Err(AppError::from(err)),
    };
    finish(op, started, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CHAIN_CYCLE, CHAIN_OPERATION_FAILED, TASK_NOT_FOUND};

    #[test]
    fn surface_passes_domain_errors_through() {
        let not_found = AppError::task_not_found(9);
        assert_eq!(surface(ChainOp::DeleteTask, not_found.clone()), not_found);

        let cycle = AppError::new(CHAIN_CYCLE, "cycle");
        assert_eq!(surface(ChainOp::AddRelationship, cycle.clone()), cycle);
    }

    #[test]
    fn surface_wraps_storage_errors() {
        let storage = AppError::from(sqlx::Error::PoolTimedOut);
        let wrapped = surface(ChainOp::RestoreTask, storage.clone());
        assert_eq!(wrapped.code(), CHAIN_OPERATION_FAILED);
        assert_eq!(
            wrapped.context().get("operation").map(String::as_str),
            Some("restore_task")
        );
        assert_eq!(wrapped.cause(), Some(&storage));
        assert_ne!(wrapped.code(), TASK_NOT_FOUND);
    }
}
