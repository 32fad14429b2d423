use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use super::{in_tx, traversal, with_conn, ChainOp};
use crate::{
    model::{Task, TaskUpdate},
    relationships::{self, Direction},
    repo, AppResult,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Other chain members whose status was overwritten, in chain order.
    pub propagated_to: Vec<i64>,
}

/// Members that must follow an edit of `task_id`, or nothing when it is not the chain's tail.
fn propagation_targets(task_id: i64, chain: &[Task]) -> Vec<i64> {
    match chain.last() {
        Some(last) if last.id == task_id && chain.len() > 1 => chain
            .iter()
            .filter(|member| member.id != task_id)
            .map(|member| member.id)
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) async fn update_task_in(
    conn: &mut SqliteConnection,
    task_id: i64,
    update: &TaskUpdate,
) -> AppResult<SyncOutcome> {
    let before = repo::require_task(&mut *conn, task_id).await?;
    repo::update_task_fields(&mut *conn, task_id, update).await?;

    let status_changed =
        before.status != update.status || before.completed_date != update.completed_date;
    if !status_changed {
        return Ok(SyncOutcome::default());
    }

    let chain = traversal::full_chain(&mut *conn, task_id).await?;
    let propagated_to = propagation_targets(task_id, &chain);
    for member in &propagated_to {
        repo::set_task_status(&mut *conn, *member, update.status, update.completed_date).await?;
    }
    if !propagated_to.is_empty() {
        tracing::info!(
            target: "taskchain",
            event = "chain_status_synced",
            task_id,
            status = %update.status,
            members = propagated_to.len()
        );
    }
    Ok(SyncOutcome { propagated_to })
}

/// Edits a task. When it is the last task of its chain, the new status and
/// completion date are copied to every other member in the same transaction.
pub async fn update_task(
    pool: &SqlitePool,
    task_id: i64,
    update: &TaskUpdate,
) -> AppResult<SyncOutcome> {
    let update = update.clone();
    in_tx(pool, ChainOp::UpdateTask, move |conn| {
        async move { update_task_in(conn, task_id, &update).await }.boxed()
    })
    .await
}

/// A task with a successor is read-only from the caller's point of view.
pub async fn is_chain_locked(pool: &SqlitePool, task_id: i64) -> AppResult<bool> {
    with_conn(pool, ChainOp::ChainLocked, move |conn| {
        async move {
            repo::require_task(&mut *conn, task_id).await?;
            let children = relationships::neighbours(&mut *conn, task_id, Direction::Child).await?;
            Ok(!children.is_empty())
        }
        .boxed()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use chrono::NaiveDate;

    fn task(id: i64) -> Task {
        Task {
            id,
            unit_id: 1,
            title: format!("task {id}"),
            description: None,
            status: TaskStatus::Pending,
            created_date: NaiveDate::from_ymd_opt(2024, 3, id as u32).unwrap(),
            completed_date: None,
            created_at: 0,
            updated_at: 0,
            is_deleted: false,
        }
    }

    #[test]
    fn tail_propagates_to_the_rest() {
        let chain = vec![task(1), task(2), task(3)];
        assert_eq!(propagation_targets(3, &chain), vec![1, 2]);
    }

    #[test]
    fn middle_and_head_do_not_propagate() {
        let chain = vec![task(1), task(2), task(3)];
        assert!(propagation_targets(1, &chain).is_empty());
        assert!(propagation_targets(2, &chain).is_empty());
    }

    #[test]
    fn lone_task_does_not_propagate() {
        assert!(propagation_targets(7, &[task(7)]).is_empty());
        assert!(propagation_targets(7, &[]).is_empty());
    }
}
