use std::collections::{HashSet, VecDeque};

use futures::FutureExt;
use sqlx::{SqliteConnection, SqlitePool};

use super::{with_conn, ChainOp};
use crate::{
    model::{RelatedTasks, Task},
    relationships::{self, Direction},
    repo, AppResult,
};

/// Ids reachable from `task_id` by following active edges in `direction`.
///
/// Walks with a visited set, so stored cycles end the walk instead of looping.
pub async fn reachable_ids(
    conn: &mut SqliteConnection,
    task_id: i64,
    direction: Direction,
) -> AppResult<HashSet<i64>> {
    let mut visited = HashSet::new();
    let mut found = HashSet::new();
    let mut pending = vec![task_id];
    while let Some(current) = pending.pop() {
        if !visited.insert(current) {
            continue;
        }
        for next in relationships::neighbours(&mut *conn, current, direction).await? {
            if next.id != task_id && found.insert(next.id) {
                pending.push(next.id);
            }
        }
    }
    Ok(found)
}

/// The ordered chain containing `task_id`: ancestors, the task, then descendants.
pub async fn full_chain(conn: &mut SqliteConnection, task_id: i64) -> AppResult<Vec<Task>> {
    let task = repo::require_task(&mut *conn, task_id).await?;
    let mut present: HashSet<i64> = HashSet::from([task.id]);

    let mut ancestors: VecDeque<Task> = VecDeque::new();
    let mut visited = HashSet::new();
    let mut pending = vec![task.id];
    while let Some(current) = pending.pop() {
        if !visited.insert(current) {
            continue;
        }
        for parent in relationships::neighbours(&mut *conn, current, Direction::Parent).await? {
            if present.insert(parent.id) {
                pending.push(parent.id);
                ancestors.push_front(parent);
            }
        }
    }

    let mut descendants: Vec<Task> = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![task.id];
    while let Some(current) = pending.pop() {
        if !visited.insert(current) {
            continue;
        }
        for child in relationships::neighbours(&mut *conn, current, Direction::Child).await? {
            if present.insert(child.id) {
                pending.push(child.id);
                descendants.push(child);
            }
        }
    }

    let mut chain: Vec<Task> = ancestors.into();
    chain.push(task);
    chain.extend(descendants);
    Ok(chain)
}

pub async fn get_related_tasks(pool: &SqlitePool, task_id: i64) -> AppResult<RelatedTasks> {
    with_conn(pool, ChainOp::RelatedTasks, move |conn| {
        async move {
            repo::require_task(&mut *conn, task_id).await?;
            relationships::related_tasks(conn, task_id).await
        }
        .boxed()
    })
    .await
}

pub async fn get_full_task_chain(pool: &SqlitePool, task_id: i64) -> AppResult<Vec<Task>> {
    with_conn(pool, ChainOp::FullChain, move |conn| {
        full_chain(conn, task_id).boxed()
    })
    .await
}
