use std::collections::HashSet;

use futures::FutureExt;
use sqlx::SqlitePool;

use super::{traversal, with_conn, ChainOp};
use crate::{
    model::{ChainSummary, Task},
    repo, AppError, AppResult,
};

pub(crate) fn summarize(task_id: i64, chain: Vec<Task>) -> ChainSummary {
    let chain_length = chain.len();
    let position = chain
        .iter()
        .position(|task| task.id == task_id)
        .map_or(0, |idx| idx + 1);
    ChainSummary {
        chain_length,
        position,
        has_parents: position > 1,
        has_children: position > 0 && position < chain_length,
        chain,
    }
}

pub async fn chain_summary(pool: &SqlitePool, task_id: i64) -> AppResult<ChainSummary> {
    with_conn(pool, ChainOp::Summary, move |conn| {
        async move {
            let chain = traversal::full_chain(conn, task_id).await?;
            Ok(summarize(task_id, chain))
        }
        .boxed()
    })
    .await
}

/// Every chain of two or more active tasks in the unit, ordered by the head task.
pub async fn unit_chains(pool: &SqlitePool, unit_id: i64) -> AppResult<Vec<Vec<Task>>> {
    with_conn(pool, ChainOp::UnitChains, move |conn| {
        async move {
            if repo::get_unit(&mut *conn, unit_id).await?.is_none() {
                return Err(AppError::unit_not_found(unit_id));
            }
            let tasks = repo::list_tasks(&mut *conn, unit_id, false).await?;
            let mut seen: HashSet<i64> = HashSet::new();
            let mut chains = Vec::new();
            for task in &tasks {
                if seen.contains(&task.id) {
                    continue;
                }
                let chain = traversal::full_chain(&mut *conn, task.id).await?;
                seen.extend(chain.iter().map(|member| member.id));
                if chain.len() > 1 {
                    chains.push(chain);
                }
            }
            chains.sort_by_key(|chain| chain.first().map(Task::chrono_key));
            Ok(chains)
        }
        .boxed()
    })
    .await
}
