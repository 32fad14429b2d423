use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use super::{in_tx, traversal, ChainOp};
use crate::{
    error::{
        CHAIN_CROSS_UNIT, CHAIN_CYCLE, CHAIN_DELETED_TASK, CHAIN_SELF_LINK, RELATIONSHIP_NOT_FOUND,
    },
    model::DEFAULT_RELATIONSHIP_TYPE,
    relationships::{self, Direction},
    repo, AppError, AppResult,
};

/// Result of [`add_task_relationship`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkOutcome {
    /// `parent → child` was created.
    Linked,
    /// The child was older than the parent's previous child and now sits between them.
    InsertedBetween { displaced_child_id: i64 },
    /// The edge was already active.
    AlreadyLinked,
    /// Nothing was written.
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SkipReason {
    /// The parent already has a child that is not newer than the requested one.
    ChildNotOlderThanExisting { existing_child_id: i64 },
    /// The child already follows another task.
    ChildHasParent { existing_parent_id: i64 },
    /// A mid-chain insert would give the child a second successor.
    ChildHasChild { existing_child_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassEdge {
    pub parent_id: i64,
    pub child_id: i64,
}

/// Result of the operations that take a task out of its chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkOutcome {
    /// Edge joining the task's former neighbours, when it had exactly one of each.
    pub bypass: Option<BypassEdge>,
    /// Edge rows whose state changed or that were removed.
    pub edges_affected: u64,
}

pub(crate) async fn add_relationship_in(
    conn: &mut SqliteConnection,
    parent_id: i64,
    child_id: i64,
    relationship_type: &str,
) -> AppResult<LinkOutcome> {
    if parent_id == child_id {
        return Err(
            AppError::new(CHAIN_SELF_LINK, "A task cannot follow itself")
                .with_context("task_id", parent_id.to_string()),
        );
    }
    let parent = repo::require_task(&mut *conn, parent_id).await?;
    let child = repo::require_task(&mut *conn, child_id).await?;
    if let Some(deleted) = [&parent, &child].into_iter().find(|task| task.is_deleted) {
        return Err(
            AppError::new(CHAIN_DELETED_TASK, "Deleted tasks cannot be linked; restore them first")
                .with_context("task_id", deleted.id.to_string())
                .with_context("parent_id", parent_id.to_string())
                .with_context("child_id", child_id.to_string()),
        );
    }
    if parent.unit_id != child.unit_id {
        return Err(AppError::new(
            CHAIN_CROSS_UNIT,
            "Tasks belong to different units",
        )
        .with_context("parent_id", parent_id.to_string())
        .with_context("child_id", child_id.to_string())
        .with_context("parent_unit_id", parent.unit_id.to_string())
        .with_context("child_unit_id", child.unit_id.to_string()));
    }
    let ancestors = traversal::reachable_ids(&mut *conn, parent_id, Direction::Parent).await?;
    if ancestors.contains(&child_id) {
        return Err(
            AppError::new(CHAIN_CYCLE, "The child already precedes the parent in its chain")
                .with_context("parent_id", parent_id.to_string())
                .with_context("child_id", child_id.to_string()),
        );
    }

    // Re-linking supersedes an earlier manual unlink.
    let purged = relationships::purge_manual_markers_touching(&mut *conn, child_id).await?;
    if purged > 0 {
        tracing::debug!(target: "taskchain", event = "manual_markers_purged", task_id = child_id, purged);
    }

    let child_related = relationships::related_tasks(&mut *conn, child_id).await?;
    if child_related.parents.iter().any(|p| p.id == parent_id) {
        return Ok(LinkOutcome::AlreadyLinked);
    }
    if let Some(existing) = child_related.parents.first() {
        tracing::warn!(
            target: "taskchain",
            event = "chain_link_skipped",
            parent_id,
            child_id,
            existing_parent_id = existing.id
        );
        return Ok(LinkOutcome::Skipped {
            reason: SkipReason::ChildHasParent {
                existing_parent_id: existing.id,
            },
        });
    }

    let parent_children = relationships::neighbours(&mut *conn, parent_id, Direction::Child).await?;
    let Some(old_child) = parent_children.first() else {
        relationships::add_edge(&mut *conn, parent_id, child_id, relationship_type).await?;
        tracing::info!(target: "taskchain", event = "chain_link", parent_id, child_id);
        return Ok(LinkOutcome::Linked);
    };

    // Only a strictly older child displaces the current one; ids do not break ties here.
    if (child.created_date, child.created_at) >= (old_child.created_date, old_child.created_at) {
        tracing::warn!(
            target: "taskchain",
            event = "chain_link_skipped",
            parent_id,
            child_id,
            existing_child_id = old_child.id
        );
        return Ok(LinkOutcome::Skipped {
            reason: SkipReason::ChildNotOlderThanExisting {
                existing_child_id: old_child.id,
            },
        });
    }
    if let Some(grandchild) = child_related.children.first() {
        return Ok(LinkOutcome::Skipped {
            reason: SkipReason::ChildHasChild {
                existing_child_id: grandchild.id,
            },
        });
    }

    relationships::hard_delete_edge(&mut *conn, parent_id, old_child.id).await?;
    relationships::add_edge(&mut *conn, parent_id, child_id, relationship_type).await?;
    relationships::add_edge(&mut *conn, child_id, old_child.id, relationship_type).await?;
    tracing::info!(
        target: "taskchain",
        event = "chain_insert_between",
        parent_id,
        child_id,
        displaced_child_id = old_child.id
    );
    Ok(LinkOutcome::InsertedBetween {
        displaced_child_id: old_child.id,
    })
}

/// Joins the task's single parent to its single child, if it has exactly one of each.
async fn create_bypass(conn: &mut SqliteConnection, task_id: i64) -> AppResult<Option<BypassEdge>> {
    let related = relationships::related_tasks(&mut *conn, task_id).await?;
    let Some((parent, child)) = related.bypass_pair() else {
        return Ok(None);
    };
    let bypass = BypassEdge {
        parent_id: parent.id,
        child_id: child.id,
    };
    relationships::add_edge(&mut *conn, bypass.parent_id, bypass.child_id, DEFAULT_RELATIONSHIP_TYPE)
        .await?;
    tracing::info!(
        target: "taskchain",
        event = "chain_bypass",
        task_id,
        parent_id = bypass.parent_id,
        child_id = bypass.child_id
    );
    Ok(Some(bypass))
}

pub(crate) async fn delete_task_in(conn: &mut SqliteConnection, task_id: i64) -> AppResult<UnlinkOutcome> {
    repo::require_task(&mut *conn, task_id).await?;
    let bypass = create_bypass(&mut *conn, task_id).await?;
    repo::set_task_deleted(&mut *conn, task_id, true).await?;
    let edges_affected = relationships::soft_delete_edges_touching(&mut *conn, task_id).await?;
    Ok(UnlinkOutcome {
        bypass,
        edges_affected,
    })
}

pub(crate) async fn remove_from_chain_in(
    conn: &mut SqliteConnection,
    task_id: i64,
) -> AppResult<UnlinkOutcome> {
    repo::require_task(&mut *conn, task_id).await?;
    let bypass = create_bypass(&mut *conn, task_id).await?;
    let edges_affected =
        relationships::mark_edges_touching_manually_removed(&mut *conn, task_id).await?;
    Ok(UnlinkOutcome {
        bypass,
        edges_affected,
    })
}

pub(crate) async fn permanent_delete_in(
    conn: &mut SqliteConnection,
    task_id: i64,
) -> AppResult<UnlinkOutcome> {
    repo::require_task(&mut *conn, task_id).await?;
    let parent_id = relationships::first_neighbour_id(
        &mut *conn,
        task_id,
        Direction::Parent,
        DEFAULT_RELATIONSHIP_TYPE,
    )
    .await?;
    let child_id = relationships::first_neighbour_id(
        &mut *conn,
        task_id,
        Direction::Child,
        DEFAULT_RELATIONSHIP_TYPE,
    )
    .await?;

    let bypass = match (parent_id, child_id) {
        (Some(parent_id), Some(child_id)) => {
            relationships::add_edge(&mut *conn, parent_id, child_id, DEFAULT_RELATIONSHIP_TYPE)
                .await?;
            Some(BypassEdge {
                parent_id,
                child_id,
            })
        }
        _ => None,
    };
    let edges_affected = relationships::hard_delete_edges_touching(&mut *conn, task_id).await?;
    repo::delete_task_row(&mut *conn, task_id).await?;
    tracing::info!(
        target: "taskchain",
        event = "task_purged",
        task_id,
        edges_removed = edges_affected,
        bypassed = bypass.is_some()
    );
    Ok(UnlinkOutcome {
        bypass,
        edges_affected,
    })
}

/// Links `parent_id → child_id`, inserting mid-chain when the child is older
/// than the parent's current child.
pub async fn add_task_relationship(
    pool: &SqlitePool,
    parent_id: i64,
    child_id: i64,
    relationship_type: Option<&str>,
) -> AppResult<LinkOutcome> {
    let relationship_type = relationship_type
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_RELATIONSHIP_TYPE)
        .to_string();
    in_tx(pool, ChainOp::AddRelationship, move |conn| {
        async move { add_relationship_in(conn, parent_id, child_id, &relationship_type).await }
            .boxed()
    })
    .await
}

/// Soft-deletes the task, bridging its neighbours so the chain stays connected.
pub async fn delete_task(pool: &SqlitePool, task_id: i64) -> AppResult<UnlinkOutcome> {
    in_tx(pool, ChainOp::DeleteTask, move |conn| {
        delete_task_in(conn, task_id).boxed()
    })
    .await
}

/// Takes the task out of its chain without deleting it. A later restore will not re-link it.
pub async fn remove_task_from_chain(pool: &SqlitePool, task_id: i64) -> AppResult<UnlinkOutcome> {
    in_tx(pool, ChainOp::RemoveFromChain, move |conn| {
        remove_from_chain_in(conn, task_id).boxed()
    })
    .await
}

pub async fn mark_relationship_manually_removed(
    pool: &SqlitePool,
    parent_id: i64,
    child_id: i64,
) -> AppResult<u64> {
    in_tx(pool, ChainOp::MarkManuallyRemoved, move |conn| {
        async move {
            let touched = relationships::mark_manually_removed(conn, parent_id, child_id).await?;
            if touched == 0 {
                return Err(AppError::new(RELATIONSHIP_NOT_FOUND, "Relationship not found")
                    .with_context("parent_id", parent_id.to_string())
                    .with_context("child_id", child_id.to_string()));
            }
            Ok(touched)
        }
        .boxed()
    })
    .await
}

/// Removes the task row for good, bridging its `related` neighbours first.
pub async fn permanent_delete_task(pool: &SqlitePool, task_id: i64) -> AppResult<UnlinkOutcome> {
    in_tx(pool, ChainOp::PermanentDelete, move |conn| {
        permanent_delete_in(conn, task_id).boxed()
    })
    .await
}
