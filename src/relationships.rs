//! Storage for chain edges and their tri-state deletion marker.
//!
//! Every function borrows an executor so callers can run several of them in
//! one transaction. Only `is_deleted = 0` rows take part in chains; the other
//! rows are kept either as an audit trail (`1`) or as a "do not re-link"
//! marker (`2`) until the engine consumes them.

use sqlx::{Executor, Sqlite, SqliteConnection};

use crate::{
    model::{RelatedTasks, Relationship, RelationshipState, Task},
    repo::TASK_COLUMNS,
    time::now_ms,
    AppError, AppResult,
};

const EDGE_COLUMNS: &str =
    "id, parent_task_id, child_task_id, relationship_type, is_deleted, created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Parent,
    Child,
}

fn task_columns(alias: &str) -> String {
    TASK_COLUMNS
        .split(',')
        .map(|col| format!("{alias}.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn edge_error(err: sqlx::Error, operation: &'static str, task_id: i64) -> AppError {
    AppError::from(err)
        .with_context("operation", operation)
        .with_context("task_id", task_id.to_string())
}

fn pair_error(err: sqlx::Error, operation: &'static str, parent_id: i64, child_id: i64) -> AppError {
    AppError::from(err)
        .with_context("operation", operation)
        .with_context("parent_id", parent_id.to_string())
        .with_context("child_id", child_id.to_string())
}

/// Tasks joined to `task_id` over active edges, each side in chronological order.
pub async fn related_tasks(conn: &mut SqliteConnection, task_id: i64) -> AppResult<RelatedTasks> {
    let parents = neighbours(&mut *conn, task_id, Direction::Parent).await?;
    let children = neighbours(&mut *conn, task_id, Direction::Child).await?;
    Ok(RelatedTasks { parents, children })
}

/// Active neighbours of `task_id` on one side.
pub async fn neighbours<'e, E>(
    executor: E,
    task_id: i64,
    direction: Direction,
) -> AppResult<Vec<Task>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (join_col, match_col) = match direction {
        Direction::Parent => ("parent_task_id", "child_task_id"),
        Direction::Child => ("child_task_id", "parent_task_id"),
    };
    let sql = format!(
        "SELECT {cols}
           FROM task_relationships r
           JOIN tasks t ON t.id = r.{join_col}
          WHERE r.{match_col} = ?1
            AND r.is_deleted = 0
          ORDER BY t.created_date, t.created_at, t.id",
        cols = task_columns("t"),
    );
    sqlx::query_as::<_, Task>(&sql)
        .bind(task_id)
        .fetch_all(executor)
        .await
        .map_err(|err| edge_error(err, "relationships_neighbours", task_id))
}

/// Creates an active edge. Returns `false` when the active edge already existed.
pub async fn add_edge<'e, E>(
    executor: E,
    parent_id: i64,
    child_id: i64,
    relationship_type: &str,
) -> AppResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    // The partial unique index on active pairs turns duplicates into no-ops.
    let res = sqlx::query(
        "INSERT OR IGNORE INTO task_relationships
             (parent_task_id, child_task_id, relationship_type, is_deleted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(parent_id)
    .bind(child_id)
    .bind(relationship_type)
    .bind(RelationshipState::Active)
    .bind(now_ms())
    .execute(executor)
    .await
    .map_err(|err| pair_error(err, "relationships_add", parent_id, child_id))?;

    let inserted = res.rows_affected() > 0;
    tracing::debug!(
        target: "taskchain",
        event = "edge_added",
        parent_id,
        child_id,
        relationship_type,
        inserted
    );
    Ok(inserted)
}

/// Flags every row of the pair as manually removed. Returns the number of rows touched.
pub async fn mark_manually_removed<'e, E>(executor: E, parent_id: i64, child_id: i64) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "UPDATE task_relationships SET is_deleted = ?3
          WHERE parent_task_id = ?1 AND child_task_id = ?2",
    )
    .bind(parent_id)
    .bind(child_id)
    .bind(RelationshipState::ManuallyRemoved)
    .execute(executor)
    .await
    .map_err(|err| pair_error(err, "relationships_mark_manual", parent_id, child_id))?;
    Ok(res.rows_affected())
}

/// Active edges touching the task become `AutoRemoved`. Manual markers are left as they are.
pub async fn soft_delete_edges_touching<'e, E>(executor: E, task_id: i64) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "UPDATE task_relationships SET is_deleted = ?2
          WHERE (parent_task_id = ?1 OR child_task_id = ?1) AND is_deleted = ?3",
    )
    .bind(task_id)
    .bind(RelationshipState::AutoRemoved)
    .bind(RelationshipState::Active)
    .execute(executor)
    .await
    .map_err(|err| edge_error(err, "relationships_soft_delete_touching", task_id))?;
    Ok(res.rows_affected())
}

/// Every edge touching the task, in any state, becomes `ManuallyRemoved`.
pub async fn mark_edges_touching_manually_removed<'e, E>(executor: E, task_id: i64) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "UPDATE task_relationships SET is_deleted = ?2
          WHERE (parent_task_id = ?1 OR child_task_id = ?1) AND is_deleted <> ?2",
    )
    .bind(task_id)
    .bind(RelationshipState::ManuallyRemoved)
    .execute(executor)
    .await
    .map_err(|err| edge_error(err, "relationships_mark_manual_touching", task_id))?;
    Ok(res.rows_affected())
}

pub async fn has_manual_marker<'e, E>(executor: E, task_id: i64) -> AppResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM task_relationships
          WHERE (parent_task_id = ?1 OR child_task_id = ?1) AND is_deleted = ?2
          LIMIT 1",
    )
    .bind(task_id)
    .bind(RelationshipState::ManuallyRemoved)
    .fetch_optional(executor)
    .await
    .map_err(|err| edge_error(err, "relationships_has_manual", task_id))?;
    Ok(found.is_some())
}

pub async fn purge_manual_markers_touching<'e, E>(executor: E, task_id: i64) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "DELETE FROM task_relationships
          WHERE (parent_task_id = ?1 OR child_task_id = ?1) AND is_deleted = ?2",
    )
    .bind(task_id)
    .bind(RelationshipState::ManuallyRemoved)
    .execute(executor)
    .await
    .map_err(|err| edge_error(err, "relationships_purge_manual", task_id))?;
    Ok(res.rows_affected())
}

/// Removes the active row of the pair. Inactive history rows are kept.
pub async fn hard_delete_edge<'e, E>(executor: E, parent_id: i64, child_id: i64) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "DELETE FROM task_relationships
          WHERE parent_task_id = ?1 AND child_task_id = ?2 AND is_deleted = ?3",
    )
    .bind(parent_id)
    .bind(child_id)
    .bind(RelationshipState::Active)
    .execute(executor)
    .await
    .map_err(|err| pair_error(err, "relationships_hard_delete", parent_id, child_id))?;
    Ok(res.rows_affected())
}

pub async fn hard_delete_edges_touching<'e, E>(executor: E, task_id: i64) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "DELETE FROM task_relationships WHERE parent_task_id = ?1 OR child_task_id = ?1",
    )
    .bind(task_id)
    .execute(executor)
    .await
    .map_err(|err| edge_error(err, "relationships_hard_delete_touching", task_id))?;
    Ok(res.rows_affected())
}

/// First active neighbour id over a `relationship_type` edge.
pub async fn first_neighbour_id<'e, E>(
    executor: E,
    task_id: i64,
    direction: Direction,
    relationship_type: &str,
) -> AppResult<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = match direction {
        Direction::Parent => {
            "SELECT parent_task_id FROM task_relationships
              WHERE child_task_id = ?1 AND relationship_type = ?2 AND is_deleted = ?3
              ORDER BY id LIMIT 1"
        }
        Direction::Child => {
            "SELECT child_task_id FROM task_relationships
              WHERE parent_task_id = ?1 AND relationship_type = ?2 AND is_deleted = ?3
              ORDER BY id LIMIT 1"
        }
    };
    sqlx::query_scalar(sql)
        .bind(task_id)
        .bind(relationship_type)
        .bind(RelationshipState::Active)
        .fetch_optional(executor)
        .await
        .map_err(|err| edge_error(err, "relationships_first_neighbour", task_id))
}

/// All rows touching the task in insertion order, whatever their state.
pub async fn list_edges_touching<'e, E>(executor: E, task_id: i64) -> AppResult<Vec<Relationship>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {EDGE_COLUMNS} FROM task_relationships
          WHERE parent_task_id = ?1 OR child_task_id = ?1
          ORDER BY id"
    );
    sqlx::query_as::<_, Relationship>(&sql)
        .bind(task_id)
        .fetch_all(executor)
        .await
        .map_err(|err| edge_error(err, "relationships_list_touching", task_id))
}
