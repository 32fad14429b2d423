use chrono::NaiveDate;
use futures::FutureExt;
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::{
    db::with_tx,
    model::{NewTask, Task, TaskStatus, TaskUpdate, Unit},
    time::now_ms,
    AppError, AppResult,
};

pub(crate) const TASK_COLUMNS: &str = "id, unit_id, title, description, status, created_date, \
     completed_date, created_at, updated_at, is_deleted";

pub async fn create_unit<'e, E>(executor: E, name: &str) -> AppResult<Unit>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Unit>(
        "INSERT INTO units (name, created_at) VALUES (?1, ?2) RETURNING id, name, created_at",
    )
    .bind(name)
    .bind(now_ms())
    .fetch_one(executor)
    .await
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "units_create")
            .with_context("name", name.to_string())
    })
}

pub async fn get_unit<'e, E>(executor: E, unit_id: i64) -> AppResult<Option<Unit>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Unit>("SELECT id, name, created_at FROM units WHERE id = ?1")
        .bind(unit_id)
        .fetch_optional(executor)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "units_get")
                .with_context("unit_id", unit_id.to_string())
        })
}

pub async fn create_task(pool: &SqlitePool, new_task: &NewTask) -> AppResult<Task> {
    let new_task = new_task.clone();
    with_tx(pool, move |conn| {
        async move {
            if get_unit(&mut *conn, new_task.unit_id).await?.is_none() {
                return Err(AppError::unit_not_found(new_task.unit_id));
            }
            let now = now_ms();
            let sql = format!(
                "INSERT INTO tasks (unit_id, title, description, status, created_date, created_at, updated_at, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0)
                 RETURNING {TASK_COLUMNS}"
            );
            let task = sqlx::query_as::<_, Task>(&sql)
                .bind(new_task.unit_id)
                .bind(&new_task.title)
                .bind(new_task.description.as_deref())
                .bind(new_task.status)
                .bind(new_task.created_date)
                .bind(now)
                .fetch_one(&mut *conn)
                .await
                .map_err(|err| {
                    AppError::from(err)
                        .with_context("operation", "tasks_create")
                        .with_context("unit_id", new_task.unit_id.to_string())
                })?;
            tracing::debug!(
                target: "taskchain",
                event = "task_created",
                task_id = task.id,
                unit_id = task.unit_id,
                created_date = %task.created_date
            );
            Ok(task)
        }
        .boxed()
    })
    .await
}

pub async fn get_task<'e, E>(executor: E, task_id: i64) -> AppResult<Option<Task>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    sqlx::query_as::<_, Task>(&sql)
        .bind(task_id)
        .fetch_optional(executor)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "tasks_get")
                .with_context("task_id", task_id.to_string())
        })
}

/// Like [`get_task`] but a missing row is a `TASK/NOT_FOUND` error.
pub async fn require_task<'e, E>(executor: E, task_id: i64) -> AppResult<Task>
where
    E: Executor<'e, Database = Sqlite>,
{
    get_task(executor, task_id)
        .await?
        .ok_or_else(|| AppError::task_not_found(task_id))
}

/// Tasks of a unit in chronological order.
pub async fn list_tasks<'e, E>(
    executor: E,
    unit_id: i64,
    include_deleted: bool,
) -> AppResult<Vec<Task>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE unit_id = ?1");
    if !include_deleted {
        sql.push_str(" AND is_deleted = 0");
    }
    sql.push_str(" ORDER BY created_date, created_at, id");
    sqlx::query_as::<_, Task>(&sql)
        .bind(unit_id)
        .fetch_all(executor)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "tasks_list")
                .with_context("unit_id", unit_id.to_string())
        })
}

pub async fn update_task_fields<'e, E>(
    executor: E,
    task_id: i64,
    update: &TaskUpdate,
) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "UPDATE tasks
            SET status = ?1,
                completed_date = ?2,
                title = COALESCE(?3, title),
                description = COALESCE(?4, description),
                updated_at = ?5
          WHERE id = ?6",
    )
    .bind(update.status)
    .bind(update.completed_date)
    .bind(update.title.as_deref())
    .bind(update.description.as_deref())
    .bind(now_ms())
    .bind(task_id)
    .execute(executor)
    .await
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "tasks_update")
            .with_context("task_id", task_id.to_string())
    })?;
    if res.rows_affected() == 0 {
        return Err(AppError::task_not_found(task_id));
    }
    Ok(())
}

/// Writes only the status pair; used when propagating an edit along a chain.
pub async fn set_task_status<'e, E>(
    executor: E,
    task_id: i64,
    status: TaskStatus,
    completed_date: Option<NaiveDate>,
) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query(
        "UPDATE tasks SET status = ?1, completed_date = ?2, updated_at = ?3 WHERE id = ?4",
    )
    .bind(status)
    .bind(completed_date)
    .bind(now_ms())
    .bind(task_id)
    .execute(executor)
    .await
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "tasks_set_status")
            .with_context("task_id", task_id.to_string())
    })?;
    if res.rows_affected() == 0 {
        return Err(AppError::task_not_found(task_id));
    }
    Ok(())
}

pub async fn set_task_deleted<'e, E>(executor: E, task_id: i64, deleted: bool) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query("UPDATE tasks SET is_deleted = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(deleted)
        .bind(now_ms())
        .bind(task_id)
        .execute(executor)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "tasks_set_deleted")
                .with_context("task_id", task_id.to_string())
        })?;
    if res.rows_affected() == 0 {
        return Err(AppError::task_not_found(task_id));
    }
    Ok(())
}

/// Irreversibly removes the task row.
pub async fn delete_task_row<'e, E>(executor: E, task_id: i64) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query("DELETE FROM tasks WHERE id = ?1")
        .bind(task_id)
        .execute(executor)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "tasks_delete_row")
                .with_context("task_id", task_id.to_string())
        })?;
    if res.rows_affected() == 0 {
        return Err(AppError::task_not_found(task_id));
    }
    Ok(())
}
