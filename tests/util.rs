#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::NaiveDate;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use taskchain_lib::{migrate, repo, NewTask, Task, TaskStatus};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

/// In-memory pool with the full schema applied.
pub async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

pub async fn unit(pool: &SqlitePool, name: &str) -> i64 {
    repo::create_unit(pool, name).await.expect("create unit").id
}

pub async fn task(pool: &SqlitePool, unit_id: i64, title: &str, created: &str) -> Task {
    repo::create_task(
        pool,
        &NewTask {
            unit_id,
            title: title.to_string(),
            description: None,
            created_date: date(created),
            status: TaskStatus::Pending,
        },
    )
    .await
    .expect("create task")
}

/// Inserts a task with a fixed id and timestamp so ordering is deterministic.
pub async fn task_with_id(
    pool: &SqlitePool,
    id: i64,
    unit_id: i64,
    created: &str,
    created_at: i64,
) -> i64 {
    sqlx::query(
        "INSERT INTO tasks (id, unit_id, title, status, created_date, created_at, updated_at, is_deleted)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5, 0)",
    )
    .bind(id)
    .bind(unit_id)
    .bind(format!("task {id}"))
    .bind(date(created))
    .bind(created_at)
    .execute(pool)
    .await
    .expect("insert task");
    id
}

/// Writes an edge row directly, skipping every engine rule.
pub async fn raw_edge(pool: &SqlitePool, parent: i64, child: i64, state: i64) {
    sqlx::query(
        "INSERT OR IGNORE INTO task_relationships
             (parent_task_id, child_task_id, relationship_type, is_deleted, created_at)
         VALUES (?1, ?2, 'related', ?3, 0)",
    )
    .bind(parent)
    .bind(child)
    .bind(state)
    .execute(pool)
    .await
    .expect("insert edge");
}

pub async fn edge_states(pool: &SqlitePool, parent: i64, child: i64) -> Vec<i64> {
    sqlx::query_scalar(
        "SELECT is_deleted FROM task_relationships
          WHERE parent_task_id = ?1 AND child_task_id = ?2
          ORDER BY id",
    )
    .bind(parent)
    .bind(child)
    .fetch_all(pool)
    .await
    .expect("edge states")
}

pub async fn active_edges(pool: &SqlitePool) -> Vec<(i64, i64)> {
    sqlx::query_as(
        "SELECT parent_task_id, child_task_id FROM task_relationships
          WHERE is_deleted = 0
          ORDER BY parent_task_id, child_task_id",
    )
    .fetch_all(pool)
    .await
    .expect("active edges")
}

pub fn ids(tasks: &[Task]) -> Vec<i64> {
    tasks.iter().map(|task| task.id).collect()
}
