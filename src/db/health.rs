use std::collections::{HashMap, HashSet};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{pool::PoolConnection, Row, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChainHealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealthCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainHealthOffender {
    pub table: String,
    pub rowid: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealthReport {
    pub status: ChainHealthStatus,
    pub checks: Vec<ChainHealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offenders: Vec<ChainHealthOffender>,
    pub schema_hash: String,
    pub app_version: String,
    pub generated_at: String,
}

struct CheckResult {
    check: ChainHealthCheck,
    offenders: Vec<ChainHealthOffender>,
}

/// Offender queries must select `rowid` and `message`.
const CHAIN_QUERIES: &[(&str, &str, &str)] = &[
    (
        "single_parent",
        "tasks",
        "SELECT child_task_id AS rowid,
                'task has ' || COUNT(*) || ' active parents' AS message
           FROM task_relationships
          WHERE is_deleted = 0
          GROUP BY child_task_id
         HAVING COUNT(*) > 1
          ORDER BY child_task_id",
    ),
    (
        "single_child",
        "tasks",
        "SELECT parent_task_id AS rowid,
                'task has ' || COUNT(*) || ' active children' AS message
           FROM task_relationships
          WHERE is_deleted = 0
          GROUP BY parent_task_id
         HAVING COUNT(*) > 1
          ORDER BY parent_task_id",
    ),
    (
        "same_unit",
        "task_relationships",
        "SELECT r.id AS rowid,
                'edge joins unit ' || p.unit_id || ' to unit ' || c.unit_id AS message
           FROM task_relationships r
           JOIN tasks p ON p.id = r.parent_task_id
           JOIN tasks c ON c.id = r.child_task_id
          WHERE r.is_deleted = 0 AND p.unit_id <> c.unit_id
          ORDER BY r.id",
    ),
    (
        "live_endpoints",
        "task_relationships",
        "SELECT r.id AS rowid,
                'active edge touches deleted task ' ||
                    CASE WHEN p.is_deleted = 1 THEN p.id ELSE c.id END AS message
           FROM task_relationships r
           JOIN tasks p ON p.id = r.parent_task_id
           JOIN tasks c ON c.id = r.child_task_id
          WHERE r.is_deleted = 0 AND (p.is_deleted = 1 OR c.is_deleted = 1)
          ORDER BY r.id",
    ),
];

/// Runs the SQLite integrity pragmas and the chain shape checks.
pub async fn run_chain_health(pool: &SqlitePool) -> Result<ChainHealthReport> {
    let mut conn = pool
        .acquire()
        .await
        .context("acquire connection for health checks")?;

    let mut checks: Vec<ChainHealthCheck> = Vec::new();
    let mut offenders: Vec<ChainHealthOffender> = Vec::new();

    checks.push(run_quick_check(&mut conn).await);

    let mut results = vec![run_foreign_key_check(&mut conn).await];
    for (name, table, sql) in CHAIN_QUERIES {
        results.push(run_offender_query(&mut conn, name, table, sql).await);
    }
    results.push(run_acyclic_check(&mut conn).await);
    for result in results {
        offenders.extend(result.offenders);
        checks.push(result.check);
    }

    let schema_hash = compute_schema_hash(&mut conn).await.unwrap_or_default();
    let status = if checks.iter().all(|check| check.passed) {
        ChainHealthStatus::Ok
    } else {
        ChainHealthStatus::Error
    };

    let report = ChainHealthReport {
        status,
        checks,
        offenders,
        schema_hash,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    tracing::info!(
        target: "taskchain",
        event = "chain_health",
        status = ?report.status,
        offenders = report.offenders.len()
    );
    Ok(report)
}

fn new_check(name: &str) -> ChainHealthCheck {
    ChainHealthCheck {
        name: name.to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    }
}

fn finish_check(
    mut check: ChainHealthCheck,
    start: Instant,
    offenders: Vec<ChainHealthOffender>,
) -> CheckResult {
    if !offenders.is_empty() {
        check.passed = false;
        check.details = Some(format!("{} offending row(s)", offenders.len()));
    }
    check.duration_ms = start.elapsed().as_millis() as u64;
    CheckResult { check, offenders }
}

fn failed_check(mut check: ChainHealthCheck, start: Instant, err: impl std::fmt::Display) -> CheckResult {
    check.passed = false;
    check.details = Some(format!("{} failed: {err}", check.name));
    check.duration_ms = start.elapsed().as_millis() as u64;
    CheckResult {
        check,
        offenders: Vec::new(),
    }
}

async fn run_quick_check(conn: &mut PoolConnection<Sqlite>) -> ChainHealthCheck {
    let start = Instant::now();
    let mut check = new_check("quick_check");

    match sqlx::query_scalar::<_, String>("PRAGMA quick_check;")
        .fetch_one(conn.as_mut())
        .await
    {
        Ok(result) => {
            if !result.eq_ignore_ascii_case("ok") {
                check.passed = false;
                check.details = Some(result);
            }
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("quick_check failed: {err}"));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    check
}

async fn run_foreign_key_check(conn: &mut PoolConnection<Sqlite>) -> CheckResult {
    let start = Instant::now();
    let check = new_check("foreign_key_check");
    match sqlx::query("PRAGMA foreign_key_check;")
        .fetch_all(conn.as_mut())
        .await
    {
        Ok(rows) => {
            let offenders = rows.iter().filter_map(fk_offender_from_row).collect();
            finish_check(check, start, offenders)
        }
        Err(err) => failed_check(check, start, err),
    }
}

fn fk_offender_from_row(row: &SqliteRow) -> Option<ChainHealthOffender> {
    let table: String = row.try_get("table").ok()?;
    let rowid: i64 = row.try_get("rowid").ok()?;
    let parent: Option<String> = row.try_get("parent").ok();
    let message = match parent {
        Some(parent) => format!("missing parent '{parent}'"),
        None => "foreign key violation".to_string(),
    };
    Some(ChainHealthOffender {
        table,
        rowid,
        message,
    })
}

async fn run_offender_query(
    conn: &mut PoolConnection<Sqlite>,
    name: &str,
    table: &str,
    sql: &str,
) -> CheckResult {
    let start = Instant::now();
    let check = new_check(name);
    match sqlx::query_as::<_, (i64, String)>(sql)
        .fetch_all(conn.as_mut())
        .await
    {
        Ok(rows) => {
            let offenders = rows
                .into_iter()
                .map(|(rowid, message)| ChainHealthOffender {
                    table: table.to_string(),
                    rowid,
                    message,
                })
                .collect();
            finish_check(check, start, offenders)
        }
        Err(err) => failed_check(check, start, err),
    }
}

async fn run_acyclic_check(conn: &mut PoolConnection<Sqlite>) -> CheckResult {
    let start = Instant::now();
    let check = new_check("acyclic");
    let edges = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT id, parent_task_id, child_task_id FROM task_relationships
          WHERE is_deleted = 0 ORDER BY id",
    )
    .fetch_all(conn.as_mut())
    .await;
    match edges {
        Ok(edges) => {
            let offenders = cyclic_edges(&edges)
                .into_iter()
                .map(|rowid| ChainHealthOffender {
                    table: "task_relationships".to_string(),
                    rowid,
                    message: "edge is part of a cycle".to_string(),
                })
                .collect();
            finish_check(check, start, offenders)
        }
        Err(err) => failed_check(check, start, err),
    }
}

/// Ids of edges `parent → child` for which `parent` is reachable again from `child`.
fn cyclic_edges(edges: &[(i64, i64, i64)]) -> Vec<i64> {
    let mut adjacency: HashMap<i64, Vec<i64>> = HashMap::new();
    for &(_, parent, child) in edges {
        adjacency.entry(parent).or_default().push(child);
    }

    let reaches = |from: i64, target: i64| {
        let mut visited = HashSet::new();
        let mut pending = vec![from];
        while let Some(current) = pending.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = adjacency.get(&current) {
                pending.extend(next.iter().copied());
            }
        }
        false
    };

    edges
        .iter()
        .filter(|&&(_, parent, child)| reaches(child, parent))
        .map(|&(id, _, _)| id)
        .collect()
}

async fn compute_schema_hash(conn: &mut PoolConnection<Sqlite>) -> Result<String> {
    let rows = sqlx::query(
        "SELECT type, name, tbl_name, sql FROM sqlite_master
          WHERE type IN ('table','index','trigger','view')
          ORDER BY type, name",
    )
    .fetch_all(conn.as_mut())
    .await?;

    let mut hasher = Sha256::new();
    for row in rows {
        let ty: String = row.try_get("type")?;
        let name: String = row.try_get("name")?;
        let tbl: String = row.try_get("tbl_name")?;
        let sql: Option<String> = row.try_get("sql").ok();

        hasher.update(ty.as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(tbl.as_bytes());
        hasher.update([0u8]);
        if let Some(sql) = sql {
            hasher.update(sql.as_bytes());
        }
        hasher.update([0u8]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_chain_has_no_cyclic_edges() {
        let edges = [(1, 10, 11), (2, 11, 12), (3, 12, 13)];
        assert!(cyclic_edges(&edges).is_empty());
    }

    #[test]
    fn loop_edges_are_reported_and_tail_is_not() {
        let edges = [(1, 10, 11), (2, 11, 12), (3, 12, 10), (4, 12, 13)];
        assert_eq!(cyclic_edges(&edges), vec![1, 2, 3]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        assert_eq!(cyclic_edges(&[(7, 5, 5)]), vec![7]);
    }
}
