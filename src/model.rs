use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{
    encode::IsNull,
    error::BoxDynError,
    sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef},
    Sqlite,
};

pub const DEFAULT_RELATIONSHIP_TYPE: &str = "related";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("invalid task status: {other}")),
        }
    }
}

impl sqlx::Type<Sqlite> for TaskStatus {
    fn type_info() -> SqliteTypeInfo {
        <&str as sqlx::Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <&str as sqlx::Type<Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, Sqlite> for TaskStatus {
    fn encode_by_ref(&self, buf: &mut Vec<SqliteArgumentValue<'q>>) -> Result<IsNull, BoxDynError> {
        <&str as sqlx::Encode<'q, Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, Sqlite> for TaskStatus {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as sqlx::Decode<'r, Sqlite>>::decode(value)?;
        raw.parse::<TaskStatus>().map_err(Into::into)
    }
}

/// Deletion marker stored in `task_relationships.is_deleted`.
///
/// The integer values are persisted as-is and must stay stable: `0` active,
/// `1` removed as a side effect of an endpoint task being soft-deleted, `2`
/// removed by an explicit unlink. Only `ManuallyRemoved` blocks automatic
/// re-linking on restore.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipState {
    Active,
    AutoRemoved,
    ManuallyRemoved,
}

impl RelationshipState {
    pub const fn as_i64(self) -> i64 {
        match self {
            RelationshipState::Active => 0,
            RelationshipState::AutoRemoved => 1,
            RelationshipState::ManuallyRemoved => 2,
        }
    }

    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(RelationshipState::Active),
            1 => Some(RelationshipState::AutoRemoved),
            2 => Some(RelationshipState::ManuallyRemoved),
            _ => None,
        }
    }
}

impl fmt::Display for RelationshipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RelationshipState::Active => "active",
            RelationshipState::AutoRemoved => "auto_removed",
            RelationshipState::ManuallyRemoved => "manually_removed",
        };
        f.write_str(label)
    }
}

impl sqlx::Type<Sqlite> for RelationshipState {
    fn type_info() -> SqliteTypeInfo {
        <i64 as sqlx::Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, Sqlite> for RelationshipState {
    fn encode_by_ref(&self, buf: &mut Vec<SqliteArgumentValue<'q>>) -> Result<IsNull, BoxDynError> {
        <i64 as sqlx::Encode<'q, Sqlite>>::encode_by_ref(&self.as_i64(), buf)
    }
}

impl<'r> sqlx::Decode<'r, Sqlite> for RelationshipState {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <i64 as sqlx::Decode<'r, Sqlite>>::decode(value)?;
        RelationshipState::from_i64(raw)
            .ok_or_else(|| format!("invalid relationship state: {raw}").into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Unit {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub unit_id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<NaiveDate>,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_deleted: bool,
}

impl Task {
    /// Total chronological order of tasks within a unit.
    pub fn chrono_key(&self) -> (NaiveDate, i64, i64) {
        (self.created_date, self.created_at, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Relationship {
    pub id: i64,
    pub parent_task_id: i64,
    pub child_task_id: i64,
    pub relationship_type: String,
    pub is_deleted: RelationshipState,
    pub created_at: i64,
}

/// Tasks adjacent to a task over active edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedTasks {
    pub parents: Vec<Task>,
    pub children: Vec<Task>,
}

impl RelatedTasks {
    /// The single parent and single child when the task sits inside a chain.
    pub fn bypass_pair(&self) -> Option<(&Task, &Task)> {
        match (self.parents.as_slice(), self.children.as_slice()) {
            ([parent], [child]) => Some((parent, child)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSummary {
    pub chain_length: usize,
    /// 1-indexed; 0 when the task is absent from its own chain.
    pub position: usize,
    pub has_parents: bool,
    pub has_children: bool,
    pub chain: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub unit_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_date: NaiveDate,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

/// Editable task fields. `title`/`description` are left alone when `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    #[serde(default)]
    pub completed_date: Option<NaiveDate>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: i64, date: (i32, u32, u32), created_at: i64) -> Task {
        Task {
            id,
            unit_id: 1,
            title: format!("task {id}"),
            description: None,
            status: TaskStatus::Pending,
            created_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            completed_date: None,
            created_at,
            updated_at: created_at,
            is_deleted: false,
        }
    }

    #[test]
    fn relationship_state_values_are_stable() {
        assert_eq!(RelationshipState::Active.as_i64(), 0);
        assert_eq!(RelationshipState::AutoRemoved.as_i64(), 1);
        assert_eq!(RelationshipState::ManuallyRemoved.as_i64(), 2);
        for raw in 0..=2 {
            let state = RelationshipState::from_i64(raw).expect("known state");
            assert_eq!(state.as_i64(), raw);
        }
        assert_eq!(RelationshipState::from_i64(3), None);
    }

    #[test]
    fn chrono_key_breaks_ties_on_timestamp_then_id() {
        let a = task(5, (2024, 1, 1), 100);
        let b = task(4, (2024, 1, 1), 200);
        let c = task(3, (2024, 1, 1), 200);
        let mut tasks = vec![b.clone(), a.clone(), c.clone()];
        tasks.sort_by_key(Task::chrono_key);
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5, 3, 4]);
    }

    #[test]
    fn bypass_pair_requires_exactly_one_each_side() {
        let mut related = RelatedTasks::default();
        assert!(related.bypass_pair().is_none());
        related.parents.push(task(1, (2024, 1, 1), 0));
        assert!(related.bypass_pair().is_none());
        related.children.push(task(3, (2024, 1, 3), 0));
        let (p, c) = related.bypass_pair().expect("pair");
        assert_eq!((p.id, c.id), (1, 3));
        related.children.push(task(4, (2024, 1, 4), 0));
        assert!(related.bypass_pair().is_none());
    }

    #[test]
    fn task_status_round_trips_through_str() {
        assert_eq!("completed".parse::<TaskStatus>(), Ok(TaskStatus::Completed));
        assert!("done".parse::<TaskStatus>().is_err());
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
    }
}
