use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use super::{in_tx, traversal, ChainOp};
use crate::{
    model::{Task, DEFAULT_RELATIONSHIP_TYPE},
    relationships::{self, Direction},
    repo, AppResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// The task was neither deleted nor unlinked by hand; nothing changed.
    AlreadyActive,
    /// The task had been unlinked by hand; it comes back on its own and the markers are gone.
    Standalone { purged_markers: u64 },
    /// The task was placed back by date. Both sides are `None` when it had no
    /// neighbour to attach to.
    Reinserted {
        after_id: Option<i64>,
        before_id: Option<i64>,
        replaced_bypass: bool,
    },
}

/// Closest active tasks of the unit on either side of `task` in chronological order.
fn chronological_neighbours<'a>(task: &Task, others: &'a [Task]) -> (Option<&'a Task>, Option<&'a Task>) {
    let key = task.chrono_key();
    let insert_after = others
        .iter()
        .filter(|other| other.id != task.id && other.chrono_key() < key)
        .max_by_key(|other| other.chrono_key());
    let insert_before = others
        .iter()
        .filter(|other| other.id != task.id && other.chrono_key() > key)
        .min_by_key(|other| other.chrono_key());
    (insert_after, insert_before)
}

/// A neighbour and the tasks already holding the slot the restored task wants:
/// the neighbour's children for the earlier side, its parents for the later one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    id: i64,
    holders: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reinsertion {
    after_id: Option<i64>,
    before_id: Option<i64>,
    replace_bypass: bool,
}

/// Decides the edges a reinsertion writes. The `after → before` edge is only
/// dropped when both replacement edges are written in its place, so an
/// existing chain is never cut.
fn plan_reinsertion(
    own_has_parent: bool,
    own_has_child: bool,
    after: Option<&Slot>,
    before: Option<&Slot>,
    closes_loop: bool,
) -> Reinsertion {
    if let (Some(after), Some(before)) = (after, before) {
        let bypassed = after.holders == [before.id] && before.holders == [after.id];
        if bypassed && !own_has_parent && !own_has_child {
            return Reinsertion {
                after_id: Some(after.id),
                before_id: Some(before.id),
                replace_bypass: true,
            };
        }
    }

    let after_id = after
        .filter(|slot| slot.holders.is_empty() && !own_has_parent)
        .map(|slot| slot.id);
    let before_id = before
        .filter(|slot| slot.holders.is_empty() && !own_has_child)
        .map(|slot| slot.id)
        .filter(|_| !(after_id.is_some() && closes_loop));
    Reinsertion {
        after_id,
        before_id,
        replace_bypass: false,
    }
}

pub(crate) async fn restore_task_in(
    conn: &mut SqliteConnection,
    task_id: i64,
) -> AppResult<RestoreOutcome> {
    let task = repo::require_task(&mut *conn, task_id).await?;
    let was_manually_removed = relationships::has_manual_marker(&mut *conn, task_id).await?;
    if !task.is_deleted && !was_manually_removed {
        tracing::debug!(target: "taskchain", event = "task_restore_noop", task_id);
        return Ok(RestoreOutcome::AlreadyActive);
    }
    repo::set_task_deleted(&mut *conn, task_id, false).await?;

    if was_manually_removed {
        let purged_markers = relationships::purge_manual_markers_touching(&mut *conn, task_id).await?;
        tracing::info!(
            target: "taskchain",
            event = "task_restored_standalone",
            task_id,
            purged_markers
        );
        return Ok(RestoreOutcome::Standalone { purged_markers });
    }

    let others = repo::list_tasks(&mut *conn, task.unit_id, false).await?;
    let (insert_after, insert_before) = chronological_neighbours(&task, &others);
    let own = relationships::related_tasks(&mut *conn, task_id).await?;

    let mut after_slot = None;
    if let Some(after) = insert_after {
        let holders = relationships::neighbours(&mut *conn, after.id, Direction::Child).await?;
        after_slot = Some(Slot {
            id: after.id,
            holders: holders.iter().map(|t| t.id).collect(),
        });
    }
    let mut before_slot = None;
    if let Some(before) = insert_before {
        let holders = relationships::neighbours(&mut *conn, before.id, Direction::Parent).await?;
        before_slot = Some(Slot {
            id: before.id,
            holders: holders.iter().map(|t| t.id).collect(),
        });
    }
    let closes_loop = match (insert_after, insert_before) {
        (Some(after), Some(before)) => {
            traversal::reachable_ids(&mut *conn, before.id, Direction::Child)
                .await?
                .contains(&after.id)
        }
        _ => false,
    };

    let plan = plan_reinsertion(
        !own.parents.is_empty(),
        !own.children.is_empty(),
        after_slot.as_ref(),
        before_slot.as_ref(),
        closes_loop,
    );
    if plan.replace_bypass {
        if let (Some(after_id), Some(before_id)) = (plan.after_id, plan.before_id) {
            relationships::hard_delete_edge(&mut *conn, after_id, before_id).await?;
        }
    }
    if let Some(after_id) = plan.after_id {
        relationships::add_edge(&mut *conn, after_id, task_id, DEFAULT_RELATIONSHIP_TYPE).await?;
    }
    if let Some(before_id) = plan.before_id {
        relationships::add_edge(&mut *conn, task_id, before_id, DEFAULT_RELATIONSHIP_TYPE).await?;
    }
    for (side, slot, linked) in [
        ("after", &after_slot, plan.after_id),
        ("before", &before_slot, plan.before_id),
    ] {
        if let (Some(slot), None) = (slot, linked) {
            tracing::warn!(
                target: "taskchain",
                event = "restore_side_skipped",
                task_id,
                neighbour_id = slot.id,
                side
            );
        }
    }

    tracing::info!(
        target: "taskchain",
        event = "task_restored",
        task_id,
        after_id = plan.after_id,
        before_id = plan.before_id,
        replaced_bypass = plan.replace_bypass
    );
    Ok(RestoreOutcome::Reinserted {
        after_id: plan.after_id,
        before_id: plan.before_id,
        replaced_bypass: plan.replace_bypass,
    })
}

/// Undeletes the task and, unless it was unlinked by hand, puts it back into
/// the unit's chain at its chronological position. A task that is already
/// active is left alone.
pub async fn restore_task(pool: &SqlitePool, task_id: i64) -> AppResult<RestoreOutcome> {
    in_tx(pool, ChainOp::RestoreTask, move |conn| {
        restore_task_in(conn, task_id).boxed()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use chrono::NaiveDate;

    fn task(id: i64, day: u32, created_at: i64) -> Task {
        Task {
            id,
            unit_id: 1,
            title: format!("task {id}"),
            description: None,
            status: TaskStatus::Pending,
            created_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            completed_date: None,
            created_at,
            updated_at: created_at,
            is_deleted: false,
        }
    }

    #[test]
    fn neighbours_bracket_the_task() {
        let others = vec![task(1, 1, 0), task(2, 2, 0), task(4, 4, 0), task(5, 5, 0)];
        let restored = task(3, 3, 0);
        let (after, before) = chronological_neighbours(&restored, &others);
        assert_eq!(after.map(|t| t.id), Some(2));
        assert_eq!(before.map(|t| t.id), Some(4));
    }

    #[test]
    fn same_day_uses_timestamp() {
        let others = vec![task(1, 3, 100), task(2, 3, 300)];
        let restored = task(3, 3, 200);
        let (after, before) = chronological_neighbours(&restored, &others);
        assert_eq!(after.map(|t| t.id), Some(1));
        assert_eq!(before.map(|t| t.id), Some(2));
    }

    #[test]
    fn edges_of_the_unit_leave_one_side_empty() {
        let others = vec![task(2, 2, 0)];
        assert_eq!(
            chronological_neighbours(&task(1, 1, 0), &others)
                .1
                .map(|t| t.id),
            Some(2)
        );
        assert!(chronological_neighbours(&task(1, 1, 0), &others).0.is_none());
        assert!(chronological_neighbours(&task(3, 3, 0), &others).1.is_none());
        assert_eq!(chronological_neighbours(&task(3, 3, 0), &[]), (None, None));
    }

    fn slot(id: i64, holders: &[i64]) -> Slot {
        Slot {
            id,
            holders: holders.to_vec(),
        }
    }

    #[test]
    fn bypass_is_replaced_only_when_both_sides_attach() {
        let plan = plan_reinsertion(false, false, Some(&slot(1, &[3])), Some(&slot(3, &[1])), false);
        assert_eq!(
            plan,
            Reinsertion {
                after_id: Some(1),
                before_id: Some(3),
                replace_bypass: true
            }
        );

        // The restored task already has a child, so the bypass stays in place.
        let plan = plan_reinsertion(false, true, Some(&slot(1, &[3])), Some(&slot(3, &[1])), false);
        assert_eq!(
            plan,
            Reinsertion {
                after_id: None,
                before_id: None,
                replace_bypass: false
            }
        );
    }

    #[test]
    fn taken_slots_are_skipped_per_side() {
        let plan = plan_reinsertion(false, false, Some(&slot(1, &[9])), Some(&slot(3, &[])), false);
        assert_eq!(plan.after_id, None);
        assert_eq!(plan.before_id, Some(3));
        assert!(!plan.replace_bypass);
    }

    #[test]
    fn later_side_is_dropped_when_it_would_close_a_loop() {
        let plan = plan_reinsertion(false, false, Some(&slot(1, &[])), Some(&slot(3, &[])), true);
        assert_eq!(plan.after_id, Some(1));
        assert_eq!(plan.before_id, None);
    }
}
