//! Maintenance task chains for equipment units.
//!
//! Tasks of one unit are linked into chronological chains by
//! `task_relationships` rows. The [`chain`] module owns every operation that
//! reshapes those chains; [`repo`] and [`relationships`] are the storage
//! layer underneath it.

pub mod chain;
pub mod config;
pub mod db;
mod error;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod relationships;
pub mod repo;
pub mod time;

pub use chain::{
    add_task_relationship, chain_summary, delete_task, get_full_task_chain, get_related_tasks,
    is_chain_locked, mark_relationship_manually_removed, permanent_delete_task,
    remove_task_from_chain, restore_task, unit_chains, update_task, BypassEdge, LinkOutcome,
    RestoreOutcome, SkipReason, SyncOutcome, UnlinkOutcome,
};
pub use error::{
    AppError, AppResult, CHAIN_CROSS_UNIT, CHAIN_CYCLE, CHAIN_DELETED_TASK, CHAIN_OPERATION_FAILED,
    CHAIN_SELF_LINK, RELATIONSHIP_NOT_FOUND, TASK_NOT_FOUND, UNIT_NOT_FOUND,
};
pub use model::{
    ChainSummary, NewTask, RelatedTasks, Relationship, RelationshipState, Task, TaskStatus,
    TaskUpdate, Unit,
};
