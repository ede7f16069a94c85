//! Key scheme shared with existing data. These strings must not change.

use crate::models::{PlanStatus, TaskStatus};

/// Set of every plan id.
pub const ALL_PLANS: &str = "plans";

/// Hash field holding the per-plan order version stamp.
pub const ORDER_VERSION_FIELD: &str = "order_version";

pub fn plan(id: &str) -> String {
    format!("plan:{id}")
}

pub fn task(id: &str) -> String {
    format!("task:{id}")
}

/// Sorted set of task ids in a plan, scored by `order`.
pub fn plan_tasks(plan_id: &str) -> String {
    format!("plan_tasks:{plan_id}")
}

pub fn plan_meta(plan_id: &str) -> String {
    format!("plan_meta:{plan_id}")
}

pub fn application_plans(application_id: &str) -> String {
    format!("application_plans:{application_id}")
}

pub fn plan_status(status: PlanStatus) -> String {
    format!("plan_status:{status}")
}

pub fn task_status(status: TaskStatus) -> String {
    format!("task_status:{status}")
}

/// Prefix of legacy plan records, scanned when listing plans.
pub const LEGACY_PROJECT_PREFIX: &str = "project:";

/// Legacy alias of [`plan`]. Moved to `plan:<id>` the first time the plan
/// is touched.
pub fn legacy_project(id: &str) -> String {
    format!("{LEGACY_PROJECT_PREFIX}{id}")
}

/// Legacy alias of [`plan_tasks`]: a sorted set scored by `order`, or a
/// plain set from older writers.
pub fn legacy_project_tasks(id: &str) -> String {
    format!("project_tasks:{id}")
}
