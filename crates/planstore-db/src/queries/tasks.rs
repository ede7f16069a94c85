//! Query functions for task records and the per-plan ordering engine.
//!
//! Every plan's tasks carry `order` values forming exactly `0..N`. Each
//! operation that changes membership or position of a plan's tasks runs
//! under that plan's lock (see [`Store::lock_plan`]) and leaves the
//! permutation dense before releasing it. The sorted set
//! `plan_tasks:<plan>` mirrors the orders as scores.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::plans::{adopt_legacy, plan_exists};
use super::{load, load_all, save};
use crate::error::{RepoError, RepoResult};
use crate::keys;
use crate::models::{NO_DESCRIPTION, NewTask, Task, TaskPriority, TaskStatus};
use crate::store::{PlanGuard, Store};

/// Append a new `pending` task to the end of a plan.
///
/// Fails with [`RepoError::PlanNotFound`] if the plan does not exist.
pub async fn create_task(
    store: &Store,
    plan_id: &str,
    title: &str,
    description: &str,
    priority: TaskPriority,
) -> RepoResult<Task> {
    let _guard = store.lock_plan(plan_id).await;
    adopt_legacy(store, plan_id).await?;
    ensure_plan(store, plan_id).await?;

    let order = task_count(store, plan_id).await?;
    let task = new_task(
        plan_id,
        title,
        description,
        TaskStatus::Pending,
        priority,
        order,
    );
    insert(store, &task).await?;
    bump_order_version(store, plan_id).await?;

    info!(task_id = %task.id, plan_id, order, "task created");
    Ok(task)
}

/// Append several tasks to a plan, in input order.
///
/// The plan is checked once before anything is written. Per entry, an empty
/// description becomes [`NO_DESCRIPTION`], a missing status `pending`, and a
/// missing priority `medium`.
pub async fn create_tasks_bulk(
    store: &Store,
    plan_id: &str,
    inputs: &[NewTask],
) -> RepoResult<Vec<Task>> {
    let _guard = store.lock_plan(plan_id).await;
    adopt_legacy(store, plan_id).await?;
    ensure_plan(store, plan_id).await?;

    let start = task_count(store, plan_id).await?;
    let mut created = Vec::with_capacity(inputs.len());
    for (offset, input) in inputs.iter().enumerate() {
        let description = if input.description.is_empty() {
            NO_DESCRIPTION
        } else {
            input.description.as_str()
        };
        let task = new_task(
            plan_id,
            &input.title,
            description,
            input.status.unwrap_or_default(),
            input.priority.unwrap_or_default(),
            start + offset as i64,
        );
        insert(store, &task).await?;
        created.push(task);
    }
    if !created.is_empty() {
        bump_order_version(store, plan_id).await?;
    }

    info!(plan_id, count = created.len(), first_order = start, "tasks created in bulk");
    Ok(created)
}

/// Fetch a task by id. Fails with [`RepoError::TaskNotFound`] when absent.
pub async fn get_task(store: &Store, id: &str) -> RepoResult<Task> {
    load::<Task>(store, &keys::task(id))
        .await?
        .ok_or_else(|| RepoError::TaskNotFound(id.to_owned()))
}

/// Replace a stored task with `task`.
///
/// Unlike plans this is not an upsert: an unknown id fails with
/// [`RepoError::TaskNotFound`]. The caller's `order` is ignored. When
/// `task.plan_id` names a different plan the task is moved: it leaves the
/// old plan (which is compacted) and is appended to the new one.
pub async fn update_task(store: &Store, task: &Task) -> RepoResult<Task> {
    let target_plan = task.plan_id.as_str();
    let (_guard, stored) = lock_task(store, &task.id, Some(target_plan)).await?;
    let moving = stored.plan_id != target_plan;

    let mut record = task.clone();
    record.created_at = stored.created_at;
    record.updated_at = Utc::now();
    record.order = stored.order;

    if moving {
        ensure_plan(store, target_plan).await?;

        store
            .kv()
            .zrem(&keys::plan_tasks(&stored.plan_id), &stored.id)
            .await?;
        compact(store, &stored.plan_id, stored.order).await?;
        bump_order_version(store, &stored.plan_id).await?;

        record.order = task_count(store, target_plan).await?;
        store
            .kv()
            .zadd(&keys::plan_tasks(target_plan), &record.id, record.order)
            .await?;
        bump_order_version(store, target_plan).await?;

        info!(
            task_id = %record.id,
            from_plan = %stored.plan_id,
            to_plan = target_plan,
            order = record.order,
            "task moved between plans"
        );
    }

    if stored.status != record.status {
        store
            .kv()
            .srem(&keys::task_status(stored.status), &stored.id)
            .await?;
        store
            .kv()
            .sadd(&keys::task_status(record.status), &record.id)
            .await?;
    }
    save(store, &keys::task(&record.id), &record).await?;

    debug!(task_id = %record.id, "task updated");
    Ok(record)
}

/// Delete a task and close the gap it leaves in its plan's order.
pub async fn delete_task(store: &Store, id: &str) -> RepoResult<()> {
    let (_guard, task) = lock_task(store, id, None).await?;

    let kv = store.kv();
    kv.delete(&keys::task(id)).await?;
    kv.srem(&keys::task_status(task.status), id).await?;
    kv.zrem(&keys::plan_tasks(&task.plan_id), id).await?;
    let shifted = compact(store, &task.plan_id, task.order).await?;
    bump_order_version(store, &task.plan_id).await?;

    info!(task_id = id, plan_id = %task.plan_id, shifted, "task deleted");
    Ok(())
}

/// List a plan's tasks in ascending `order`.
///
/// Fails with [`RepoError::PlanNotFound`] for an unknown plan, so that case
/// is not confused with a plan that has no tasks. Takes the plan's lock, as
/// the first listing of a legacy plan adopts its task index.
pub async fn list_tasks_by_plan(store: &Store, plan_id: &str) -> RepoResult<Vec<Task>> {
    let _guard = store.lock_plan(plan_id).await;
    adopt_legacy(store, plan_id).await?;
    ensure_plan(store, plan_id).await?;
    plan_tasks(store, plan_id).await
}

/// List every task with the given status, grouped by plan and in plan order.
pub async fn list_tasks_by_status(store: &Store, status: TaskStatus) -> RepoResult<Vec<Task>> {
    let ids = store.kv().smembers(&keys::task_status(status)).await?;
    let record_keys: Vec<String> = ids.iter().map(|id| keys::task(id)).collect();
    let mut tasks = Vec::with_capacity(ids.len());
    for (id, loaded) in ids.iter().zip(load_all::<Task>(store, &record_keys).await?) {
        match loaded {
            Some(task) => tasks.push(task),
            None => debug!(task_id = %id, "skipping index entry without a record"),
        }
    }
    tasks.sort_by(|a, b| a.plan_id.cmp(&b.plan_id).then(a.order.cmp(&b.order)));
    Ok(tasks)
}

/// List a plan's tasks with the given status, in plan order.
pub async fn list_tasks_by_plan_and_status(
    store: &Store,
    plan_id: &str,
    status: TaskStatus,
) -> RepoResult<Vec<Task>> {
    let tasks = list_tasks_by_plan(store, plan_id).await?;
    Ok(tasks.into_iter().filter(|t| t.status == status).collect())
}

/// Move a task to `new_order` within its plan, shifting the tasks between
/// its old and new position by one.
///
/// `new_order` must be in `0..count`; anything else fails with
/// [`RepoError::InvalidOrder`]. Moving to the current position changes
/// nothing.
pub async fn reorder_task(store: &Store, id: &str, new_order: i64) -> RepoResult<Task> {
    let (_guard, mut task) = lock_task(store, id, None).await?;
    let plan_id = task.plan_id.clone();

    let count = task_count(store, &plan_id).await?;
    if new_order < 0 || new_order >= count {
        return Err(RepoError::InvalidOrder {
            requested: new_order,
            count,
        });
    }

    let old_order = task.order;
    if new_order == old_order {
        debug!(task_id = id, order = old_order, "reorder to same position is a no-op");
        return Ok(task);
    }

    let index_key = keys::plan_tasks(&plan_id);
    for sibling_id in store.kv().zrange_all(&index_key).await? {
        if sibling_id == task.id {
            continue;
        }
        let Some(mut sibling) = load::<Task>(store, &keys::task(&sibling_id)).await? else {
            warn!(plan_id = %plan_id, task_id = %sibling_id, "task index entry without a record");
            continue;
        };
        let shifted = if new_order > old_order {
            // Moving later: (old, new] slides up by one.
            (sibling.order > old_order && sibling.order <= new_order).then(|| sibling.order - 1)
        } else {
            // Moving earlier: [new, old) slides down by one.
            (sibling.order >= new_order && sibling.order < old_order).then(|| sibling.order + 1)
        };
        if let Some(order) = shifted {
            sibling.order = order;
            save(store, &keys::task(&sibling.id), &sibling).await?;
            store.kv().zadd(&index_key, &sibling.id, order).await?;
        }
    }

    task.order = new_order;
    task.updated_at = Utc::now();
    save(store, &keys::task(&task.id), &task).await?;
    store.kv().zadd(&index_key, &task.id, new_order).await?;
    bump_order_version(store, &plan_id).await?;

    info!(task_id = id, plan_id = %plan_id, from = old_order, to = new_order, "task reordered");
    Ok(task)
}

/// The plan's order version stamp: incremented by every operation that
/// changes the membership or order of its tasks. Zero for untouched plans.
pub async fn order_version(store: &Store, plan_id: &str) -> RepoResult<u64> {
    let raw = store
        .kv()
        .hget(&keys::plan_meta(plan_id), keys::ORDER_VERSION_FIELD)
        .await?;
    Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn new_task(
    plan_id: &str,
    title: &str,
    description: &str,
    status: TaskStatus,
    priority: TaskPriority,
    order: i64,
) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::new_v4().to_string(),
        plan_id: plan_id.to_owned(),
        title: title.to_owned(),
        description: description.to_owned(),
        status,
        priority,
        order,
        created_at: now,
        updated_at: now,
    }
}

async fn insert(store: &Store, task: &Task) -> RepoResult<()> {
    save(store, &keys::task(&task.id), task).await?;
    store
        .kv()
        .zadd(&keys::plan_tasks(&task.plan_id), &task.id, task.order)
        .await?;
    store
        .kv()
        .sadd(&keys::task_status(task.status), &task.id)
        .await?;
    Ok(())
}

async fn ensure_plan(store: &Store, plan_id: &str) -> RepoResult<()> {
    if plan_exists(store, plan_id).await? {
        Ok(())
    } else {
        Err(RepoError::PlanNotFound(plan_id.to_owned()))
    }
}

async fn task_count(store: &Store, plan_id: &str) -> RepoResult<i64> {
    Ok(store.kv().zcard(&keys::plan_tasks(plan_id)).await?)
}

/// Tasks of a plan sorted by their stored `order`.
async fn plan_tasks(store: &Store, plan_id: &str) -> RepoResult<Vec<Task>> {
    let ids = store.kv().zrange_all(&keys::plan_tasks(plan_id)).await?;
    let record_keys: Vec<String> = ids.iter().map(|id| keys::task(id)).collect();
    let mut tasks = Vec::with_capacity(ids.len());
    for (id, loaded) in ids.iter().zip(load_all::<Task>(store, &record_keys).await?) {
        match loaded {
            Some(task) => tasks.push(task),
            None => warn!(plan_id, task_id = %id, "task index entry without a record"),
        }
    }
    tasks.sort_by_key(|t| t.order);
    Ok(tasks)
}

/// Merge the legacy `project_tasks:<plan>` index into `plan_tasks:<plan>`
/// and renumber the plan's orders to `0..N`, keeping their sequence.
///
/// Only tasks whose record names this plan are adopted. The legacy key is
/// removed afterwards. The caller holds the plan's lock.
pub(crate) async fn adopt_legacy_tasks(store: &Store, plan_id: &str) -> RepoResult<usize> {
    let kv = store.kv();
    let legacy_key = keys::legacy_project_tasks(plan_id);
    let mut legacy_ids = kv.zrange_all(&legacy_key).await?;
    if legacy_ids.is_empty() {
        legacy_ids = kv.smembers(&legacy_key).await?;
    }
    if legacy_ids.is_empty() {
        return Ok(0);
    }

    let index_key = keys::plan_tasks(plan_id);
    let indexed: HashSet<String> = kv.zrange_all(&index_key).await?.into_iter().collect();
    let record_keys: Vec<String> = legacy_ids.iter().map(|id| keys::task(id)).collect();
    let mut adopted = 0usize;
    for (id, loaded) in legacy_ids.iter().zip(load_all::<Task>(store, &record_keys).await?) {
        match loaded {
            Some(task) if task.plan_id == plan_id => {
                if !indexed.contains(id) {
                    kv.zadd(&index_key, id, task.order).await?;
                    kv.sadd(&keys::task_status(task.status), id).await?;
                    adopted += 1;
                }
            }
            Some(task) => warn!(
                plan_id,
                task_id = %id,
                owner = %task.plan_id,
                "legacy task index entry points at a task owned by another plan"
            ),
            None => warn!(plan_id, task_id = %id, "legacy task index entry without a record"),
        }
    }
    kv.delete(&legacy_key).await?;

    if adopted > 0 {
        renumber(store, plan_id).await?;
        bump_order_version(store, plan_id).await?;
    }
    info!(plan_id, adopted, "legacy task index adopted");
    Ok(adopted)
}

/// Rewrite the plan's orders as `0..N` following their current sequence.
/// Ties keep creation order.
async fn renumber(store: &Store, plan_id: &str) -> RepoResult<()> {
    let index_key = keys::plan_tasks(plan_id);
    let mut tasks = plan_tasks(store, plan_id).await?;
    tasks.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    for (position, mut task) in tasks.into_iter().enumerate() {
        let position = position as i64;
        if task.order != position {
            task.order = position;
            save(store, &keys::task(&task.id), &task).await?;
        }
        store.kv().zadd(&index_key, &task.id, position).await?;
    }
    Ok(())
}

/// Close the gap left at `removed_order`: every remaining task of the plan
/// with a greater order moves down by one. Returns how many tasks shifted.
async fn compact(store: &Store, plan_id: &str, removed_order: i64) -> RepoResult<usize> {
    let index_key = keys::plan_tasks(plan_id);
    let mut shifted = 0;
    for mut task in plan_tasks(store, plan_id).await? {
        if task.order > removed_order {
            task.order -= 1;
            save(store, &keys::task(&task.id), &task).await?;
            store.kv().zadd(&index_key, &task.id, task.order).await?;
            shifted += 1;
        }
    }
    Ok(shifted)
}

async fn bump_order_version(store: &Store, plan_id: &str) -> RepoResult<()> {
    let next = order_version(store, plan_id).await? + 1;
    store
        .kv()
        .hset(
            &keys::plan_meta(plan_id),
            keys::ORDER_VERSION_FIELD,
            &next.to_string(),
        )
        .await?;
    Ok(())
}

/// Load a task and take the lock of the plan that owns it (plus `also`, if
/// given). Legacy plans are adopted once locked. Re-reads after locking and
/// retries if the task changed plans in between, so the returned record is
/// owned by a locked plan.
async fn lock_task(
    store: &Store,
    id: &str,
    also: Option<&str>,
) -> RepoResult<(PlanGuard, Task)> {
    loop {
        let seen = get_task(store, id).await?;
        let guard = match also {
            Some(other) => store.lock_plans(&[seen.plan_id.as_str(), other]).await,
            None => store.lock_plan(&seen.plan_id).await,
        };
        adopt_legacy(store, &seen.plan_id).await?;
        if let Some(other) = also {
            adopt_legacy(store, other).await?;
        }
        let current = get_task(store, id).await?;
        if current.plan_id == seen.plan_id {
            return Ok((guard, current));
        }
        drop(guard);
    }
}
