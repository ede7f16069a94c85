//! Query functions for plan records and their secondary indexes.
//!
//! Keys touched: `plan:<id>`, `plans`, `application_plans:<app>`,
//! `plan_status:<status>`, and on delete everything owned by the plan.
//!
//! Plans written by older releases live under `project:<id>` with their task
//! ids in `project_tasks:<id>`. Reads fall back to those keys; the first
//! locked operation on such a plan moves it to the current layout (see
//! [`adopt_legacy`]).

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::tasks::adopt_legacy_tasks;
use super::{load, load_all, save};
use crate::error::{RepoError, RepoResult};
use crate::keys;
use crate::models::{Plan, PlanStatus, Task};
use crate::store::Store;

/// Create a new plan with status `new`. Empty name and description are kept
/// as-is; the application id is not checked against anything.
pub async fn create_plan(
    store: &Store,
    application_id: &str,
    name: &str,
    description: &str,
) -> RepoResult<Plan> {
    let now = Utc::now();
    let plan = Plan {
        id: Uuid::new_v4().to_string(),
        application_id: application_id.to_owned(),
        name: name.to_owned(),
        description: description.to_owned(),
        status: PlanStatus::New,
        created_at: now,
        updated_at: now,
    };

    save(store, &keys::plan(&plan.id), &plan).await?;
    add_to_indexes(store, &plan).await?;

    info!(plan_id = %plan.id, application_id, "plan created");
    Ok(plan)
}

/// Fetch a plan by id, falling back to the legacy `project:<id>` key.
pub async fn find_plan(store: &Store, id: &str) -> RepoResult<Option<Plan>> {
    if let Some(plan) = load::<Plan>(store, &keys::plan(id)).await? {
        return Ok(Some(plan));
    }
    let Some(mut legacy) = load::<Plan>(store, &keys::legacy_project(id)).await? else {
        return Ok(None);
    };
    debug!(plan_id = id, "plan read from legacy project key");
    legacy.id = id.to_owned();
    Ok(Some(legacy))
}

/// Fetch a plan by id. Fails with [`RepoError::PlanNotFound`] when absent.
pub async fn get_plan(store: &Store, id: &str) -> RepoResult<Plan> {
    find_plan(store, id)
        .await?
        .ok_or_else(|| RepoError::PlanNotFound(id.to_owned()))
}

/// Whether a plan record exists for `id`.
pub async fn plan_exists(store: &Store, id: &str) -> RepoResult<bool> {
    Ok(find_plan(store, id).await?.is_some())
}

/// Replace the stored plan with `plan`, creating it when the id is unknown.
///
/// `updated_at` is set to now. An existing plan keeps its stored
/// `created_at`; a new one gets now. Index membership follows any change
/// of application or status.
pub async fn update_plan(store: &Store, plan: &Plan) -> RepoResult<Plan> {
    let _guard = store.lock_plan(&plan.id).await;
    adopt_legacy(store, &plan.id).await?;
    let existing = load::<Plan>(store, &keys::plan(&plan.id)).await?;
    let now = Utc::now();

    let mut record = plan.clone();
    record.updated_at = now;
    record.created_at = existing.as_ref().map_or(now, |old| old.created_at);

    save(store, &keys::plan(&record.id), &record).await?;

    match &existing {
        Some(old) => {
            if old.application_id != record.application_id {
                store
                    .kv()
                    .srem(&keys::application_plans(&old.application_id), &old.id)
                    .await?;
            }
            if old.status != record.status {
                store
                    .kv()
                    .srem(&keys::plan_status(old.status), &old.id)
                    .await?;
            }
            debug!(plan_id = %record.id, "plan replaced");
        }
        None => {
            info!(plan_id = %record.id, "plan upserted from update");
        }
    }
    add_to_indexes(store, &record).await?;

    Ok(record)
}

/// Delete a plan, every task it owns, and all index entries for both.
///
/// Tasks indexed only under the legacy `project_tasks:<id>` key are adopted
/// first, so the cascade covers both indexes. Fails with
/// [`RepoError::PlanNotFound`] when absent. A store failure part way through
/// is returned as-is; nothing already removed is restored.
pub async fn delete_plan(store: &Store, id: &str) -> RepoResult<()> {
    let _guard = store.lock_plan(id).await;
    adopt_legacy(store, id).await?;
    let plan = get_plan(store, id).await?;

    let task_key = keys::plan_tasks(id);
    let task_ids = store.kv().zrange_all(&task_key).await?;
    let mut removed = 0usize;
    for task_id in &task_ids {
        match load::<Task>(store, &keys::task(task_id)).await? {
            Some(task) if task.plan_id == id => {
                store
                    .kv()
                    .srem(&keys::task_status(task.status), task_id)
                    .await?;
                store.kv().delete(&keys::task(task_id)).await?;
                removed += 1;
            }
            Some(task) => {
                warn!(
                    plan_id = id,
                    task_id = %task.id,
                    owner = %task.plan_id,
                    "task index entry points at a task owned by another plan"
                );
            }
            None => {
                warn!(plan_id = id, task_id = %task_id, "task index entry without a record");
            }
        }
    }

    let kv = store.kv();
    kv.delete(&task_key).await?;
    kv.delete(&keys::plan_meta(id)).await?;
    kv.srem(&keys::application_plans(&plan.application_id), id).await?;
    kv.srem(&keys::plan_status(plan.status), id).await?;
    kv.srem(keys::ALL_PLANS, id).await?;
    kv.delete(&keys::plan(id)).await?;

    info!(plan_id = id, tasks_removed = removed, "plan deleted");
    Ok(())
}

/// Move a plan still stored under the legacy keys to the current layout.
///
/// A record found only at `project:<id>` is written to `plan:<id>` and added
/// to the plan indexes. The legacy record is then removed, as is a stale one
/// shadowed by `plan:<id>`. Task ids indexed in `project_tasks:<id>` join
/// `plan_tasks:<id>`. The caller holds the plan's lock.
pub(crate) async fn adopt_legacy(store: &Store, id: &str) -> RepoResult<()> {
    let legacy_key = keys::legacy_project(id);
    let mut current = store.kv().get(&keys::plan(id)).await?.is_some();
    if let Some(mut legacy) = load::<Plan>(store, &legacy_key).await? {
        if !current {
            legacy.id = id.to_owned();
            save(store, &keys::plan(id), &legacy).await?;
            add_to_indexes(store, &legacy).await?;
            current = true;
            info!(plan_id = id, "legacy plan record adopted");
        }
        store.kv().delete(&legacy_key).await?;
    }
    if current {
        adopt_legacy_tasks(store, id).await?;
    }
    Ok(())
}

/// List every plan, oldest first. Plans still under the legacy key are
/// included.
pub async fn list_plans(store: &Store) -> RepoResult<Vec<Plan>> {
    let ids = store.kv().smembers(keys::ALL_PLANS).await?;
    load_plans(store, &ids, |_| true).await
}

/// List the plans owned by an application. Unknown applications yield an
/// empty list.
pub async fn list_plans_by_application(
    store: &Store,
    application_id: &str,
) -> RepoResult<Vec<Plan>> {
    let ids = store
        .kv()
        .smembers(&keys::application_plans(application_id))
        .await?;
    load_plans(store, &ids, |plan| plan.application_id == application_id).await
}

/// List the plans with the given status.
pub async fn list_plans_by_status(store: &Store, status: PlanStatus) -> RepoResult<Vec<Plan>> {
    let ids = store.kv().smembers(&keys::plan_status(status)).await?;
    load_plans(store, &ids, |plan| plan.status == status).await
}

async fn add_to_indexes(store: &Store, plan: &Plan) -> RepoResult<()> {
    let kv = store.kv();
    kv.sadd(keys::ALL_PLANS, &plan.id).await?;
    kv.sadd(&keys::application_plans(&plan.application_id), &plan.id).await?;
    kv.sadd(&keys::plan_status(plan.status), &plan.id).await?;
    Ok(())
}

/// Resolve index ids to records, skipping dangling entries, then add the
/// not yet adopted legacy plans that `legacy_matches` accepts.
async fn load_plans(
    store: &Store,
    ids: &[String],
    legacy_matches: impl Fn(&Plan) -> bool,
) -> RepoResult<Vec<Plan>> {
    let record_keys: Vec<String> = ids.iter().map(|id| keys::plan(id)).collect();
    let mut plans = Vec::with_capacity(ids.len());
    for (id, loaded) in ids.iter().zip(load_all::<Plan>(store, &record_keys).await?) {
        match loaded {
            Some(plan) => plans.push(plan),
            None => debug!(plan_id = %id, "skipping index entry without a record"),
        }
    }
    for plan in legacy_plans(store).await? {
        if legacy_matches(&plan) && !plans.iter().any(|p| p.id == plan.id) {
            plans.push(plan);
        }
    }
    plans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(plans)
}

/// Plans found only under `project:<id>`, with the id taken from the key.
async fn legacy_plans(store: &Store) -> RepoResult<Vec<Plan>> {
    let legacy_keys = store.kv().scan_prefix(keys::LEGACY_PROJECT_PREFIX).await?;
    if legacy_keys.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<&str> = legacy_keys
        .iter()
        .filter_map(|key| key.strip_prefix(keys::LEGACY_PROJECT_PREFIX))
        .collect();
    let current_keys: Vec<String> = ids.iter().map(|id| keys::plan(id)).collect();
    let current = load_all::<Plan>(store, &current_keys).await?;

    let mut plans = Vec::new();
    for ((id, key), adopted) in ids.iter().zip(&legacy_keys).zip(current) {
        if adopted.is_some() {
            continue;
        }
        if let Some(mut plan) = load::<Plan>(store, key).await? {
            plan.id = (*id).to_owned();
            plans.push(plan);
        }
    }
    Ok(plans)
}
