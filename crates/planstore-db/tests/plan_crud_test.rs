//! Integration tests for plan CRUD operations and plan indexes.
//!
//! Each test builds its own in-memory store, so tests are fully isolated.

use chrono::{Duration, Utc};

use planstore_db::RepoError;
use planstore_db::keys;
use planstore_db::kv::{KvStore, MemoryStore};
use planstore_db::models::{Plan, PlanStatus, Task, TaskPriority, TaskStatus};
use planstore_db::queries::{plans, tasks};
use planstore_test_utils::{app_id, seed_plan_with_tasks, test_store};

// -----------------------------------------------------------------------
// Create / get
// -----------------------------------------------------------------------

#[tokio::test]
async fn create_and_get_plan() {
    let (store, _) = test_store();
    let app = app_id();

    let plan = plans::create_plan(&store, &app, "launch", "ship v1")
        .await
        .expect("create_plan should succeed");

    assert_eq!(plan.application_id, app);
    assert_eq!(plan.name, "launch");
    assert_eq!(plan.description, "ship v1");
    assert_eq!(plan.status, PlanStatus::New);
    assert_eq!(plan.created_at, plan.updated_at);

    let fetched = plans::get_plan(&store, &plan.id)
        .await
        .expect("get_plan should succeed");
    assert_eq!(fetched, plan);
}

#[tokio::test]
async fn create_plan_preserves_empty_and_unusual_strings() {
    let (store, _) = test_store();
    let long = "x".repeat(1500);
    let emoji = "计划 🚀 — ünïcødé";

    for (name, description) in [("", ""), (long.as_str(), long.as_str()), (emoji, emoji)] {
        let plan = plans::create_plan(&store, "app", name, description)
            .await
            .expect("create_plan should succeed");
        let fetched = plans::get_plan(&store, &plan.id).await.unwrap();
        assert_eq!(fetched.name, name);
        assert_eq!(fetched.description, description);
        assert_eq!(fetched, plan);
    }
}

#[tokio::test]
async fn get_plan_missing_is_not_found() {
    let (store, _) = test_store();
    let err = plans::get_plan(&store, "nope").await.unwrap_err();
    assert!(matches!(err, RepoError::PlanNotFound(_)));
    assert!(err.to_string().contains("plan not found"));
}

#[tokio::test]
async fn get_plan_reads_legacy_project_key() {
    let (store, backend) = test_store();
    let now = Utc::now();
    let legacy = Plan {
        id: "old-1".into(),
        application_id: "app".into(),
        name: "imported".into(),
        description: String::new(),
        status: PlanStatus::InProgress,
        created_at: now,
        updated_at: now,
    };
    backend
        .set(&keys::legacy_project("old-1"), &serde_json::to_string(&legacy).unwrap())
        .await
        .unwrap();

    let fetched = plans::get_plan(&store, "old-1").await.unwrap();
    assert_eq!(fetched, legacy);
}

// -----------------------------------------------------------------------
// Update (upsert)
// -----------------------------------------------------------------------

#[tokio::test]
async fn update_unknown_plan_creates_it() {
    let (store, _) = test_store();
    let mut plan = Plan::blank("never-created");
    plan.application_id = "app".into();
    plan.name = "upserted".into();

    plans::update_plan(&store, &plan)
        .await
        .expect("update of unknown plan should upsert");

    let fetched = plans::get_plan(&store, "never-created").await.unwrap();
    assert_eq!(fetched.name, "upserted");
    assert_eq!(plans::list_plans(&store).await.unwrap().len(), 1);
    assert_eq!(
        plans::list_plans_by_application(&store, "app").await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn update_replaces_record_and_moves_indexes() {
    let (store, _) = test_store();
    let plan = plans::create_plan(&store, "app-a", "first", "").await.unwrap();

    let mut changed = plan.clone();
    changed.name = "second".into();
    changed.application_id = "app-b".into();
    changed.status = PlanStatus::InProgress;
    let updated = plans::update_plan(&store, &changed).await.unwrap();

    assert_eq!(updated.created_at, plan.created_at);
    assert!(updated.updated_at >= plan.updated_at);

    let fetched = plans::get_plan(&store, &plan.id).await.unwrap();
    assert_eq!(fetched.name, "second");
    assert_eq!(fetched.status, PlanStatus::InProgress);

    assert!(plans::list_plans_by_application(&store, "app-a").await.unwrap().is_empty());
    assert_eq!(plans::list_plans_by_application(&store, "app-b").await.unwrap().len(), 1);
    assert!(plans::list_plans_by_status(&store, PlanStatus::New).await.unwrap().is_empty());
    assert_eq!(
        plans::list_plans_by_status(&store, PlanStatus::InProgress).await.unwrap().len(),
        1
    );
}

// -----------------------------------------------------------------------
// Delete
// -----------------------------------------------------------------------

#[tokio::test]
async fn delete_plan_cascades_to_tasks() {
    let (store, _) = test_store();
    let (plan, created) = seed_plan_with_tasks(&store, &["a", "b", "c"]).await;

    plans::delete_plan(&store, &plan.id).await.expect("delete_plan should succeed");

    for task in &created {
        let err = tasks::get_task(&store, &task.id).await.unwrap_err();
        assert!(matches!(err, RepoError::TaskNotFound(_)));
    }
    let err = tasks::list_tasks_by_plan(&store, &plan.id).await.unwrap_err();
    assert!(err.to_string().contains("plan not found"));
    assert!(plans::list_plans(&store).await.unwrap().is_empty());
    assert!(
        tasks::list_tasks_by_status(&store, planstore_db::models::TaskStatus::Pending)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn delete_plan_leaves_no_keys_behind() {
    let (store, backend) = test_store();
    let (plan, _) = seed_plan_with_tasks(&store, &["a", "b"]).await;

    plans::delete_plan(&store, &plan.id).await.unwrap();
    assert_eq!(backend.key_count().await, 0);
}

#[tokio::test]
async fn delete_missing_plan_is_not_found() {
    let (store, _) = test_store();
    let err = plans::delete_plan(&store, "ghost").await.unwrap_err();
    assert!(matches!(err, RepoError::PlanNotFound(_)));
}

#[tokio::test]
async fn delete_plan_does_not_touch_other_plans() {
    let (store, _) = test_store();
    let (doomed, _) = seed_plan_with_tasks(&store, &["a"]).await;
    let (kept, kept_tasks) = seed_plan_with_tasks(&store, &["x", "y"]).await;

    plans::delete_plan(&store, &doomed.id).await.unwrap();

    let listed = tasks::list_tasks_by_plan(&store, &kept.id).await.unwrap();
    assert_eq!(listed, kept_tasks);
}

// -----------------------------------------------------------------------
// Listing
// -----------------------------------------------------------------------

#[tokio::test]
async fn listings_are_empty_not_errors() {
    let (store, _) = test_store();
    assert!(plans::list_plans(&store).await.unwrap().is_empty());
    assert!(plans::list_plans_by_application(&store, "nobody").await.unwrap().is_empty());
    assert!(
        plans::list_plans_by_status(&store, PlanStatus::Cancelled)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn list_plans_by_application_filters() {
    let (store, _) = test_store();
    plans::create_plan(&store, "app-1", "p1", "").await.unwrap();
    plans::create_plan(&store, "app-1", "p2", "").await.unwrap();
    plans::create_plan(&store, "app-2", "p3", "").await.unwrap();

    let mut names: Vec<String> = plans::list_plans_by_application(&store, "app-1")
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["p1", "p2"]);
    assert_eq!(plans::list_plans(&store).await.unwrap().len(), 3);
}

// -----------------------------------------------------------------------
// Legacy layout
// -----------------------------------------------------------------------

/// How an older release indexed a plan's task ids.
#[derive(Clone, Copy)]
enum LegacyIndex {
    Sorted,
    Plain,
}

/// Write a plan under `project:<id>` with one pending task per
/// `(title, order)`, indexed under `project_tasks:<id>`.
async fn seed_legacy_plan(
    backend: &MemoryStore,
    plan_id: &str,
    entries: &[(&str, i64)],
    index: LegacyIndex,
) -> (Plan, Vec<Task>) {
    let created = Utc::now() - Duration::days(30);
    let plan = Plan {
        id: plan_id.into(),
        application_id: "legacy-app".into(),
        name: "imported".into(),
        description: String::new(),
        status: PlanStatus::InProgress,
        created_at: created,
        updated_at: created,
    };
    let raw = serde_json::to_string(&plan).unwrap();
    backend.set(&keys::legacy_project(plan_id), &raw).await.unwrap();

    let index_key = keys::legacy_project_tasks(plan_id);
    let pending = keys::task_status(TaskStatus::Pending);
    let mut seeded = Vec::new();
    for (i, (title, order)) in entries.iter().enumerate() {
        let task = Task {
            id: format!("{plan_id}-t{i}"),
            plan_id: plan_id.into(),
            title: (*title).into(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            order: *order,
            created_at: created,
            updated_at: created,
        };
        let raw = serde_json::to_string(&task).unwrap();
        backend.set(&keys::task(&task.id), &raw).await.unwrap();
        backend.sadd(&pending, &task.id).await.unwrap();
        match index {
            LegacyIndex::Sorted => backend.zadd(&index_key, &task.id, *order).await.unwrap(),
            LegacyIndex::Plain => backend.sadd(&index_key, &task.id).await.unwrap(),
        }
        seeded.push(task);
    }
    (plan, seeded)
}

async fn has_key(backend: &MemoryStore, key: &str) -> bool {
    backend.get(key).await.unwrap().is_some()
}

/// Entries left in the legacy task index, in either shape.
async fn legacy_index_len(backend: &MemoryStore, plan_id: &str) -> usize {
    let key = keys::legacy_project_tasks(plan_id);
    let sorted = backend.zrange_all(&key).await.unwrap();
    let plain = backend.smembers(&key).await.unwrap();
    sorted.len() + plain.len()
}

fn titles(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.title.as_str()).collect()
}

fn orders(tasks: &[Task]) -> Vec<i64> {
    tasks.iter().map(|t| t.order).collect()
}

#[tokio::test]
async fn legacy_plan_tasks_are_listed_and_adopted() {
    let (store, backend) = test_store();
    let entries = [("first", 0), ("second", 1)];
    seed_legacy_plan(&backend, "old", &entries, LegacyIndex::Sorted).await;

    let listed = tasks::list_tasks_by_plan(&store, "old").await.unwrap();
    assert_eq!(titles(&listed), ["first", "second"]);
    assert_eq!(orders(&listed), [0, 1]);

    // The first listing moved the plan to the current layout.
    assert!(has_key(&backend, &keys::plan("old")).await);
    assert!(!has_key(&backend, &keys::legacy_project("old")).await);
    assert_eq!(legacy_index_len(&backend, "old").await, 0);
    let indexed = backend.zrange_all(&keys::plan_tasks("old")).await.unwrap();
    assert_eq!(indexed, ["old-t0", "old-t1"]);

    let again = tasks::list_tasks_by_plan(&store, "old").await.unwrap();
    assert_eq!(again, listed);
}

#[tokio::test]
async fn legacy_plain_set_index_is_read() {
    let (store, backend) = test_store();
    seed_legacy_plan(&backend, "old", &[("b", 1), ("a", 0)], LegacyIndex::Plain).await;

    let listed = tasks::list_tasks_by_plan(&store, "old").await.unwrap();
    assert_eq!(titles(&listed), ["a", "b"]);
    assert_eq!(legacy_index_len(&backend, "old").await, 0);
}

#[tokio::test]
async fn legacy_plans_show_up_in_plan_listings() {
    let (store, backend) = test_store();
    let current = plans::create_plan(&store, "legacy-app", "current", "")
        .await
        .unwrap();
    let (legacy, _) = seed_legacy_plan(&backend, "old", &[("t", 0)], LegacyIndex::Sorted).await;

    let all = plans::list_plans(&store).await.unwrap();
    assert_eq!(all, vec![legacy.clone(), current.clone()]);

    let by_app = plans::list_plans_by_application(&store, "legacy-app")
        .await
        .unwrap();
    assert_eq!(by_app.len(), 2);
    let other_app = plans::list_plans_by_application(&store, "other")
        .await
        .unwrap();
    assert!(other_app.is_empty());

    let in_progress = plans::list_plans_by_status(&store, PlanStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(in_progress, vec![legacy]);
    let fresh = plans::list_plans_by_status(&store, PlanStatus::New)
        .await
        .unwrap();
    assert_eq!(fresh, vec![current]);

    // Listing plans reads the legacy record without moving it.
    assert!(has_key(&backend, &keys::legacy_project("old")).await);
}

#[tokio::test]
async fn update_legacy_plan_keeps_its_tasks() {
    let (store, backend) = test_store();
    let entries = [("x", 0), ("y", 1)];
    let (legacy, _) = seed_legacy_plan(&backend, "old", &entries, LegacyIndex::Sorted).await;

    let mut renamed = legacy.clone();
    renamed.name = "renamed".into();
    let stored = plans::update_plan(&store, &renamed).await.unwrap();
    assert_eq!(stored.created_at, legacy.created_at);

    let listed = tasks::list_tasks_by_plan(&store, "old").await.unwrap();
    assert_eq!(titles(&listed), ["x", "y"]);
    assert_eq!(plans::list_plans(&store).await.unwrap(), vec![stored]);
    assert_eq!(legacy_index_len(&backend, "old").await, 0);
}

#[tokio::test]
async fn create_task_on_legacy_plan_appends_after_legacy_tasks() {
    let (store, backend) = test_store();
    // Older writers could leave gaps in the order sequence.
    seed_legacy_plan(&backend, "old", &[("a", 3), ("b", 7)], LegacyIndex::Sorted).await;

    let added = tasks::create_task(&store, "old", "c", "", TaskPriority::High)
        .await
        .unwrap();
    assert_eq!(added.order, 2);

    let listed = tasks::list_tasks_by_plan(&store, "old").await.unwrap();
    assert_eq!(titles(&listed), ["a", "b", "c"]);
    assert_eq!(orders(&listed), [0, 1, 2]);
}

#[tokio::test]
async fn delete_legacy_plan_cascades_to_its_tasks() {
    let (store, backend) = test_store();
    let entries = [("t1", 0), ("t2", 1)];
    let (_, seeded) = seed_legacy_plan(&backend, "old", &entries, LegacyIndex::Sorted).await;

    plans::delete_plan(&store, "old").await.unwrap();

    for task in &seeded {
        let err = tasks::get_task(&store, &task.id).await.unwrap_err();
        assert!(matches!(err, RepoError::TaskNotFound(_)), "got {err:?}");
    }
    let pending = tasks::list_tasks_by_status(&store, TaskStatus::Pending)
        .await
        .unwrap();
    assert!(pending.is_empty());
    let err = plans::get_plan(&store, "old").await.unwrap_err();
    assert!(matches!(err, RepoError::PlanNotFound(_)));
    assert_eq!(backend.key_count().await, 0);
}

// -----------------------------------------------------------------------
// Transport failures
// -----------------------------------------------------------------------

#[tokio::test]
async fn transport_failure_is_not_not_found() {
    let (store, backend) = test_store();
    let plan = plans::create_plan(&store, "app", "p", "").await.unwrap();

    backend.set_offline(true);
    let err = plans::get_plan(&store, &plan.id).await.unwrap_err();
    assert!(matches!(err, RepoError::Store(_)), "got {err:?}");
    assert!(!err.is_not_found());

    let err = plans::list_plans(&store).await.unwrap_err();
    assert!(matches!(err, RepoError::Store(_)));
}
