//! Shared test utilities for planstore integration tests.
//!
//! Every test gets its own in-memory store, so tests are isolated without
//! any external service. The raw [`MemoryStore`] is returned alongside the
//! [`Store`] handle so tests can inspect keys or take the backend offline.

use std::sync::Arc;

use planstore_db::Store;
use planstore_db::kv::MemoryStore;
use planstore_db::models::{Plan, Task, TaskPriority};
use planstore_db::queries::{plans, tasks};
use uuid::Uuid;

/// Create a fresh, empty store.
///
/// Returns `(store, backend)`. Both share the same data.
pub fn test_store() -> (Store, MemoryStore) {
    let backend = MemoryStore::new();
    let store = Store::new(Arc::new(backend.clone()));
    (store, backend)
}

/// A random application id, unique per call.
pub fn app_id() -> String {
    format!("app-{}", Uuid::new_v4().simple())
}

/// Create a plan under a fresh application id.
pub async fn seed_plan(store: &Store, name: &str) -> Plan {
    plans::create_plan(store, &app_id(), name, "")
        .await
        .expect("create_plan should succeed")
}

/// Create a plan and `titles.len()` tasks in it, in order.
pub async fn seed_plan_with_tasks(store: &Store, titles: &[&str]) -> (Plan, Vec<Task>) {
    let plan = seed_plan(store, "seeded").await;
    let mut created = Vec::with_capacity(titles.len());
    for title in titles {
        let task = tasks::create_task(store, &plan.id, title, "", TaskPriority::Medium)
            .await
            .unwrap_or_else(|e| panic!("create_task {title:?} should succeed: {e}"));
        created.push(task);
    }
    (plan, created)
}

/// Titles of a plan's tasks in list (order) sequence.
pub async fn titles_in_order(store: &Store, plan_id: &str) -> Vec<String> {
    tasks::list_tasks_by_plan(store, plan_id)
        .await
        .expect("list_tasks_by_plan should succeed")
        .into_iter()
        .map(|t| t.title)
        .collect()
}

/// Assert that the plan's task orders are exactly `0..N`, each once, and
/// that the listing is sorted by order.
pub async fn assert_dense_orders(store: &Store, plan_id: &str) {
    let listed = tasks::list_tasks_by_plan(store, plan_id)
        .await
        .expect("list_tasks_by_plan should succeed");
    let mut orders: Vec<i64> = listed.iter().map(|t| t.order).collect();
    let expected: Vec<i64> = (0..listed.len() as i64).collect();
    assert_eq!(
        orders, expected,
        "plan {plan_id} orders are not a sorted dense permutation"
    );
    orders.sort_unstable();
    orders.dedup();
    assert_eq!(orders.len(), listed.len(), "duplicate orders in plan {plan_id}");
}
