//! One-shot CLI handlers that talk to the store without a server.
//!
//! Implements:
//! - `planstore functions [--json]`            -- print the function catalog
//! - `planstore call <name> [--params <json>]` -- dispatch a single call
//! - `planstore ping`                          -- check store liveness

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use planstore_core::{Dispatcher, FunctionRegistry};
use planstore_db::Store;

// -----------------------------------------------------------------------
// planstore functions
// -----------------------------------------------------------------------

pub fn run_functions(json: bool) -> Result<()> {
    let registry = FunctionRegistry::builtin();
    if json {
        let catalog = serde_json::to_string_pretty(&registry.catalog())
            .context("failed to serialize function catalog")?;
        println!("{catalog}");
        return Ok(());
    }

    let width = registry.iter().map(|f| f.name.len()).max().unwrap_or(0);
    for def in registry.iter() {
        println!("{:<width$}  {}", def.name, def.description);
        for param in def.params {
            let flag = if param.required { "required" } else { "optional" };
            println!("{:<width$}    {} ({flag})", "", param.name);
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// planstore call <name>
// -----------------------------------------------------------------------

/// Parse the `--params` argument. Absent means an empty bag.
pub fn parse_params(raw: Option<&str>) -> Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(text).context("--params is not valid JSON"),
    }
}

pub async fn run_call(store: Store, name: &str, params: Value) -> Result<Value> {
    let dispatcher = Dispatcher::new(Arc::new(FunctionRegistry::builtin()), store);
    dispatcher
        .invoke(name, params)
        .await
        .map_err(|e| anyhow!("{} ({}): {e}", e.kind(), e.status_code()))
}

// -----------------------------------------------------------------------
// planstore ping
// -----------------------------------------------------------------------

pub async fn run_ping(store: &Store) -> Result<()> {
    let kv = store.kv();
    kv.ping()
        .await
        .with_context(|| format!("{} store did not answer", kv.backend()))?;
    println!("{} store is reachable", kv.backend());
    Ok(())
}
