//! Invocation dispatcher.
//!
//! Routes a named call with a JSON parameter bag to the matching repository
//! operation. Parameters are validated against the function's descriptor
//! before any storage access; repository errors are translated into
//! [`DispatchError`] so every transport can render the same envelope.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{Instrument, debug, error, info_span, warn};

use planstore_db::models::{NewTask, Plan, PlanStatus, TaskPriority, TaskStatus};
use planstore_db::queries::{plans, tasks};
use planstore_db::{RepoError, Store};

use crate::functions::{FunctionRegistry, Params, validate};

/// Errors surfaced to protocol callers.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("function not found: {0}")]
    UnknownFunction(String),

    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidOrder(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed request: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Wire classification of the error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownFunction(_) | Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::InvalidOrder(_) => "invalid_order",
            Self::Transport(_) | Self::Decode(_) => "transport_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP-style status code for the error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownFunction(_) | Self::NotFound(_) => 404,
            Self::Validation(_) | Self::InvalidOrder(_) | Self::Decode(_) => 400,
            Self::Transport(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// `true` when the failure is the caller's fault rather than ours.
    pub fn is_request_error(&self) -> bool {
        self.status_code() < 500
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_owned(),
            message: self.to_string(),
            code: self.status_code(),
        }
    }
}

impl From<RepoError> for DispatchError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::PlanNotFound(_) | RepoError::TaskNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            RepoError::InvalidOrder { .. } => Self::InvalidOrder(err.to_string()),
            RepoError::Store(e) => Self::Transport(e.to_string()),
            RepoError::Corrupt { .. } => Self::Internal(err.to_string()),
        }
    }
}

/// Structured error envelope: `{"type", "message", "code"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub code: u16,
}

/// Routes invocations from any transport to the repositories.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    store: Store,
}

impl Dispatcher {
    pub fn new(registry: Arc<FunctionRegistry>, store: Store) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Invoke `name` with `params` and return the serialized result.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value, DispatchError> {
        let span = info_span!("invoke", function = name);
        async {
            let def = self
                .registry
                .get(name)
                .ok_or_else(|| DispatchError::UnknownFunction(name.to_owned()))?;
            let params = validate(def, params)?;
            debug!("parameters accepted");
            self.route(def.name, &params).await
        }
        .instrument(span.clone())
        .await
        .inspect_err(|e| {
            let _enter = span.enter();
            if e.is_request_error() {
                warn!(kind = e.kind(), error = %e, "invocation rejected");
            } else {
                error!(kind = e.kind(), error = %e, "invocation failed");
            }
        })
    }

    async fn route(&self, name: &str, p: &Params) -> Result<Value, DispatchError> {
        let store = &self.store;
        match name {
            "create_plan" => {
                let plan = plans::create_plan(
                    store,
                    p.str("application_id")?,
                    p.str("name")?,
                    p.opt_str("description").unwrap_or_default(),
                )
                .await?;
                to_value(&plan)
            }
            "get_plan" => to_value(&plans::get_plan(store, p.str("id")?).await?),
            "update_plan" => {
                let id = p.str("id")?;
                let mut plan = plans::find_plan(store, id)
                    .await?
                    .unwrap_or_else(|| Plan::blank(id));
                if let Some(app) = p.opt_str("application_id") {
                    plan.application_id = app.to_owned();
                }
                if let Some(name) = p.opt_str("name") {
                    plan.name = name.to_owned();
                }
                if let Some(description) = p.opt_str("description") {
                    plan.description = description.to_owned();
                }
                if let Some(status) = p.opt_enum::<PlanStatus>("status")? {
                    plan.status = status;
                }
                to_value(&plans::update_plan(store, &plan).await?)
            }
            "delete_plan" => {
                let id = p.str("id")?;
                plans::delete_plan(store, id).await?;
                Ok(deleted(id))
            }
            "list_plans" => to_value(&plans::list_plans(store).await?),
            "list_plans_by_application" => {
                to_value(&plans::list_plans_by_application(store, p.str("application_id")?).await?)
            }
            "list_plans_by_status" => {
                let status = p.enum_value::<PlanStatus>("status")?;
                to_value(&plans::list_plans_by_status(store, status).await?)
            }
            "create_task" => {
                let priority = p.opt_enum::<TaskPriority>("priority")?.unwrap_or_default();
                let task = tasks::create_task(
                    store,
                    p.str("plan_id")?,
                    p.str("title")?,
                    p.opt_str("description").unwrap_or_default(),
                    priority,
                )
                .await?;
                to_value(&task)
            }
            "create_tasks_bulk" => {
                let inputs = p
                    .objects("tasks")?
                    .iter()
                    .map(|item| {
                        Ok(NewTask {
                            title: item.str("title")?.to_owned(),
                            description: item.opt_str("description").unwrap_or_default().to_owned(),
                            status: item.opt_enum::<TaskStatus>("status")?,
                            priority: item.opt_enum::<TaskPriority>("priority")?,
                        })
                    })
                    .collect::<Result<Vec<_>, DispatchError>>()?;
                to_value(&tasks::create_tasks_bulk(store, p.str("plan_id")?, &inputs).await?)
            }
            "get_task" => to_value(&tasks::get_task(store, p.str("id")?).await?),
            "update_task" => {
                let mut task = tasks::get_task(store, p.str("id")?).await?;
                if let Some(plan_id) = p.opt_str("plan_id") {
                    task.plan_id = plan_id.to_owned();
                }
                if let Some(title) = p.opt_str("title") {
                    task.title = title.to_owned();
                }
                if let Some(description) = p.opt_str("description") {
                    task.description = description.to_owned();
                }
                if let Some(status) = p.opt_enum::<TaskStatus>("status")? {
                    task.status = status;
                }
                if let Some(priority) = p.opt_enum::<TaskPriority>("priority")? {
                    task.priority = priority;
                }
                to_value(&tasks::update_task(store, &task).await?)
            }
            "delete_task" => {
                let id = p.str("id")?;
                tasks::delete_task(store, id).await?;
                Ok(deleted(id))
            }
            "list_tasks_by_plan" => {
                to_value(&tasks::list_tasks_by_plan(store, p.str("plan_id")?).await?)
            }
            "list_tasks_by_status" => {
                let status = p.enum_value::<TaskStatus>("status")?;
                to_value(&tasks::list_tasks_by_status(store, status).await?)
            }
            "list_tasks_by_plan_and_status" => {
                let status = p.enum_value::<TaskStatus>("status")?;
                let listed =
                    tasks::list_tasks_by_plan_and_status(store, p.str("plan_id")?, status).await?;
                to_value(&listed)
            }
            "reorder_task" => {
                let task = tasks::reorder_task(store, p.str("id")?, p.int("new_order")?).await?;
                to_value(&task)
            }
            // Registered but without a handler.
            other => Err(DispatchError::Internal(format!(
                "no handler for function {other}"
            ))),
        }
    }
}

fn deleted(id: &str) -> Value {
    json!({ "deleted": true, "id": id })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::Internal(e.to_string()))
}
