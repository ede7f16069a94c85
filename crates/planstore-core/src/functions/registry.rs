//! Function registry -- the catalog of invokable operations.
//!
//! The catalog is built once at startup and shared by reference. Both the
//! listing endpoint and capability negotiation render it through
//! [`FunctionRegistry::catalog`], so they can never disagree.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value, json};

use planstore_db::models::{PlanStatus, TaskPriority, TaskStatus};

/// Type of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    /// A string restricted to `values`. `aliases` are also accepted on input
    /// but not advertised.
    Enum {
        values: &'static [&'static str],
        aliases: &'static [&'static str],
    },
    /// An array of objects, each described by the nested parameters.
    ObjectList(&'static [ParamSpec]),
}

/// Descriptor of one named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }

    fn schema(&self) -> Value {
        let mut schema = match self.kind {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::Integer => json!({ "type": "integer" }),
            ParamKind::Enum { values, .. } => json!({ "type": "string", "enum": values }),
            ParamKind::ObjectList(fields) => json!({
                "type": "array",
                "items": object_schema(fields),
            }),
        };
        schema["description"] = Value::String(self.description.to_owned());
        schema
    }
}

/// Descriptor of one invokable function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

impl FunctionDef {
    /// JSON-schema rendering of the parameter list.
    pub fn parameters_schema(&self) -> Value {
        object_schema(self.params)
    }
}

fn object_schema(params: &[ParamSpec]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.to_owned(), p.schema()))
        .collect();
    let required: Vec<&str> = params.iter().filter(|p| p.required).map(|p| p.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// A catalog entry as exposed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ---------------------------------------------------------------------------
// Built-in catalog
// ---------------------------------------------------------------------------

pub const PLAN_STATUSES: &[&str] = &["new", "in_progress", "completed", "cancelled"];
pub const TASK_STATUSES: &[&str] = &["pending", "in_progress", "completed", "cancelled"];
pub const TASK_PRIORITIES: &[&str] = &["low", "medium", "high"];

const PLAN_STATUS: ParamKind = ParamKind::Enum {
    values: PLAN_STATUSES,
    aliases: &["inprogress"],
};
const TASK_STATUS: ParamKind = ParamKind::Enum {
    values: TASK_STATUSES,
    aliases: &[],
};
const TASK_PRIORITY: ParamKind = ParamKind::Enum {
    values: TASK_PRIORITIES,
    aliases: &[],
};

const ID: ParamSpec = ParamSpec::required("id", ParamKind::String, "Identifier of the record");
const PLAN_ID: ParamSpec =
    ParamSpec::required("plan_id", ParamKind::String, "Identifier of the owning plan");
const APPLICATION_ID: ParamSpec = ParamSpec::required(
    "application_id",
    ParamKind::String,
    "Identifier of the owning application",
);

const BULK_TASK_FIELDS: &[ParamSpec] = &[
    ParamSpec::required("title", ParamKind::String, "Task title"),
    ParamSpec::optional(
        "description",
        ParamKind::String,
        "Task description (defaults to \"no description provided\")",
    ),
    ParamSpec::optional("status", TASK_STATUS, "Initial status (defaults to pending)"),
    ParamSpec::optional("priority", TASK_PRIORITY, "Priority (defaults to medium)"),
];

const BUILTIN: &[FunctionDef] = &[
    FunctionDef {
        name: "create_plan",
        description: "Create a new plan for an application",
        params: &[
            APPLICATION_ID,
            ParamSpec::required("name", ParamKind::String, "Plan name"),
            ParamSpec::optional("description", ParamKind::String, "Plan description"),
        ],
    },
    FunctionDef {
        name: "get_plan",
        description: "Get a plan by id",
        params: &[ID],
    },
    FunctionDef {
        name: "update_plan",
        description: "Update a plan; a plan that does not exist yet is created",
        params: &[
            ID,
            ParamSpec::optional("application_id", ParamKind::String, "Owning application"),
            ParamSpec::optional("name", ParamKind::String, "Plan name"),
            ParamSpec::optional("description", ParamKind::String, "Plan description"),
            ParamSpec::optional("status", PLAN_STATUS, "Plan status"),
        ],
    },
    FunctionDef {
        name: "delete_plan",
        description: "Delete a plan and all of its tasks",
        params: &[ID],
    },
    FunctionDef {
        name: "list_plans",
        description: "List all plans",
        params: &[],
    },
    FunctionDef {
        name: "list_plans_by_application",
        description: "List the plans owned by an application",
        params: &[APPLICATION_ID],
    },
    FunctionDef {
        name: "list_plans_by_status",
        description: "List the plans with a given status",
        params: &[ParamSpec::required("status", PLAN_STATUS, "Plan status")],
    },
    FunctionDef {
        name: "create_task",
        description: "Append a new task to a plan",
        params: &[
            PLAN_ID,
            ParamSpec::required("title", ParamKind::String, "Task title"),
            ParamSpec::optional("description", ParamKind::String, "Task description"),
            ParamSpec::optional("priority", TASK_PRIORITY, "Priority (defaults to medium)"),
        ],
    },
    FunctionDef {
        name: "create_tasks_bulk",
        description: "Append several tasks to a plan in the given order",
        params: &[
            PLAN_ID,
            ParamSpec::required(
                "tasks",
                ParamKind::ObjectList(BULK_TASK_FIELDS),
                "Tasks to create",
            ),
        ],
    },
    FunctionDef {
        name: "get_task",
        description: "Get a task by id",
        params: &[ID],
    },
    FunctionDef {
        name: "update_task",
        description: "Update a task; changing plan_id moves it to the end of that plan",
        params: &[
            ID,
            ParamSpec::optional("plan_id", ParamKind::String, "Plan to move the task to"),
            ParamSpec::optional("title", ParamKind::String, "Task title"),
            ParamSpec::optional("description", ParamKind::String, "Task description"),
            ParamSpec::optional("status", TASK_STATUS, "Task status"),
            ParamSpec::optional("priority", TASK_PRIORITY, "Task priority"),
        ],
    },
    FunctionDef {
        name: "delete_task",
        description: "Delete a task and close the gap in its plan's order",
        params: &[ID],
    },
    FunctionDef {
        name: "list_tasks_by_plan",
        description: "List a plan's tasks in order",
        params: &[PLAN_ID],
    },
    FunctionDef {
        name: "list_tasks_by_status",
        description: "List all tasks with a given status",
        params: &[ParamSpec::required("status", TASK_STATUS, "Task status")],
    },
    FunctionDef {
        name: "list_tasks_by_plan_and_status",
        description: "List a plan's tasks with a given status, in order",
        params: &[
            PLAN_ID,
            ParamSpec::required("status", TASK_STATUS, "Task status"),
        ],
    },
    FunctionDef {
        name: "reorder_task",
        description: "Move a task to a new zero-based position within its plan",
        params: &[
            ID,
            ParamSpec::required("new_order", ParamKind::Integer, "Target position"),
        ],
    },
];

/// The immutable set of functions a server exposes, keyed by name.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: Vec<FunctionDef>,
    index: HashMap<&'static str, usize>,
}

impl FunctionRegistry {
    /// Build a registry from explicit definitions. Later duplicates of a
    /// name replace earlier ones.
    pub fn new(defs: impl IntoIterator<Item = FunctionDef>) -> Self {
        let mut functions: Vec<FunctionDef> = Vec::new();
        let mut index = HashMap::new();
        for def in defs {
            match index.get(def.name) {
                Some(&pos) => functions[pos] = def,
                None => {
                    index.insert(def.name, functions.len());
                    functions.push(def);
                }
            }
        }
        Self { functions, index }
    }

    /// The plan and task functions.
    pub fn builtin() -> Self {
        Self::new(BUILTIN.iter().copied())
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.index.get(name).map(|&pos| &self.functions[pos])
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &FunctionDef> {
        self.functions.iter()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// The wire rendering of every function.
    pub fn catalog(&self) -> Vec<FunctionDescriptor> {
        self.functions
            .iter()
            .map(|def| FunctionDescriptor {
                name: def.name.to_owned(),
                description: def.description.to_owned(),
                parameters: def.parameters_schema(),
            })
            .collect()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_every_operation() {
        let registry = FunctionRegistry::builtin();
        for name in [
            "create_plan",
            "get_plan",
            "update_plan",
            "delete_plan",
            "list_plans",
            "list_plans_by_application",
            "list_plans_by_status",
            "create_task",
            "create_tasks_bulk",
            "get_task",
            "update_task",
            "delete_task",
            "list_tasks_by_plan",
            "list_tasks_by_status",
            "list_tasks_by_plan_and_status",
            "reorder_task",
        ] {
            assert!(registry.get(name).is_some(), "missing function {name}");
        }
        assert_eq!(registry.len(), 16);
    }

    #[test]
    fn enum_values_match_models() {
        let plan: Vec<&str> = PlanStatus::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(plan, PLAN_STATUSES);
        let task: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(task, TASK_STATUSES);
        let prio: Vec<&str> = TaskPriority::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(prio, TASK_PRIORITIES);
    }

    #[test]
    fn schema_lists_required_and_enums() {
        let registry = FunctionRegistry::builtin();
        let schema = registry.get("create_task").unwrap().parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["plan_id", "title"]));
        assert_eq!(
            schema["properties"]["priority"]["enum"],
            json!(["low", "medium", "high"])
        );
        assert_eq!(schema["properties"]["title"]["type"], "string");
    }

    #[test]
    fn bulk_schema_nests_item_object() {
        let registry = FunctionRegistry::builtin();
        let schema = registry.get("create_tasks_bulk").unwrap().parameters_schema();
        let items = &schema["properties"]["tasks"]["items"];
        assert_eq!(schema["properties"]["tasks"]["type"], "array");
        assert_eq!(items["required"], json!(["title"]));
        assert_eq!(
            items["properties"]["status"]["enum"],
            json!(["pending", "in_progress", "completed", "cancelled"])
        );
    }

    #[test]
    fn plan_status_schema_hides_alias() {
        let registry = FunctionRegistry::builtin();
        let schema = registry.get("list_plans_by_status").unwrap().parameters_schema();
        let values = schema["properties"]["status"]["enum"].as_array().unwrap();
        assert!(!values.iter().any(|v| v == "inprogress"));
    }

    #[test]
    fn catalog_preserves_registration_order() {
        let registry = FunctionRegistry::builtin();
        let catalog = registry.catalog();
        assert_eq!(catalog.len(), registry.len());
        assert_eq!(catalog[0].name, "create_plan");
        assert_eq!(catalog.last().unwrap().name, "reorder_task");
    }

    #[test]
    fn duplicate_names_replace() {
        let first = FunctionDef {
            name: "f",
            description: "one",
            params: &[],
        };
        let second = FunctionDef {
            description: "two",
            ..first
        };
        let registry = FunctionRegistry::new([first, second]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("f").unwrap().description, "two");
        assert!(!registry.is_empty());
    }
}
