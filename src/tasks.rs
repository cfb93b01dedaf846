//! Compiled task representation.
//!
//! This module provides the executable form of a task: module arguments
//! resolved to ordered JSON values, provenance links back to the role and
//! include directive the task came from, and a non-owning back-reference
//! to the block that contains it.
//!
//! Task identity is structural. The iterator hands out per-host *copies*
//! of template tasks (so per-host mutation, such as include-parameter
//! injection, never touches the shared tree), and a copy must still be
//! matchable back to its template. Equality therefore covers the defining
//! attributes only; `vars` is excluded because it is the one field the
//! iterator rewrites on copies.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde_json::Value as JsonValue;

use crate::block::Block;
use crate::error::Result;
use crate::playbook::{TaskDef, Vars};
use crate::roles::Role;

/// Action name of synthetic meta tasks.
pub const META_ACTION: &str = "meta";

/// Raw parameter of the handler-flush meta task.
pub const FLUSH_HANDLERS: &str = "flush_handlers";

/// Action name of the synthesized fact-gathering task.
pub const SETUP_ACTION: &str = "setup";

/// Converts a raw YAML value into the compiled JSON form.
pub(crate) fn yaml_to_json(value: &serde_yaml::Value) -> Result<JsonValue> {
    Ok(serde_json::to_value(value)?)
}

/// Converts raw vars into compiled argument form.
pub(crate) fn compile_vars(vars: &Vars) -> Result<IndexMap<String, JsonValue>> {
    vars.iter()
        .map(|(k, v)| Ok((k.clone(), yaml_to_json(v)?)))
        .collect()
}

/// A compiled task: one unit of work in a play.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task name (displayed during execution)
    pub name: String,
    /// Action (module) to execute
    pub action: String,
    /// Module arguments
    pub args: IndexMap<String, JsonValue>,
    /// Conditional guard expressions (all must hold)
    pub when: Vec<String>,
    /// Tags set directly on the task
    pub tags: Vec<String>,
    /// Task-level variables. Mutated on per-host copies; never part of
    /// task identity.
    pub vars: IndexMap<String, JsonValue>,
    /// Handlers to notify on change
    pub notify: Vec<String>,
    /// Loop specification, if the task loops over items
    pub loop_spec: Option<JsonValue>,
    /// Role this task was sourced from
    pub role: Option<Arc<Role>>,
    /// Include directive this task was expanded from
    pub task_include: Option<Arc<TaskInclude>>,
    /// Containing block; upward-only, non-owning
    pub(crate) parent: OnceCell<Weak<Block>>,
}

impl Task {
    /// Creates a new task with the given name and action. Used for
    /// dynamically synthesized tasks; compiled tasks come from
    /// [`TaskDef`]s.
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            args: IndexMap::new(),
            when: Vec::new(),
            tags: Vec::new(),
            vars: IndexMap::new(),
            notify: Vec::new(),
            loop_spec: None,
            role: None,
            task_include: None,
            parent: OnceCell::new(),
        }
    }

    /// Adds an argument to the task.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Compiles a raw task definition.
    pub(crate) fn from_def(
        def: &TaskDef,
        role: Option<Arc<Role>>,
        task_include: Option<Arc<TaskInclude>>,
    ) -> Result<Self> {
        let action = def
            .module_name()
            .unwrap_or_default()
            .to_string();
        let args = match def.module_args() {
            Some(serde_yaml::Value::Mapping(m)) => m
                .iter()
                .map(|(k, v)| {
                    Ok((
                        k.as_str().unwrap_or_default().to_string(),
                        yaml_to_json(v)?,
                    ))
                })
                .collect::<Result<IndexMap<_, _>>>()?,
            Some(serde_yaml::Value::Null) | None => IndexMap::new(),
            // free-form arguments ("command: echo hello")
            Some(other) => {
                let mut args = IndexMap::new();
                args.insert("_raw_params".to_string(), yaml_to_json(other)?);
                args
            }
        };

        Ok(Self {
            name: def.name.clone(),
            action,
            args,
            when: def.when.as_ref().map(|w| w.conditions()).unwrap_or_default(),
            tags: def.tags.clone(),
            vars: compile_vars(&def.vars)?,
            notify: def.notify.clone(),
            loop_spec: def.loop_spec.as_ref().map(yaml_to_json).transpose()?,
            role,
            task_include,
            parent: OnceCell::new(),
        })
    }

    /// Creates the synthetic `meta: flush_handlers` task that marks a
    /// handler synchronization point in a host's task stream.
    pub fn flush_handlers() -> Self {
        let mut args = IndexMap::new();
        args.insert(
            "_raw_params".to_string(),
            JsonValue::String(FLUSH_HANDLERS.to_string()),
        );
        Self {
            name: String::new(),
            action: META_ACTION.to_string(),
            args,
            when: Vec::new(),
            tags: Vec::new(),
            vars: IndexMap::new(),
            notify: Vec::new(),
            loop_spec: None,
            role: None,
            task_include: None,
            parent: OnceCell::new(),
        }
    }

    /// Creates the synthesized fact-gathering task emitted by the setup
    /// phase when the play enables it.
    pub fn gather_facts() -> Self {
        Self {
            name: "Gathering Facts".to_string(),
            action: SETUP_ACTION.to_string(),
            args: IndexMap::new(),
            when: Vec::new(),
            tags: Vec::new(),
            vars: IndexMap::new(),
            notify: Vec::new(),
            loop_spec: None,
            role: None,
            task_include: None,
            parent: OnceCell::new(),
        }
    }

    /// Returns true if this is a meta task, interpreted by the execution
    /// layer rather than dispatched to a host.
    pub fn is_meta(&self) -> bool {
        self.action == META_ACTION
    }

    /// Returns true if this is a handler-flush synchronization point.
    pub fn is_flush_handlers(&self) -> bool {
        self.is_meta()
            && self
                .args
                .get("_raw_params")
                .and_then(JsonValue::as_str)
                .map_or(false, |p| p == FLUSH_HANDLERS)
    }

    /// Returns true if this task is a dynamic include directive.
    pub fn is_dynamic_include(&self) -> bool {
        matches!(self.action.as_str(), "include" | "include_tasks")
    }

    /// The block containing this task, if it is part of a compiled tree.
    pub fn parent_block(&self) -> Option<Arc<Block>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// All tags applying to this task: its own plus those inherited from
    /// enclosing blocks and its role.
    pub fn inherited_tags(&self) -> Vec<String> {
        let mut tags = self.tags.clone();
        let mut cursor = self.parent_block();
        while let Some(block) = cursor {
            for tag in &block.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            cursor = block.parent_block();
        }
        if let Some(role) = &self.role {
            for tag in &role.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }
        tags
    }

    /// Name used for display and start-at-task matching.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.action
        } else {
            &self.name
        }
    }
}

// Identity over defining attributes: a per-host copy (possibly with
// injected vars) must compare equal to its template, while two genuinely
// different tasks must not.
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.action == other.action
            && self.args == other.args
            && self.when == other.when
            && self.tags == other.tags
            && self.notify == other.notify
            && self.loop_spec == other.loop_spec
            && self.role.as_ref().map(|r| r.name.as_str())
                == other.role.as_ref().map(|r| r.name.as_str())
    }
}

impl Eq for Task {}

/// An include directive that was resolved at compile time.
///
/// Tasks expanded from the included file keep a back-reference to this
/// record so the iterator can inject the include's parameters into each
/// per-host task copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInclude {
    /// The include target as written
    pub target: String,
    /// Variables passed on the include directive
    pub vars: IndexMap<String, JsonValue>,
    /// Tri-state static flag: explicit true/false, or `None` to let the
    /// compile heuristic decide
    pub static_include: Option<bool>,
}

impl TaskInclude {
    /// Variables the include contributes to each task expanded from it:
    /// the directive's vars (its parameters to the included tasks).
    pub fn include_vars(&self) -> &IndexMap<String, JsonValue> {
        &self.vars
    }
}
