//! Handler definitions for Plait.
//!
//! Handlers are deferred tasks registered by other tasks via `notify`.
//! They execute only at designated flush points — the synthetic
//! `meta: flush_handlers` tasks the iterator places in every host's task
//! stream — and at most once per play regardless of how many times they
//! were notified. Running them (and coordinating the all-hosts barrier at
//! each flush point) is the execution strategy's job; this crate parses
//! them and exposes the trigger-name mapping the strategy needs.

use std::sync::Arc;

use crate::error::Result;
use crate::playbook::HandlerDef;
use crate::tasks::Task;

/// A compiled handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    /// Handler name (matched against `notify` entries)
    pub name: String,
    /// The task executed when the handler fires
    pub task: Arc<Task>,
    /// Additional notification names this handler responds to
    pub listen: Vec<String>,
}

impl Handler {
    /// Compiles a raw handler definition.
    pub(crate) fn from_def(def: &HandlerDef) -> Result<Self> {
        let mut task = Task::from_def(&def.task, None, None)?;
        if task.name.is_empty() {
            task.name = def.name.clone();
        }
        Ok(Self {
            name: def.name.clone(),
            task: Arc::new(task),
            listen: def.listen.clone(),
        })
    }

    /// Returns all names this handler responds to.
    pub fn trigger_names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        names.extend(self.listen.iter().map(String::as_str));
        names
    }

    /// Returns true if a notification with the given name triggers this
    /// handler.
    pub fn responds_to(&self, name: &str) -> bool {
        self.name == name || self.listen.iter().any(|l| l == name)
    }
}
