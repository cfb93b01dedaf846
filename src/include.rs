//! Task inclusion for compile-time (static) include resolution.
//!
//! An include directive is either resolved at compile time — its target
//! loaded and expanded into blocks before iteration starts — or left in
//! the tree as a dynamic task that the execution layer expands at runtime
//! via [`PlayIterator::add_tasks`](crate::executor::PlayIterator::add_tasks).
//!
//! The decision follows the directive's tri-state `static` flag; when the
//! flag is unset, an include is static exactly when its target names no
//! unresolved variables and the directive does not loop. Deciding
//! "contains unresolved variables" is the templating engine's business,
//! which is out of scope here, so the probe lives on the loader trait
//! with a conservative default.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::playbook::TaskDef;

/// Source of included task lists, consulted at compile time for static
/// includes.
pub trait IncludeLoader {
    /// Loads the task list for an include target.
    fn load_tasks(&self, target: &str) -> Result<Vec<TaskDef>>;

    /// Whether an include target references variables that cannot be
    /// resolved at compile time. Used to decide staticness when the
    /// directive does not say.
    fn contains_vars(&self, target: &str) -> bool {
        target.contains("{{")
    }
}

/// An [`IncludeLoader`] over in-memory YAML documents, keyed by target
/// name. Useful for tests and for callers that resolve files themselves.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIncludes {
    files: IndexMap<String, String>,
}

impl InMemoryIncludes {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a YAML task list under a target name.
    pub fn insert(&mut self, target: impl Into<String>, yaml: impl Into<String>) {
        self.files.insert(target.into(), yaml.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, target: impl Into<String>, yaml: impl Into<String>) -> Self {
        self.insert(target, yaml);
        self
    }
}

impl IncludeLoader for InMemoryIncludes {
    fn load_tasks(&self, target: &str) -> Result<Vec<TaskDef>> {
        let yaml = self
            .files
            .get(target)
            .ok_or_else(|| Error::IncludeNotFound(target.to_string()))?;
        Ok(serde_yaml::from_str(yaml)?)
    }
}
