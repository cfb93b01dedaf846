//! Playbook definitions and parsing.
//!
//! This module provides types for representing playbooks with type-safe
//! definitions and validation: a [`Playbook`] is a list of [`Play`]s, each
//! play maps a host pattern to ordered task phases (`pre_tasks`, roles,
//! `tasks`, `post_tasks`) plus handlers.
//!
//! These are the YAML-facing *definitions*; the executable form consumed
//! by the iterator is produced by [`compile_play`](crate::block::compile_play).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};

/// Raw variables as parsed from YAML.
pub type Vars = IndexMap<String, serde_yaml::Value>;

/// A playbook containing one or more plays.
///
/// Playbooks are the top-level configuration files in Plait. They contain
/// a list of plays that define the automation workflow. On the wire a
/// playbook is a bare YAML list of plays, so loading goes through
/// [`from_yaml`](Self::from_yaml) rather than a serde derive.
#[derive(Debug, Clone)]
pub struct Playbook {
    /// Name of the playbook (optional, derived from filename if not set)
    pub name: Option<String>,

    /// The plays in this playbook
    pub plays: Vec<Play>,

    /// Path to the playbook file (set during loading)
    pub source_path: Option<PathBuf>,
}

impl Playbook {
    /// Loads a playbook from a YAML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::playbook_parse(path, format!("Failed to read file: {}", e), None)
        })?;

        Self::from_yaml(&content, Some(path.to_path_buf()))
    }

    /// Parses a playbook from a YAML string.
    pub fn from_yaml(yaml: &str, source_path: Option<PathBuf>) -> Result<Self> {
        // Playbooks are a list of plays at the top level
        let plays: Vec<Play> = serde_yaml::from_str(yaml).map_err(|e| {
            Error::playbook_parse(
                source_path.as_ref().map_or("<string>".into(), |p| p.clone()),
                e.to_string(),
                None,
            )
        })?;

        let name = source_path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string());

        info!(
            plays = plays.len(),
            path = %source_path.as_deref().unwrap_or(Path::new("<string>")).display(),
            "loaded playbook"
        );

        Ok(Self {
            name,
            plays,
            source_path,
        })
    }

    /// Validates the playbook structure.
    pub fn validate(&self) -> Result<()> {
        if self.plays.is_empty() {
            return Err(Error::PlaybookValidation(
                "Playbook must contain at least one play".to_string(),
            ));
        }

        for (idx, play) in self.plays.iter().enumerate() {
            play.validate().map_err(|e| {
                Error::PlaybookValidation(format!("Play {} validation failed: {}", idx + 1, e))
            })?;
        }

        Ok(())
    }

    /// Returns the number of plays.
    pub fn play_count(&self) -> usize {
        self.plays.len()
    }
}

/// A play within a playbook.
///
/// A play maps a selection of hosts to tasks to be executed on those hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    /// Name of the play
    #[serde(default)]
    pub name: String,

    /// Host pattern to match against the host list
    pub hosts: String,

    /// Whether to gather facts before executing tasks
    #[serde(default = "default_gather_facts")]
    pub gather_facts: bool,

    /// Variables for this play
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,

    /// Pre-tasks to run before roles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_tasks: Vec<TaskDef>,

    /// Roles to apply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleDef>,

    /// Tasks to run after roles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskDef>,

    /// Post-tasks to run after tasks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_tasks: Vec<TaskDef>,

    /// Handlers that can be notified
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<HandlerDef>,

    /// Whether to run handlers even for failed hosts
    #[serde(default)]
    pub force_handlers: bool,

    /// Tags applying to every task in the play
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_gather_facts() -> bool {
    true
}

impl Play {
    /// Creates a new play with the given name and host pattern.
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            gather_facts: true,
            vars: Vars::new(),
            pre_tasks: Vec::new(),
            roles: Vec::new(),
            tasks: Vec::new(),
            post_tasks: Vec::new(),
            handlers: Vec::new(),
            force_handlers: false,
            tags: Vec::new(),
        }
    }

    /// Validates the play structure.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::PlaybookValidation(
                "Play must specify hosts".to_string(),
            ));
        }

        for task in self.all_task_defs() {
            task.validate()?;
        }

        for handler in &self.handlers {
            if handler.name.is_empty() {
                return Err(Error::PlaybookValidation(
                    "Handler must have a name".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Returns an iterator over all task definitions in phase order
    /// (pre_tasks, role tasks, tasks, post_tasks).
    pub fn all_task_defs(&self) -> impl Iterator<Item = &TaskDef> {
        self.pre_tasks
            .iter()
            .chain(self.roles.iter().flat_map(|r| r.tasks.iter()))
            .chain(self.tasks.iter())
            .chain(self.post_tasks.iter())
    }
}

/// A role applied by a play.
///
/// Role tasks are carried inline: loading a role's task list from its
/// on-disk layout belongs to the calling tool, not to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDef {
    /// Role name
    pub role: String,

    /// Tasks contributed by the role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskDef>,

    /// Tags applied to every task of the role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Role variables
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,
}

/// A task definition: either a unit of work invoking a module, or a
/// block grouping further tasks with optional rescue/always sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDef {
    /// Task name
    #[serde(default)]
    pub name: String,

    /// Module invocation: the one unrecognized key is the module name,
    /// its value the module arguments.
    #[serde(flatten)]
    pub module: IndexMap<String, serde_yaml::Value>,

    /// Conditional execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<When>,

    /// Loop over items
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<serde_yaml::Value>,

    /// Register result in a variable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,

    /// Handlers to notify on change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,

    /// Whether a failure of this task should be ignored
    #[serde(default)]
    pub ignore_errors: bool,

    /// Tags for filtering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Task-level variables
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,

    /// Whether an include should be resolved at compile time.
    /// `None` leaves the decision to the compile heuristic.
    #[serde(rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_include: Option<bool>,

    /// Main section of a block
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block: Vec<TaskDef>,

    /// Rescue section, run only if the block's main section failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rescue: Vec<TaskDef>,

    /// Always section, run unconditionally after main (and rescue)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub always: Vec<TaskDef>,
}

/// Keys that are task attributes rather than module names. Anything else
/// appearing at the top level of a task mapping is treated as the module
/// invocation.
const NON_MODULE_KEYS: &[&str] = &[
    "name",
    "when",
    "loop",
    "register",
    "notify",
    "ignore_errors",
    "tags",
    "vars",
    "static",
    "block",
    "rescue",
    "always",
];

impl TaskDef {
    /// Creates a new task definition invoking the given module.
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        args: serde_yaml::Value,
    ) -> Self {
        let mut def = Self {
            name: name.into(),
            ..Default::default()
        };
        def.module.insert(module.into(), args);
        def
    }

    /// Returns true if this definition is a block.
    pub fn is_block(&self) -> bool {
        !self.block.is_empty() || !self.rescue.is_empty() || !self.always.is_empty()
    }

    /// Returns the module name being invoked, if any.
    pub fn module_name(&self) -> Option<&str> {
        self.module
            .keys()
            .map(String::as_str)
            .find(|k| !NON_MODULE_KEYS.contains(k) && !k.starts_with("with_"))
    }

    /// Returns the module arguments.
    pub fn module_args(&self) -> Option<&serde_yaml::Value> {
        self.module_name().and_then(|name| self.module.get(name))
    }

    /// Returns true if this definition is an include directive.
    pub fn is_include(&self) -> bool {
        matches!(
            self.module_name(),
            Some("include") | Some("include_tasks")
        )
    }

    /// Validates the task definition.
    pub fn validate(&self) -> Result<()> {
        if self.is_block() {
            if self.module_name().is_some() {
                return Err(Error::PlaybookValidation(format!(
                    "Task '{}' mixes a block with a module invocation",
                    self.name
                )));
            }
            for t in self
                .block
                .iter()
                .chain(self.rescue.iter())
                .chain(self.always.iter())
            {
                t.validate()?;
            }
            return Ok(());
        }

        if self.module_name().is_none() {
            return Err(Error::PlaybookValidation(format!(
                "Task '{}' must specify a module",
                self.name
            )));
        }

        if self.static_include.is_some() && !self.is_include() {
            return Err(Error::PlaybookValidation(format!(
                "Task '{}' sets 'static' but is not an include",
                self.name
            )));
        }

        Ok(())
    }
}

/// Conditional expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum When {
    /// Single condition
    Single(String),
    /// Multiple conditions (AND)
    Multiple(Vec<String>),
}

impl When {
    /// Returns the conditions as owned strings.
    pub fn conditions(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::Multiple(v) => v.clone(),
        }
    }
}

/// A handler definition (special task triggered by notifications).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerDef {
    /// Handler name (must match `notify` entries in tasks)
    pub name: String,

    /// The task to execute when triggered
    #[serde(flatten)]
    pub task: TaskDef,

    /// Additional notification names this handler listens to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_playbook() {
        let yaml = r#"
- name: Test Play
  hosts: all
  tasks:
    - name: Echo hello
      command: echo hello
"#;
        let playbook = Playbook::from_yaml(yaml, None).unwrap();
        assert_eq!(playbook.plays.len(), 1);
        assert_eq!(playbook.plays[0].name, "Test Play");
        assert_eq!(playbook.plays[0].tasks.len(), 1);
        assert_eq!(playbook.plays[0].tasks[0].module_name(), Some("command"));
    }

    #[test]
    fn test_parse_block_with_rescue_and_always() {
        let yaml = r#"
- name: Risky
  block:
    - name: Attempt
      command: /bin/might-fail
  rescue:
    - name: Recover
      debug:
        msg: rescued
  always:
    - name: Cleanup
      debug:
        msg: done
"#;
        let tasks: Vec<TaskDef> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].is_block());
        assert_eq!(tasks[0].block.len(), 1);
        assert_eq!(tasks[0].rescue.len(), 1);
        assert_eq!(tasks[0].always.len(), 1);
    }

    #[test]
    fn test_module_name_skips_task_attributes() {
        let yaml = r#"
name: With attrs
debug:
  msg: hi
tags: [a, b]
notify: [restart thing]
"#;
        let task: TaskDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.module_name(), Some("debug"));
        assert_eq!(task.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_when_single_or_list() {
        let single: TaskDef = serde_yaml::from_str("{debug: {msg: x}, when: cond_a}").unwrap();
        assert_eq!(
            single.when.as_ref().unwrap().conditions(),
            vec!["cond_a".to_string()]
        );

        let multi: TaskDef =
            serde_yaml::from_str("{debug: {msg: x}, when: [cond_a, cond_b]}").unwrap();
        assert_eq!(multi.when.as_ref().unwrap().conditions().len(), 2);
    }

    #[test]
    fn test_validate_rejects_block_with_module() {
        let yaml = r#"
name: Broken
debug:
  msg: hi
block:
  - debug:
      msg: nested
"#;
        let task: TaskDef = serde_yaml::from_str(yaml).unwrap();
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_taskless_module() {
        let task: TaskDef = serde_yaml::from_str("{name: Empty}").unwrap();
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_static_on_non_include() {
        let yaml = "{name: Bad, debug: {msg: x}, static: true}";
        let task: TaskDef = serde_yaml::from_str(yaml).unwrap();
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_play_validate_requires_hosts() {
        let mut play = Play::new("p", "");
        assert!(play.validate().is_err());
        play.hosts = "all".to_string();
        assert!(play.validate().is_ok());
    }
}
