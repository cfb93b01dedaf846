//! Compiled block tree.
//!
//! A play compiles into an ordered list of [`Block`]s, each holding three
//! regions of entries — `main`, `rescue`, `always` — where every entry is
//! either a task or a nested block. The tree is built once, shared
//! read-only across all per-host cursors, and never mutated afterwards:
//! dynamic task insertion replaces a block with a copy at the host-state
//! level instead.
//!
//! Compilation wraps bare tasks in implicit blocks (consecutive bare
//! tasks share one), expands static includes, prunes tag-filtered tasks,
//! and inserts a synthetic `meta: flush_handlers` block between
//! consecutive non-empty phases; the play's final flush is emitted by the
//! iterator itself when a host exhausts its blocks.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{Error, Result};
use crate::include::IncludeLoader;
use crate::playbook::{Play, TaskDef};
use crate::roles::Role;
use crate::tags::TagFilter;
use crate::tasks::{compile_vars, Task, TaskInclude};

/// One slot of a block region: a task or a nested block, never both.
#[derive(Debug, Clone)]
pub enum BlockEntry {
    /// A unit of work
    Task(Arc<Task>),
    /// A nested block
    Block(Arc<Block>),
}

/// A compiled group of tasks with optional rescue/always regions,
/// analogous to try/except/finally.
#[derive(Debug, Clone)]
pub struct Block {
    /// Main region, run first
    pub main: Vec<BlockEntry>,
    /// Rescue region, run only if the main region failed on this host
    pub rescue: Vec<BlockEntry>,
    /// Always region, run unconditionally after main (and rescue)
    pub always: Vec<BlockEntry>,
    /// True for synthetic wrappers created around bare tasks
    pub implicit: bool,
    /// Tags inherited by every task in the block
    pub tags: Vec<String>,
    /// Block-level variables
    pub vars: IndexMap<String, JsonValue>,
    /// Enclosing block; upward-only, non-owning
    pub(crate) parent: OnceCell<Weak<Block>>,
}

impl Block {
    fn empty(implicit: bool) -> Self {
        Self {
            main: Vec::new(),
            rescue: Vec::new(),
            always: Vec::new(),
            implicit,
            tags: Vec::new(),
            vars: IndexMap::new(),
            parent: OnceCell::new(),
        }
    }

    /// The synthetic handler-flush block inserted between play phases.
    pub(crate) fn flush_handlers() -> Self {
        let mut block = Self::empty(true);
        block
            .main
            .push(BlockEntry::Task(Arc::new(Task::flush_handlers())));
        block
    }

    /// The enclosing block, if this block is nested.
    pub fn parent_block(&self) -> Option<Arc<Block>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// Returns true if any region holds at least one entry.
    pub fn has_tasks(&self) -> bool {
        !(self.main.is_empty() && self.rescue.is_empty() && self.always.is_empty())
    }
}

/// Options steering play compilation.
#[derive(Default)]
pub struct CompileOptions<'a> {
    /// Tag selection applied while compiling; pruned tasks never reach
    /// any host's stream.
    pub tags: TagFilter,
    /// Source for statically-resolved includes. Without a loader every
    /// include is left dynamic.
    pub include_loader: Option<&'a dyn IncludeLoader>,
}

/// Compiles a play's phases into the ordered block list the iterator
/// walks. Phase order is fixed: `pre_tasks`, role tasks, `tasks`,
/// `post_tasks`, with a handler-flush block between consecutive
/// non-empty phases.
pub fn compile_play(play: &Play, options: &CompileOptions<'_>) -> Result<Vec<Arc<Block>>> {
    let mut phases: Vec<Vec<Block>> = Vec::with_capacity(4);

    phases.push(load_list_of_blocks(&play.pre_tasks, None, None, options)?);

    let mut role_blocks = Vec::new();
    for role_def in &play.roles {
        let role = Arc::new(Role {
            name: role_def.role.clone(),
            tags: role_def.tags.clone(),
        });
        role_blocks.extend(load_list_of_blocks(
            &role_def.tasks,
            Some(&role),
            None,
            options,
        )?);
    }
    phases.push(role_blocks);

    phases.push(load_list_of_blocks(&play.tasks, None, None, options)?);
    phases.push(load_list_of_blocks(&play.post_tasks, None, None, options)?);

    if options.tags.is_active() {
        let play_tags = play.tags.clone();
        for phase in &mut phases {
            *phase = phase
                .iter()
                .filter_map(|b| filter_block(b, &options.tags, &play_tags))
                .collect();
        }
    }

    let mut blocks: Vec<Arc<Block>> = Vec::new();
    for phase in phases.into_iter().filter(|p| !p.is_empty()) {
        if !blocks.is_empty() {
            blocks.push(Arc::new(Block::flush_handlers()));
        }
        blocks.extend(phase.into_iter().map(Arc::new));
    }

    for block in &blocks {
        link_parents(block);
    }

    debug!(blocks = blocks.len(), play = %play.name, "compiled play");
    Ok(blocks)
}

/// Turns a phase's task definitions into blocks: explicit block
/// definitions become explicit blocks, runs of consecutive bare tasks
/// share a single implicit wrapper block.
fn load_list_of_blocks(
    defs: &[TaskDef],
    role: Option<&Arc<Role>>,
    task_include: Option<&Arc<TaskInclude>>,
    options: &CompileOptions<'_>,
) -> Result<Vec<Block>> {
    let mut out = Vec::new();
    let mut pending = Block::empty(true);

    for def in defs {
        if def.is_block() {
            if pending.has_tasks() {
                out.push(std::mem::replace(&mut pending, Block::empty(true)));
            }
            let block = load_block(def, role, task_include, options)?;
            if block.has_tasks() {
                out.push(block);
            }
        } else {
            load_entry(def, &mut pending.main, role, task_include, options)?;
        }
    }
    if pending.has_tasks() {
        out.push(pending);
    }

    Ok(out)
}

/// Compiles an explicit block definition.
fn load_block(
    def: &TaskDef,
    role: Option<&Arc<Role>>,
    task_include: Option<&Arc<TaskInclude>>,
    options: &CompileOptions<'_>,
) -> Result<Block> {
    let mut block = Block::empty(false);
    block.tags = def.tags.clone();
    block.vars = compile_vars(&def.vars)?;
    for d in &def.block {
        load_entry(d, &mut block.main, role, task_include, options)?;
    }
    for d in &def.rescue {
        load_entry(d, &mut block.rescue, role, task_include, options)?;
    }
    for d in &def.always {
        load_entry(d, &mut block.always, role, task_include, options)?;
    }
    Ok(block)
}

/// Compiles one task definition into entries of a region: a nested block,
/// the expansion of a static include, or a single task.
fn load_entry(
    def: &TaskDef,
    entries: &mut Vec<BlockEntry>,
    role: Option<&Arc<Role>>,
    task_include: Option<&Arc<TaskInclude>>,
    options: &CompileOptions<'_>,
) -> Result<()> {
    if def.is_block() {
        let block = load_block(def, role, task_include, options)?;
        if block.has_tasks() {
            entries.push(BlockEntry::Block(Arc::new(block)));
        }
        return Ok(());
    }

    if def.is_include() {
        let target = include_target(def)?;
        let is_static = match def.static_include {
            Some(explicit) => explicit,
            None => match options.include_loader {
                Some(loader) => def.loop_spec.is_none() && !loader.contains_vars(&target),
                None => false,
            },
        };

        if is_static {
            if def.loop_spec.is_some() {
                return Err(Error::PlaybookValidation(
                    "Cannot use 'static' on an include with a loop".to_string(),
                ));
            }
            let loader = options.include_loader.ok_or_else(|| {
                Error::PlaybookValidation(format!(
                    "Static include '{}' requires an include loader",
                    target
                ))
            })?;
            let included = loader.load_tasks(&target)?;
            let include = Arc::new(TaskInclude {
                target: target.clone(),
                vars: include_params(def)?,
                static_include: def.static_include,
            });
            debug!(target = %target, tasks = included.len(), "expanded static include");
            let blocks = load_list_of_blocks(&included, role, Some(&include), options)?;
            entries.extend(blocks.into_iter().map(|b| BlockEntry::Block(Arc::new(b))));
            return Ok(());
        }
    }

    let task = Task::from_def(def, role.cloned(), task_include.cloned())?;
    entries.push(BlockEntry::Task(Arc::new(task)));
    Ok(())
}

/// Extracts the include target from an include directive's arguments:
/// either a bare string or a mapping with a `file` key.
fn include_target(def: &TaskDef) -> Result<String> {
    match def.module_args() {
        Some(serde_yaml::Value::String(s)) => Ok(s.clone()),
        Some(serde_yaml::Value::Mapping(m)) => m
            .get("file")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::PlaybookValidation(format!(
                    "Include task '{}' has no 'file' argument",
                    def.name
                ))
            }),
        _ => Err(Error::PlaybookValidation(format!(
            "Include task '{}' has no target",
            def.name
        ))),
    }
}

/// Parameters an include passes to the tasks it expands into: the
/// directive's vars plus its non-target arguments.
fn include_params(def: &TaskDef) -> Result<IndexMap<String, JsonValue>> {
    let mut params = compile_vars(&def.vars)?;
    if let Some(serde_yaml::Value::Mapping(m)) = def.module_args() {
        for (k, v) in m {
            let Some(key) = k.as_str() else { continue };
            if key == "file" {
                continue;
            }
            params.insert(key.to_string(), crate::tasks::yaml_to_json(v)?);
        }
    }
    Ok(params)
}

/// Rebuilds a block with tag-pruned regions; `None` when nothing is left.
/// Task entries keep their identity (the same `Arc`) so template lookups
/// keep working on filtered trees.
fn filter_block(block: &Block, filter: &TagFilter, parent_tags: &[String]) -> Option<Block> {
    let mut inherited = parent_tags.to_vec();
    for tag in &block.tags {
        if !inherited.contains(tag) {
            inherited.push(tag.clone());
        }
    }

    let filter_region = |entries: &[BlockEntry]| -> Vec<BlockEntry> {
        entries
            .iter()
            .filter_map(|entry| match entry {
                BlockEntry::Task(task) => {
                    let mut tags = task.tags.clone();
                    for tag in inherited
                        .iter()
                        .chain(task.role.iter().flat_map(|r| r.tags.iter()))
                    {
                        if !tags.contains(tag) {
                            tags.push(tag.clone());
                        }
                    }
                    (task.is_meta() || filter.should_run(&tags))
                        .then(|| BlockEntry::Task(Arc::clone(task)))
                }
                BlockEntry::Block(nested) => filter_block(nested, filter, &inherited)
                    .map(|b| BlockEntry::Block(Arc::new(b))),
            })
            .collect()
    };

    let filtered = Block {
        main: filter_region(&block.main),
        rescue: filter_region(&block.rescue),
        always: filter_region(&block.always),
        implicit: block.implicit,
        tags: block.tags.clone(),
        vars: block.vars.clone(),
        parent: OnceCell::new(),
    };

    filtered.has_tasks().then_some(filtered)
}

/// Sets the upward back-references of everything under a block.
fn link_parents(block: &Arc<Block>) {
    let weak = Arc::downgrade(block);
    for entry in block
        .main
        .iter()
        .chain(block.rescue.iter())
        .chain(block.always.iter())
    {
        match entry {
            BlockEntry::Task(task) => {
                let _ = task.parent.set(weak.clone());
            }
            BlockEntry::Block(nested) => {
                let _ = nested.parent.set(weak.clone());
                link_parents(nested);
            }
        }
    }
}
