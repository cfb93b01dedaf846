//! Fleet-wide play iteration.
//!
//! [`PlayIterator`] owns the compiled block tree and one [`HostState`]
//! per target host, and answers "what is the next unit of work for host
//! H". Hosts progress independently — a slow host may still be on its
//! third task while a fast one is on its eighth — so every host gets a
//! private cursor, and the iterator is the sole mutator of those
//! cursors.
//!
//! The iterator performs no I/O and never blocks. The calling execution
//! strategy dispatches each yielded task, reports failures back via
//! [`mark_host_failed`](PlayIterator::mark_host_failed), and implements
//! the all-hosts barrier at each `meta: flush_handlers` task the
//! iterator places in the streams.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info, trace, warn};

use crate::block::{compile_play, Block, BlockEntry, CompileOptions};
use crate::error::{Error, Result};
use crate::executor::host_state::{FailState, HostState, RunState};
use crate::handlers::Handler;
use crate::playbook::Play;
use crate::tasks::Task;

/// Options steering a play iteration.
#[derive(Default)]
pub struct PlayIteratorOptions<'a> {
    /// Compile-time options: tag selection and static include source
    pub compile: CompileOptions<'a>,
    /// Fast-forward every host to the task with this name before
    /// iteration starts
    pub start_at_task: Option<String>,
}

/// Walks a compiled play for a fleet of hosts, one private cursor per
/// host.
#[derive(Debug)]
pub struct PlayIterator {
    blocks: Vec<Arc<Block>>,
    host_states: IndexMap<String, HostState>,
    handlers: Vec<Handler>,
    gather_facts: bool,
    force_handlers: bool,
}

impl PlayIterator {
    /// Compiles the play and builds one initial host state per host, all
    /// in the setup phase pointed at block 0.
    pub fn new(play: &Play, hosts: &[String], options: PlayIteratorOptions<'_>) -> Result<Self> {
        play.validate()?;
        let blocks = compile_play(play, &options.compile)?;
        let handlers = play
            .handlers
            .iter()
            .map(Handler::from_def)
            .collect::<Result<Vec<_>>>()?;

        let mut host_states = IndexMap::with_capacity(hosts.len());
        for host in hosts {
            host_states.insert(host.clone(), HostState::new(blocks.clone()));
        }

        let mut iterator = Self {
            blocks,
            host_states,
            handlers,
            gather_facts: play.gather_facts,
            force_handlers: play.force_handlers,
        };

        info!(
            play = %play.name,
            hosts = hosts.len(),
            blocks = iterator.blocks.len(),
            "play iterator ready"
        );

        if let Some(name) = options.start_at_task.as_deref() {
            iterator.fast_forward_to(name)?;
        }

        Ok(iterator)
    }

    /// The compiled top-level blocks of the play.
    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }

    /// The hosts this iterator tracks, in construction order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.host_states.keys().map(String::as_str)
    }

    /// The play's compiled handlers, for the strategy to run at flush
    /// points.
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Whether handlers should run even for hosts that failed.
    pub fn force_handlers(&self) -> bool {
        self.force_handlers
    }

    /// A copy of a host's current state.
    pub fn get_host_state(&self, host: &str) -> Result<HostState> {
        self.host_states
            .get(host)
            .cloned()
            .ok_or_else(|| Error::HostNotFound(host.to_string()))
    }

    /// Returns the next task for a host together with the host's new
    /// state, or `None` when the host has no work left in this play.
    ///
    /// With `peek` the transition runs on a deep copy and the live
    /// cursor is left untouched.
    pub fn get_next_task_for_host(
        &mut self,
        host: &str,
        peek: bool,
    ) -> Result<(HostState, Option<Task>)> {
        let state = self
            .host_states
            .get(host)
            .ok_or_else(|| Error::HostNotFound(host.to_string()))?;

        let mut next = state.clone();
        let mut task = Self::advance_state(&mut next, self.gather_facts);

        // Every host gets exactly one end-of-play handler flush, failed
        // hosts included, before going quiet.
        if task.is_none() && next.run_state == RunState::Complete && !next.did_flush_final {
            next.did_flush_final = true;
            task = Some(Task::flush_handlers());
        }

        if task.is_some() {
            next.fail_marked = false;
        }

        trace!(
            host,
            peek,
            state = %next.run_state,
            task = task.as_ref().map(Task::display_name).unwrap_or("-"),
            "next task"
        );

        if !peek {
            self.host_states.insert(host.to_string(), next.clone());
        }

        Ok((next, task))
    }

    /// Records a task failure for a host: the fail bit of the active
    /// region is set on the deepest active state, and the cursor is
    /// redirected into the nearest rescue region (then always, then
    /// completion). Idempotent until the next task is fetched.
    pub fn mark_host_failed(&mut self, host: &str) -> Result<()> {
        let state = self
            .host_states
            .get_mut(host)
            .ok_or_else(|| Error::HostNotFound(host.to_string()))?;

        if state.fail_marked {
            trace!(host, "failure already recorded for the current task");
            return Ok(());
        }

        debug!(host, state = %state.run_state, "marking host failed");
        Self::set_failed_state(state);
        state.fail_marked = true;
        Ok(())
    }

    /// Hosts whose failure was not handled by a successful rescue.
    pub fn get_failed_hosts(&self) -> IndexSet<String> {
        self.host_states
            .iter()
            .filter(|(_, state)| Self::check_failed_state(Some(state)))
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Looks a (possibly per-host-mutated) task copy back up in the block
    /// tree walked for the host. Returns `None` for tasks with no
    /// template origin, such as dynamically inserted ones.
    pub fn get_original_task(&self, host: &str, task: &Task) -> Result<Option<Arc<Task>>> {
        if !self.host_states.contains_key(host) {
            return Err(Error::HostNotFound(host.to_string()));
        }

        // Search the shared templates, not the host's block list: blocks
        // rewritten by dynamic insertion hold the synthesized tasks, and
        // those have no template origin by definition.
        for block in &self.blocks {
            if let Some(found) = Self::search_block(block, task) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Inserts tasks to run immediately after the host's
    /// currently-executing task, inside whichever region is presently
    /// active. A no-op for hosts that have already failed terminally.
    pub fn add_tasks(&mut self, host: &str, tasks: Vec<Task>) -> Result<()> {
        let state = self
            .host_states
            .get_mut(host)
            .ok_or_else(|| Error::HostNotFound(host.to_string()))?;

        debug!(host, count = tasks.len(), state = %state.run_state, "inserting tasks");
        Self::insert_tasks_into_state(state, tasks);
        Ok(())
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Runs the transition logic on a state until it produces a task or
    /// exhausts the state's blocks.
    fn advance_state(state: &mut HostState, gather_facts: bool) -> Option<Task> {
        loop {
            let Some(block) = state.get_current_block().cloned() else {
                state.run_state = RunState::Complete;
                return None;
            };

            match state.run_state {
                RunState::Setup => {
                    if !state.pending_setup {
                        state.pending_setup = true;
                        if gather_facts && !state.did_start_at_task {
                            trace!("emitting fact-gathering task");
                            return Some(Task::gather_facts());
                        }
                    } else {
                        state.pending_setup = false;
                        state.run_state = RunState::Tasks;
                    }
                }

                RunState::Tasks => {
                    if state.fail_state.contains(FailState::TASKS) {
                        state.run_state = RunState::Rescue;
                    } else if let Some(mut child) = state.tasks_child_state.take() {
                        let task = Self::advance_state(&mut child, gather_facts);
                        if Self::check_failed_state(Some(&child)) {
                            Self::set_failed_state(state);
                            if task.is_some() {
                                return task;
                            }
                        } else if task.is_none() || child.run_state == RunState::Complete {
                            state.cur_main_task += 1;
                        } else {
                            state.tasks_child_state = Some(child);
                            return task;
                        }
                    } else {
                        match block.main.get(state.cur_main_task) {
                            None => state.run_state = RunState::Always,
                            Some(BlockEntry::Task(task)) => {
                                state.cur_main_task += 1;
                                return Some(Self::host_copy(task));
                            }
                            Some(BlockEntry::Block(nested)) => {
                                state.tasks_child_state =
                                    Some(Box::new(HostState::child(Arc::clone(nested))));
                            }
                        }
                    }
                }

                RunState::Rescue => {
                    if state.fail_state.contains(FailState::RESCUE) {
                        state.run_state = RunState::Always;
                    } else if let Some(mut child) = state.rescue_child_state.take() {
                        let task = Self::advance_state(&mut child, gather_facts);
                        if Self::check_failed_state(Some(&child)) {
                            Self::set_failed_state(state);
                            if task.is_some() {
                                return task;
                            }
                        } else if task.is_none() || child.run_state == RunState::Complete {
                            state.cur_rescue_task += 1;
                        } else {
                            state.rescue_child_state = Some(child);
                            return task;
                        }
                    } else {
                        match block.rescue.get(state.cur_rescue_task) {
                            None => {
                                // A rescue that ran to completion handles
                                // the failure; it does not propagate past
                                // this block.
                                if !block.rescue.is_empty() {
                                    state.fail_state = FailState::NONE;
                                    state.did_rescue = true;
                                }
                                state.run_state = RunState::Always;
                            }
                            Some(BlockEntry::Task(task)) => {
                                state.cur_rescue_task += 1;
                                return Some(Self::host_copy(task));
                            }
                            Some(BlockEntry::Block(nested)) => {
                                state.rescue_child_state =
                                    Some(Box::new(HostState::child(Arc::clone(nested))));
                            }
                        }
                    }
                }

                RunState::Always => {
                    if state.fail_state.contains(FailState::ALWAYS) {
                        state.run_state = RunState::Complete;
                    } else if let Some(mut child) = state.always_child_state.take() {
                        let task = Self::advance_state(&mut child, gather_facts);
                        if Self::check_failed_state(Some(&child)) {
                            Self::set_failed_state(state);
                            if task.is_some() {
                                return task;
                            }
                        } else if task.is_none() || child.run_state == RunState::Complete {
                            state.cur_always_task += 1;
                        } else {
                            state.always_child_state = Some(child);
                            return task;
                        }
                    } else {
                        match block.always.get(state.cur_always_task) {
                            None => {
                                if !state.fail_state.is_clear() {
                                    state.run_state = RunState::Complete;
                                } else {
                                    state.cur_block += 1;
                                    state.cur_main_task = 0;
                                    state.cur_rescue_task = 0;
                                    state.cur_always_task = 0;
                                    state.run_state = RunState::Tasks;
                                    state.tasks_child_state = None;
                                    state.rescue_child_state = None;
                                    state.always_child_state = None;
                                    state.did_rescue = false;
                                }
                            }
                            Some(BlockEntry::Task(task)) => {
                                state.cur_always_task += 1;
                                return Some(Self::host_copy(task));
                            }
                            Some(BlockEntry::Block(nested)) => {
                                state.always_child_state =
                                    Some(Box::new(HostState::child(Arc::clone(nested))));
                            }
                        }
                    }
                }

                RunState::Complete => return None,
            }
        }
    }

    /// Marks the active region of the deepest active state failed and
    /// redirects the cursor: rescue if the block has one, else always,
    /// else completion.
    fn set_failed_state(state: &mut HostState) {
        match state.run_state {
            RunState::Setup => {
                state.fail_state |= FailState::SETUP;
                state.run_state = RunState::Complete;
            }
            RunState::Tasks => {
                if let Some(child) = state.tasks_child_state.as_deref_mut() {
                    Self::set_failed_state(child);
                } else {
                    state.fail_state |= FailState::TASKS;
                    let (has_rescue, has_always) = state
                        .get_current_block()
                        .map_or((false, false), |b| {
                            (!b.rescue.is_empty(), !b.always.is_empty())
                        });
                    state.run_state = if has_rescue {
                        RunState::Rescue
                    } else if has_always {
                        RunState::Always
                    } else {
                        RunState::Complete
                    };
                }
            }
            RunState::Rescue => {
                if let Some(child) = state.rescue_child_state.as_deref_mut() {
                    Self::set_failed_state(child);
                } else {
                    state.fail_state |= FailState::RESCUE;
                    let has_always = state
                        .get_current_block()
                        .map_or(false, |b| !b.always.is_empty());
                    state.run_state = if has_always {
                        RunState::Always
                    } else {
                        RunState::Complete
                    };
                }
            }
            RunState::Always => {
                if let Some(child) = state.always_child_state.as_deref_mut() {
                    Self::set_failed_state(child);
                } else {
                    state.fail_state |= FailState::ALWAYS;
                    state.run_state = RunState::Complete;
                }
            }
            RunState::Complete => {}
        }
    }

    /// Whether a state describes an unhandled failure. A host sitting in
    /// a rescue (or pending always cleanup) is not failed yet: the
    /// verdict is only final once no recovery region remains.
    fn check_failed_state(state: Option<&HostState>) -> bool {
        let Some(state) = state else {
            return false;
        };

        match state.run_state {
            RunState::Rescue
                if Self::check_failed_state(state.rescue_child_state.as_deref()) =>
            {
                return true;
            }
            RunState::Always
                if Self::check_failed_state(state.always_child_state.as_deref()) =>
            {
                return true;
            }
            _ => {}
        }

        if !state.fail_state.is_clear() {
            if state.run_state == RunState::Rescue
                && !state.fail_state.contains(FailState::RESCUE)
            {
                return false;
            }
            if state.run_state == RunState::Always
                && !state.fail_state.contains(FailState::ALWAYS)
            {
                return false;
            }
            return !(state.did_rescue && !state.fail_state.contains(FailState::ALWAYS));
        }

        if state.run_state == RunState::Tasks
            && Self::check_failed_state(state.tasks_child_state.as_deref())
        {
            let has_rescue = state
                .get_current_block()
                .map_or(false, |b| !b.rescue.is_empty());
            return !(has_rescue && !state.fail_state.contains(FailState::RESCUE));
        }

        false
    }

    /// Splices tasks into the active region of the deepest active state,
    /// immediately after the current cursor position. The owning block is
    /// replaced with a copy; the shared template tree is never touched.
    fn insert_tasks_into_state(state: &mut HostState, tasks: Vec<Task>) {
        // Terminally failed hosts get nothing new; a live rescue/always
        // may still schedule follow-up work.
        if !state.fail_state.is_clear()
            && !matches!(state.run_state, RunState::Rescue | RunState::Always)
        {
            return;
        }
        if tasks.is_empty() {
            return;
        }

        match state.run_state {
            RunState::Tasks => {
                if let Some(child) = state.tasks_child_state.as_deref_mut() {
                    Self::insert_tasks_into_state(child, tasks);
                } else {
                    Self::splice_into_current_block(state, tasks, Region::Main);
                }
            }
            RunState::Rescue => {
                if let Some(child) = state.rescue_child_state.as_deref_mut() {
                    Self::insert_tasks_into_state(child, tasks);
                } else {
                    Self::splice_into_current_block(state, tasks, Region::Rescue);
                }
            }
            RunState::Always => {
                if let Some(child) = state.always_child_state.as_deref_mut() {
                    Self::insert_tasks_into_state(child, tasks);
                } else {
                    Self::splice_into_current_block(state, tasks, Region::Always);
                }
            }
            RunState::Setup | RunState::Complete => {}
        }
    }

    fn splice_into_current_block(state: &mut HostState, tasks: Vec<Task>, region: Region) {
        let Some(block) = state.get_current_block() else {
            return;
        };
        let mut updated = (**block).clone();
        let (entries, cursor) = match region {
            Region::Main => (&mut updated.main, state.cur_main_task),
            Region::Rescue => (&mut updated.rescue, state.cur_rescue_task),
            Region::Always => (&mut updated.always, state.cur_always_task),
        };
        let at = cursor.min(entries.len());
        entries.splice(
            at..at,
            tasks.into_iter().map(|t| BlockEntry::Task(Arc::new(t))),
        );
        state.blocks[state.cur_block] = Arc::new(updated);
    }

    /// Per-host copy of a template task. Include parameters are injected
    /// into the copy's vars; the shared template stays untouched.
    fn host_copy(task: &Arc<Task>) -> Task {
        let mut copy = (**task).clone();
        if let Some(include) = copy.task_include.clone() {
            for (key, value) in include.include_vars() {
                copy.vars.insert(key.clone(), value.clone());
            }
        }
        copy
    }

    /// Pre-order structural search of a block for a task's template.
    fn search_block(block: &Arc<Block>, task: &Task) -> Option<Arc<Task>> {
        for entry in block
            .main
            .iter()
            .chain(block.rescue.iter())
            .chain(block.always.iter())
        {
            match entry {
                BlockEntry::Task(candidate) => {
                    if candidate.as_ref() == task {
                        return Some(Arc::clone(candidate));
                    }
                }
                BlockEntry::Block(nested) => {
                    if let Some(found) = Self::search_block(nested, task) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// Advances every host to the task with the given name. Hosts whose
    /// plan never reaches a task of that name end up with nothing to do.
    fn fast_forward_to(&mut self, name: &str) -> Result<()> {
        let hosts: Vec<String> = self.host_states.keys().cloned().collect();
        for host in hosts {
            loop {
                let (_, task) = self.get_next_task_for_host(&host, true)?;
                match task {
                    None => {
                        warn!(host = %host, task = name, "start-at task not found");
                        break;
                    }
                    Some(task) if task.display_name() == name => {
                        if let Some(state) = self.host_states.get_mut(&host) {
                            state.did_start_at_task = true;
                        }
                        debug!(host = %host, task = name, "fast-forwarded");
                        break;
                    }
                    Some(_) => {
                        self.get_next_task_for_host(&host, false)?;
                    }
                }
            }
        }
        Ok(())
    }
}

enum Region {
    Main,
    Rescue,
    Always,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::Playbook;

    fn iterator_for(yaml: &str, hosts: &[&str]) -> PlayIterator {
        let playbook = Playbook::from_yaml(yaml, None).unwrap();
        let hosts: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        PlayIterator::new(
            &playbook.plays[0],
            &hosts,
            PlayIteratorOptions::default(),
        )
        .unwrap()
    }

    fn actions(iterator: &mut PlayIterator, host: &str) -> Vec<String> {
        let mut out = Vec::new();
        while let (_, Some(task)) = iterator.get_next_task_for_host(host, false).unwrap() {
            out.push(task.action);
        }
        out
    }

    const SIMPLE: &str = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: one
      debug:
        msg: a
    - name: two
      ping:
"#;

    #[test]
    fn test_unknown_host_is_an_error() {
        let mut itr = iterator_for(SIMPLE, &["h1"]);
        assert!(matches!(
            itr.get_next_task_for_host("stranger", false),
            Err(Error::HostNotFound(_))
        ));
        assert!(matches!(
            itr.mark_host_failed("stranger"),
            Err(Error::HostNotFound(_))
        ));
    }

    #[test]
    fn test_simple_sequence_ends_with_final_flush() {
        let mut itr = iterator_for(SIMPLE, &["h1"]);
        assert_eq!(actions(&mut itr, "h1"), vec!["debug", "ping", "meta"]);
        // exhausted hosts stay exhausted
        let (_, task) = itr.get_next_task_for_host("h1", false).unwrap();
        assert!(task.is_none());
    }

    #[test]
    fn test_hosts_progress_independently() {
        let mut itr = iterator_for(SIMPLE, &["fast", "slow"]);
        let (_, t1) = itr.get_next_task_for_host("fast", false).unwrap();
        let (_, t2) = itr.get_next_task_for_host("fast", false).unwrap();
        assert_eq!(t1.unwrap().name, "one");
        assert_eq!(t2.unwrap().name, "two");

        let (_, t) = itr.get_next_task_for_host("slow", false).unwrap();
        assert_eq!(t.unwrap().name, "one");
    }

    #[test]
    fn test_peek_leaves_cursor_untouched() {
        let mut itr = iterator_for(SIMPLE, &["h1"]);
        let (_, peeked) = itr.get_next_task_for_host("h1", true).unwrap();
        let (_, real) = itr.get_next_task_for_host("h1", false).unwrap();
        assert_eq!(peeked.unwrap().name, "one");
        assert_eq!(real.unwrap().name, "one");
    }

    #[test]
    fn test_gather_facts_task_comes_first_when_enabled() {
        let yaml = r#"
- hosts: all
  gather_facts: true
  tasks:
    - debug:
        msg: a
"#;
        let mut itr = iterator_for(yaml, &["h1"]);
        assert_eq!(actions(&mut itr, "h1"), vec!["setup", "debug", "meta"]);
    }

    #[test]
    fn test_mark_host_failed_is_idempotent_before_next_fetch() {
        let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - block:
        - name: boom
          command: /bin/false
      rescue:
        - name: recover
          debug:
            msg: r
      always:
        - name: cleanup
          debug:
            msg: c
"#;
        let mut itr = iterator_for(yaml, &["h1"]);
        let (_, task) = itr.get_next_task_for_host("h1", false).unwrap();
        assert_eq!(task.unwrap().name, "boom");

        itr.mark_host_failed("h1").unwrap();
        itr.mark_host_failed("h1").unwrap();

        let (_, task) = itr.get_next_task_for_host("h1", false).unwrap();
        assert_eq!(task.unwrap().name, "recover");
        let (_, task) = itr.get_next_task_for_host("h1", false).unwrap();
        assert_eq!(task.unwrap().name, "cleanup");
        assert!(itr.get_failed_hosts().is_empty());
    }

    #[test]
    fn test_start_at_task_fast_forward() {
        let mut itr = {
            let playbook = Playbook::from_yaml(SIMPLE, None).unwrap();
            PlayIterator::new(
                &playbook.plays[0],
                &["h1".to_string()],
                PlayIteratorOptions {
                    start_at_task: Some("two".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
        };
        let (state, task) = itr.get_next_task_for_host("h1", false).unwrap();
        assert_eq!(task.unwrap().name, "two");
        assert!(state.did_start_at_task);
    }
}
