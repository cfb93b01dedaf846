//! Per-host cursor state machine.
//!
//! A [`HostState`] is one host's position in the play's compiled block
//! tree: the block index, a cursor per region, the run and fail states,
//! and — when the cursor sits on a nested block — a child `HostState`
//! per active region. The chain of child states *is* the call stack of
//! the traversal, made explicit so it can be deep-copied for peek
//! lookahead and resumed across independent calls.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use crate::block::Block;

/// Which phase of a block a host is currently iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Fact-gathering phase, before the first block
    Setup,
    /// Main region
    Tasks,
    /// Rescue region, entered on main-region failure
    Rescue,
    /// Always region
    Always,
    /// Nothing left for this host
    Complete,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Tasks => write!(f, "tasks"),
            Self::Rescue => write!(f, "rescue"),
            Self::Always => write!(f, "always"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Bitmask recording which regions have failed for a host, driving
/// rescue/always routing.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FailState(u8);

impl FailState {
    /// No failure recorded
    pub const NONE: FailState = FailState(0);
    /// Failure during fact gathering
    pub const SETUP: FailState = FailState(1);
    /// Failure in a main region
    pub const TASKS: FailState = FailState(2);
    /// Failure in a rescue region
    pub const RESCUE: FailState = FailState(4);
    /// Failure in an always region
    pub const ALWAYS: FailState = FailState(8);

    /// Returns true if no failure is recorded.
    pub fn is_clear(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if all bits of `other` are set.
    pub fn contains(&self, other: FailState) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FailState {
    type Output = FailState;

    fn bitor(self, rhs: FailState) -> FailState {
        FailState(self.0 | rhs.0)
    }
}

impl BitOrAssign for FailState {
    fn bitor_assign(&mut self, rhs: FailState) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clear() {
            return write!(f, "none");
        }
        let mut parts = Vec::new();
        for (bit, name) in [
            (Self::SETUP, "setup"),
            (Self::TASKS, "tasks"),
            (Self::RESCUE, "rescue"),
            (Self::ALWAYS, "always"),
        ] {
            if self.contains(bit) {
                parts.push(name);
            }
        }
        write!(f, "{}", parts.join("|"))
    }
}

impl fmt::Display for FailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One host's cursor through a play's compiled block tree.
///
/// `Clone` performs the deep copy the iterator relies on: the cursor
/// chain (including all child states) is duplicated, while the block
/// tree stays shared by reference.
#[derive(Clone)]
pub struct HostState {
    /// The play's top-level blocks (shared, read-only; slots are swapped
    /// for copies on dynamic task insertion)
    pub blocks: Vec<Arc<Block>>,
    /// Index of the block being processed
    pub cur_block: usize,
    /// Cursor within the current block's main region
    pub cur_main_task: usize,
    /// Cursor within the current block's rescue region
    pub cur_rescue_task: usize,
    /// Cursor within the current block's always region
    pub cur_always_task: usize,
    /// Current phase
    pub run_state: RunState,
    /// Regions that have failed so far
    pub fail_state: FailState,
    /// True between entering setup and leaving it
    pub pending_setup: bool,
    /// True once a rescue region completed for the current block
    pub did_rescue: bool,
    /// True if this host fast-forwarded to a named start task
    pub did_start_at_task: bool,
    /// True once the end-of-play handler flush was emitted
    pub(crate) did_flush_final: bool,
    /// True between a failure report and the next yielded task; makes
    /// repeated failure marking idempotent
    pub(crate) fail_marked: bool,
    /// Child cursor for a nested block in the main region
    pub tasks_child_state: Option<Box<HostState>>,
    /// Child cursor for a nested block in the rescue region
    pub rescue_child_state: Option<Box<HostState>>,
    /// Child cursor for a nested block in the always region
    pub always_child_state: Option<Box<HostState>>,
}

impl HostState {
    /// Creates a fresh state pointed at the first block, in the setup
    /// phase.
    pub fn new(blocks: Vec<Arc<Block>>) -> Self {
        Self {
            blocks,
            cur_block: 0,
            cur_main_task: 0,
            cur_rescue_task: 0,
            cur_always_task: 0,
            run_state: RunState::Setup,
            fail_state: FailState::NONE,
            pending_setup: false,
            did_rescue: false,
            did_start_at_task: false,
            did_flush_final: false,
            fail_marked: false,
            tasks_child_state: None,
            rescue_child_state: None,
            always_child_state: None,
        }
    }

    /// Creates the child state used when the cursor descends into a
    /// nested block. Children skip setup and start on their main region.
    pub(crate) fn child(block: Arc<Block>) -> Self {
        let mut state = Self::new(vec![block]);
        state.run_state = RunState::Tasks;
        state
    }

    /// Deep copy of the cursor chain. The block tree itself stays shared.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// The block the cursor currently points at.
    pub fn get_current_block(&self) -> Option<&Arc<Block>> {
        self.blocks.get(self.cur_block)
    }

    /// The child state matching the current run state, if the cursor has
    /// descended into a nested block. At most one child slot is active
    /// at a time.
    pub fn active_child(&self) -> Option<&HostState> {
        match self.run_state {
            RunState::Tasks => self.tasks_child_state.as_deref(),
            RunState::Rescue => self.rescue_child_state.as_deref(),
            RunState::Always => self.always_child_state.as_deref(),
            RunState::Setup | RunState::Complete => None,
        }
    }
}

impl fmt::Debug for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostState(block={} task={} rescue={} always={}, run_state={}, fail_state={}, \
             pending_setup={}, did_rescue={}",
            self.cur_block,
            self.cur_main_task,
            self.cur_rescue_task,
            self.cur_always_task,
            self.run_state,
            self.fail_state,
            self.pending_setup,
            self.did_rescue,
        )?;
        if let Some(child) = &self.tasks_child_state {
            write!(f, ", tasks child={:?}", child)?;
        }
        if let Some(child) = &self.rescue_child_state {
            write!(f, ", rescue child={:?}", child)?;
        }
        if let Some(child) = &self.always_child_state {
            write!(f, ", always child={:?}", child)?;
        }
        write!(f, ")")
    }
}

// Two states are equal when they describe the same position in the same
// tree. Blocks are compared by identity: a copy-on-write replacement
// (dynamic insertion) makes states differ on purpose.
impl PartialEq for HostState {
    fn eq(&self, other: &Self) -> bool {
        self.blocks.len() == other.blocks.len()
            && self
                .blocks
                .iter()
                .zip(other.blocks.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b))
            && self.cur_block == other.cur_block
            && self.cur_main_task == other.cur_main_task
            && self.cur_rescue_task == other.cur_rescue_task
            && self.cur_always_task == other.cur_always_task
            && self.run_state == other.run_state
            && self.fail_state == other.fail_state
            && self.pending_setup == other.pending_setup
            && self.did_rescue == other.did_rescue
            && self.did_start_at_task == other.did_start_at_task
            && self.tasks_child_state == other.tasks_child_state
            && self.rescue_child_state == other.rescue_child_state
            && self.always_child_state == other.always_child_state
    }
}

impl Eq for HostState {}
