//! # Plait — Playbook Execution Iterator
//!
//! Plait braids many per-host strands of work through one compiled plan.
//! It implements the core of a configuration-management execution engine:
//! given a play (ordered task phases with block/rescue/always error
//! handling) and a fleet of target hosts, it answers "what is the next
//! unit of work for host H" while tracking per-host progress, failure
//! recovery through rescue regions, and the placement of handler-flush
//! synchronization points.
//!
//! ## Core Concepts
//!
//! - **Playbooks**: YAML-defined workflows containing plays and tasks
//! - **Blocks**: groups of tasks with `rescue`/`always` regions,
//!   analogous to try/except/finally
//! - **Handlers**: deferred tasks run only at designated flush points
//! - **HostState**: a host's private cursor through the compiled tree
//! - **PlayIterator**: the fleet-wide coordinator handing out tasks
//!
//! ## Scope
//!
//! Plait is deliberately an in-process library: connections to remote
//! hosts, templating, and execution strategies live in the calling tool.
//! The iterator performs no I/O, never blocks, and treats per-host
//! failure as data rather than as an error.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use plait::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let playbook = Playbook::from_file("site.yml").await?;
//!     let hosts = vec!["web01".to_string(), "web02".to_string()];
//!
//!     let mut iterator = PlayIterator::new(
//!         &playbook.plays[0],
//!         &hosts,
//!         PlayIteratorOptions::default(),
//!     )?;
//!
//!     while let (_, Some(task)) = iterator.get_next_task_for_host("web01", false)? {
//!         // dispatch the task; on failure:
//!         // iterator.mark_host_failed("web01")?;
//!         println!("next: {}", task.display_name());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error handling
    pub use crate::error::{Error, ErrorContext, Result};

    // Iteration engine
    pub use crate::executor::{FailState, HostState, PlayIterator, PlayIteratorOptions, RunState};

    // Compiled structures
    pub use crate::block::{Block, BlockEntry, CompileOptions};
    pub use crate::tasks::{Task, TaskInclude};

    // Handlers
    pub use crate::handlers::Handler;

    // Includes
    pub use crate::include::{InMemoryIncludes, IncludeLoader};

    // Playbooks
    pub use crate::playbook::{Play, Playbook, TaskDef};

    // Tags
    pub use crate::tags::TagFilter;
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for Plait operations.
///
/// This module provides the main [`Error`](error::Error) enum covering
/// structural misuse and malformed input. Per-host task failure is state,
/// not an error; see [`executor::FailState`].
pub mod error;

// ============================================================================
// Playbook Components
// ============================================================================

/// Playbook parsing and representation.
///
/// Loading, parsing, and validating YAML playbooks: plays, task
/// definitions (including block/rescue/always), handlers, and roles.
pub mod playbook;

/// Role provenance for compiled tasks.
pub mod roles;

/// Handler definitions and trigger-name resolution.
///
/// Handlers are special tasks that only run when notified by other
/// tasks, and only at the flush points the iterator marks in each host's
/// task stream.
pub mod handlers;

/// Tag-based task selection with inheritance and `always`/`never`
/// special tags.
pub mod tags;

/// Compile-time (static) include resolution.
pub mod include;

// ============================================================================
// Compiled Plan
// ============================================================================

/// The compiled block tree: tasks nested in blocks with rescue/always
/// regions, shared read-only across all per-host cursors.
pub mod block;

/// Compiled task representation with structural identity and provenance
/// links.
pub mod tasks;

// ============================================================================
// Execution Engine
// ============================================================================

/// The per-host iteration state machine and fleet-wide coordinator.
pub mod executor;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of Plait.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
