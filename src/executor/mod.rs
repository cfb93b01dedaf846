//! Play iteration engine.
//!
//! This module provides the per-host state machine that walks a compiled
//! play:
//!
//! - [`HostState`]: one host's cursor through the block tree, including
//!   run/fail state and the explicit chain of child cursors for nested
//!   blocks
//! - [`PlayIterator`]: the fleet-wide coordinator answering "what is the
//!   next task for host H", recording failures, and resolving task
//!   copies back to their templates
//!
//! The iterator is pure and synchronous: it performs no I/O and holds no
//! locks. Callers drive many hosts concurrently by serializing access to
//! the iterator itself; cross-host coordination (such as the all-hosts
//! barrier at handler flush points) stays with the caller.

mod host_state;
mod play_iterator;

pub use host_state::{FailState, HostState, RunState};
pub use play_iterator::{PlayIterator, PlayIteratorOptions};
