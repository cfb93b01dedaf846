//! Role provenance for compiled tasks.

use serde::{Deserialize, Serialize};

/// A role a compiled task was sourced from.
///
/// Only the provenance the iterator needs survives compilation: the name
/// (for reporting and identity) and the role's tags (inherited by its
/// tasks during tag filtering).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Tags applied to every task of the role
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Role {
    /// Creates a new role.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
        }
    }
}
