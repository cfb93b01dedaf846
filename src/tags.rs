//! Tag-based task selection.
//!
//! Tags are inherited from enclosing constructs: block tags and role tags
//! apply to every task within them. Filtering happens once, when the
//! iterator compiles its block list — tasks pruned here never appear in
//! any host's stream.
//!
//! # Special Tags
//!
//! - `always`: task runs regardless of tag selection, unless `always`
//!   itself is skipped
//! - `never`: task never runs unless explicitly selected
//! - `all`: matches every task (the default selection)

/// Special tag constants.
pub mod special {
    /// Tag that causes a task to always run regardless of tag selection
    pub const ALWAYS: &str = "always";

    /// Tag that causes a task to never run unless explicitly selected
    pub const NEVER: &str = "never";

    /// Matches all tasks
    pub const ALL: &str = "all";
}

/// A filter for selecting tasks based on tags.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    /// Tags to include (tasks must match at least one)
    tags: Vec<String>,
    /// Tags to skip (tasks matching any are excluded)
    skip_tags: Vec<String>,
}

impl TagFilter {
    /// Creates a new empty tag filter (matches all tasks).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the include tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the skip tags.
    pub fn with_skip_tags(mut self, tags: Vec<String>) -> Self {
        self.skip_tags = tags;
        self
    }

    /// Returns true if any filtering is active.
    pub fn is_active(&self) -> bool {
        !self.skip_tags.is_empty()
            || !(self.tags.is_empty() || self.tags.iter().any(|t| t == special::ALL))
    }

    /// Checks whether a task with the given (inherited) tags should run.
    ///
    /// 1. `always`-tagged tasks run unless `always` is explicitly skipped
    /// 2. `never`-tagged tasks are skipped unless explicitly selected
    /// 3. any skip tag match excludes the task
    /// 4. with include tags set, the task must match one to run
    pub fn should_run(&self, task_tags: &[String]) -> bool {
        let has = |name: &str| task_tags.iter().any(|t| t.eq_ignore_ascii_case(name));
        let listed = |list: &[String], name: &str| {
            list.iter().any(|t| t.eq_ignore_ascii_case(name))
        };

        if has(special::ALWAYS) && !listed(&self.skip_tags, special::ALWAYS) {
            return true;
        }

        if has(special::NEVER) && !listed(&self.tags, special::NEVER) {
            return false;
        }

        if task_tags.iter().any(|t| listed(&self.skip_tags, t)) {
            return false;
        }

        if self.tags.is_empty() || self.tags.iter().any(|t| t == special::ALL) {
            return true;
        }

        task_tags.iter().any(|t| listed(&self.tags, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = TagFilter::new();
        assert!(!filter.is_active());
        assert!(filter.should_run(&tags(&["deploy"])));
        assert!(filter.should_run(&[]));
    }

    #[test]
    fn test_include_tags() {
        let filter = TagFilter::new().with_tags(tags(&["deploy"]));
        assert!(filter.should_run(&tags(&["deploy", "web"])));
        assert!(!filter.should_run(&tags(&["debug"])));
        assert!(!filter.should_run(&[]));
    }

    #[test]
    fn test_skip_tags() {
        let filter = TagFilter::new().with_skip_tags(tags(&["debug"]));
        assert!(filter.should_run(&tags(&["deploy"])));
        assert!(!filter.should_run(&tags(&["deploy", "debug"])));
    }

    #[test]
    fn test_always_runs_unless_skipped() {
        let filter = TagFilter::new().with_tags(tags(&["deploy"]));
        assert!(filter.should_run(&tags(&["always"])));

        let filter = TagFilter::new().with_skip_tags(tags(&["always"]));
        assert!(!filter.should_run(&tags(&["always"])));
    }

    #[test]
    fn test_never_skipped_unless_selected() {
        let filter = TagFilter::new();
        assert!(!filter.should_run(&tags(&["never"])));

        let filter = TagFilter::new().with_tags(tags(&["never"]));
        assert!(filter.should_run(&tags(&["never"])));
    }
}
