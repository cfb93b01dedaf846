//! Shared test utilities for the Plait test suite.
//!
//! Include this module in integration tests:
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use plait::prelude::*;

/// Installs a tracing subscriber honoring `RUST_LOG`, once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Parses a playbook from inline YAML and returns its first play.
pub fn play_from_yaml(yaml: &str) -> Play {
    let playbook = Playbook::from_yaml(yaml, None).expect("fixture playbook must parse");
    playbook.plays.into_iter().next().expect("fixture playbook has a play")
}

/// Builds an iterator over the first play of the given playbook YAML.
pub fn iterator_for(yaml: &str, hosts: &[&str]) -> PlayIterator {
    init_tracing();
    let play = play_from_yaml(yaml);
    PlayIterator::new(&play, &host_names(hosts), PlayIteratorOptions::default())
        .expect("fixture play must compile")
}

/// Owned host name list.
pub fn host_names(hosts: &[&str]) -> Vec<String> {
    hosts.iter().map(|h| h.to_string()).collect()
}

/// Drains a host's task stream, returning the action of every task.
pub fn drain_actions(iterator: &mut PlayIterator, host: &str) -> Vec<String> {
    let mut actions = Vec::new();
    loop {
        let (_, task) = iterator
            .get_next_task_for_host(host, false)
            .expect("known host");
        match task {
            Some(task) => actions.push(task.action),
            None => return actions,
        }
    }
}

/// Drains a host's task stream, returning every task's display name.
pub fn drain_names(iterator: &mut PlayIterator, host: &str) -> Vec<String> {
    let mut names = Vec::new();
    loop {
        let (_, task) = iterator
            .get_next_task_for_host(host, false)
            .expect("known host");
        match task {
            Some(task) => names.push(task.display_name().to_string()),
            None => return names,
        }
    }
}

/// Fetches the next task, asserting the stream is not exhausted.
pub fn next_task(iterator: &mut PlayIterator, host: &str) -> Task {
    iterator
        .get_next_task_for_host(host, false)
        .expect("known host")
        .1
        .expect("stream not exhausted")
}
