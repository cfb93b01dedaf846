//! Integration tests for play compilation as observed through iteration:
//! implicit block squashing, flush placement, tag selection, fact
//! gathering, and static/dynamic include resolution.

mod common;

use plait::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;

// ============================================================================
// Block structure
// ============================================================================

#[test]
fn test_consecutive_bare_tasks_squash_into_one_implicit_block() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: a
      debug: {msg: a}
    - name: b
      debug: {msg: b}
    - block:
        - name: c
          debug: {msg: c}
    - name: d
      debug: {msg: d}
"#;
    let itr = iterator_for(yaml, &["h0"]);
    let blocks = itr.blocks();
    assert_eq!(blocks.len(), 3);
    assert!(blocks[0].implicit);
    assert_eq!(blocks[0].main.len(), 2);
    assert!(!blocks[1].implicit);
    assert!(blocks[2].implicit);
    assert_eq!(blocks[2].main.len(), 1);
}

#[test]
fn test_flush_blocks_sit_between_non_empty_phases() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  pre_tasks:
    - name: pre
      debug: {msg: pre}
  tasks:
    - name: main
      debug: {msg: main}
"#;
    let itr = iterator_for(yaml, &["h0"]);
    let blocks = itr.blocks();
    assert_eq!(blocks.len(), 3);
    let BlockEntry::Task(flush) = &blocks[1].main[0] else {
        panic!("expected a flush task between the phases");
    };
    assert!(flush.is_flush_handlers());
}

#[test]
fn test_empty_phases_contribute_no_flush() {
    // only the tasks phase is present, so the stream holds its tasks and
    // the single end-of-play flush
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: only
      debug: {msg: only}
"#;
    let mut itr = iterator_for(yaml, &["h0"]);
    assert_eq!(drain_names(&mut itr, "h0"), vec!["only", "meta"]);
}

#[test]
fn test_empty_play_still_flushes_handlers_once() {
    let yaml = r#"
- hosts: all
  gather_facts: false
"#;
    let mut itr = iterator_for(yaml, &["h0"]);
    assert_eq!(drain_actions(&mut itr, "h0"), vec!["meta"]);
}

// ============================================================================
// Fact gathering
// ============================================================================

#[test]
fn test_gather_facts_emits_setup_first_and_once() {
    let yaml = r#"
- hosts: all
  tasks:
    - name: work
      debug: {msg: w}
"#;
    let mut itr = iterator_for(yaml, &["h0"]);
    assert_eq!(drain_actions(&mut itr, "h0"), vec!["setup", "debug", "meta"]);
}

// ============================================================================
// Tag selection
// ============================================================================

#[test]
fn test_tag_filter_prunes_the_stream() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: deploy step
      debug: {msg: d}
      tags: [deploy]
    - name: debug step
      debug: {msg: x}
      tags: [debugging]
    - name: critical
      debug: {msg: c}
      tags: [always]
"#;
    let play = play_from_yaml(yaml);
    let mut itr = PlayIterator::new(
        &play,
        &host_names(&["h0"]),
        PlayIteratorOptions {
            compile: CompileOptions {
                tags: TagFilter::new().with_tags(vec!["deploy".to_string()]),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();

    // the always-tagged task survives any selection
    assert_eq!(
        drain_names(&mut itr, "h0"),
        vec!["deploy step", "critical", "meta"]
    );
}

#[test]
fn test_block_tags_are_inherited_by_contained_tasks() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - block:
        - name: inside
          debug: {msg: i}
      tags: [wanted]
    - name: outside
      debug: {msg: o}
"#;
    let play = play_from_yaml(yaml);
    let mut itr = PlayIterator::new(
        &play,
        &host_names(&["h0"]),
        PlayIteratorOptions {
            compile: CompileOptions {
                tags: TagFilter::new().with_tags(vec!["wanted".to_string()]),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(drain_names(&mut itr, "h0"), vec!["inside", "meta"]);
}

#[test]
fn test_skip_tags_exclude_tasks() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: kept
      debug: {msg: k}
    - name: skipped
      debug: {msg: s}
      tags: [slow]
"#;
    let play = play_from_yaml(yaml);
    let mut itr = PlayIterator::new(
        &play,
        &host_names(&["h0"]),
        PlayIteratorOptions {
            compile: CompileOptions {
                tags: TagFilter::new().with_skip_tags(vec!["slow".to_string()]),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(drain_names(&mut itr, "h0"), vec!["kept", "meta"]);
}

// ============================================================================
// Includes
// ============================================================================

#[test]
fn test_static_include_expands_into_the_stream() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: before
      debug: {msg: b}
    - include_tasks:
        file: extra.yml
        banner: hello
    - name: after
      debug: {msg: a}
"#;
    let loader = InMemoryIncludes::new().with(
        "extra.yml",
        r#"
- name: included one
  debug: {msg: i1}
- name: included two
  debug: {msg: i2}
"#,
    );
    let play = play_from_yaml(yaml);
    let mut itr = PlayIterator::new(
        &play,
        &host_names(&["h0"]),
        PlayIteratorOptions {
            compile: CompileOptions {
                include_loader: Some(&loader),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(next_task(&mut itr, "h0").name, "before");

    // expanded tasks carry the include's parameters in their vars
    let included = next_task(&mut itr, "h0");
    assert_eq!(included.name, "included one");
    assert_eq!(included.vars.get("banner").unwrap(), &json!("hello"));
    assert_eq!(
        included.task_include.as_ref().unwrap().target,
        "extra.yml"
    );

    // and still resolve to their templates, vars injection aside
    let template = itr.get_original_task("h0", &included).unwrap().unwrap();
    assert_eq!(template.name, "included one");
    assert!(template.vars.is_empty(), "template must stay unmutated");

    assert_eq!(
        drain_names(&mut itr, "h0"),
        vec!["included two", "after", "meta"]
    );
}

#[test]
fn test_include_with_templated_target_stays_dynamic() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - name: load extras
      include_tasks: "{{ extras_file }}"
"#;
    let loader = InMemoryIncludes::new();
    let play = play_from_yaml(yaml);
    let mut itr = PlayIterator::new(
        &play,
        &host_names(&["h0"]),
        PlayIteratorOptions {
            compile: CompileOptions {
                include_loader: Some(&loader),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();

    // the directive itself is yielded; the strategy resolves it and
    // grafts the result back in
    let include = next_task(&mut itr, "h0");
    assert!(include.is_dynamic_include());

    itr.add_tasks(
        "h0",
        vec![Task::new("resolved", "debug").arg("msg", "from include")],
    )
    .unwrap();
    assert_eq!(drain_names(&mut itr, "h0"), vec!["resolved", "meta"]);
}

#[test]
fn test_static_include_with_loop_is_a_compile_error() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - include_tasks: extra.yml
      static: true
      loop: [a, b]
"#;
    let loader = InMemoryIncludes::new().with("extra.yml", "[]");
    let play = play_from_yaml(yaml);
    let err = PlayIterator::new(
        &play,
        &host_names(&["h0"]),
        PlayIteratorOptions {
            compile: CompileOptions {
                include_loader: Some(&loader),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::PlaybookValidation(_)));
}

#[test]
fn test_missing_static_include_target_fails_at_compile() {
    let yaml = r#"
- hosts: all
  gather_facts: false
  tasks:
    - include_tasks: absent.yml
      static: true
"#;
    let loader = InMemoryIncludes::new();
    let play = play_from_yaml(yaml);
    let err = PlayIterator::new(
        &play,
        &host_names(&["h0"]),
        PlayIteratorOptions {
            compile: CompileOptions {
                include_loader: Some(&loader),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::IncludeNotFound(_)));
}

// ============================================================================
// Playbook loading
// ============================================================================

#[tokio::test]
async fn test_playbook_loads_from_file() {
    use std::io::Write;

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("site.yml");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"
- name: File play
  hosts: all
  gather_facts: false
  tasks:
    - name: noop
      debug: {{msg: hi}}
"#
    )
    .unwrap();

    let playbook = Playbook::from_file(&path).await.unwrap();
    assert_eq!(playbook.plays.len(), 1);
    assert_eq!(playbook.name.as_deref(), Some("site"));
    playbook.validate().unwrap();

    let mut itr = PlayIterator::new(
        &playbook.plays[0],
        &host_names(&["h0"]),
        PlayIteratorOptions::default(),
    )
    .unwrap();
    assert_eq!(drain_names(&mut itr, "h0"), vec!["noop", "meta"]);
}
