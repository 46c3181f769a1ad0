//! Tests for utility types

use prometheus_scheduler::util::{Priority, TaskId, WorkerId};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_serde_names() {
    assert_eq!(serde_json::to_string(&Priority::Critical).unwrap(), "\"critical\"");
    let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
    assert_eq!(parsed, Priority::Low);
    assert_eq!(Priority::High.to_string(), "high");
}

#[test]
fn test_identifier_aliases() {
    let task: TaskId = 12345;
    let worker: WorkerId = 3;
    assert_eq!(task, 12345);
    assert_eq!(worker, 3);
}

#[test]
fn test_init_tracing_is_repeatable() {
    prometheus_scheduler::util::init_tracing();
    prometheus_scheduler::util::init_tracing_with("debug");
}
