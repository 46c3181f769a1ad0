//! Tests for error types

use prometheus_scheduler::core::{CoreError, ErrorCode, Outcome, TaskError};

#[test]
fn test_queue_full_error() {
    let err = CoreError::QueueFull("10 jobs already queued".to_string());
    assert_eq!(format!("{}", err), "queue full: 10 jobs already queued");
    assert_eq!(err.code(), ErrorCode::ResourceExhausted);
}

#[test]
fn test_not_initialized_error() {
    let err = CoreError::NotInitialized("memory manager");
    assert_eq!(format!("{}", err), "memory manager not initialized");
    assert_eq!(err.code(), ErrorCode::InternalError);
}

#[test]
fn test_out_of_bounds_error() {
    let err = CoreError::OutOfBounds {
        offset: 60,
        len: 8,
        size: 64,
    };
    assert_eq!(
        format!("{}", err),
        "access of 8 bytes at 60 exceeds allocation of 64 bytes"
    );
    assert_eq!(err.code(), ErrorCode::MemoryError);
}

#[test]
fn test_core_error_into_task_error() {
    let task_err: TaskError = CoreError::InvalidConfig("thread_count=0".to_string()).into();
    assert_eq!(task_err.code(), ErrorCode::InvalidArgument);
    assert_eq!(task_err.message(), "invalid configuration: thread_count=0");
}

#[test]
fn test_empty_message_uses_canonical_text() {
    let err = TaskError::new(ErrorCode::GpuError, "");
    assert_eq!(err.message(), "GPU error");
    assert_eq!(format!("{}", ErrorCode::TimeoutError), "Timeout error");
}

#[test]
fn test_task_error_serializes() {
    let err = TaskError::new(ErrorCode::ModelNotFound, "llama-70b");
    let json = serde_json::to_string(&err).unwrap();
    assert!(json.contains("model_not_found"));
    let back: TaskError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
}

#[test]
fn test_outcome_value_of_failure() {
    let outcome: Outcome<u8> = Outcome::error(ErrorCode::NetworkError, "peer reset");
    let err = outcome.value().unwrap_err();
    assert!(matches!(err, CoreError::ValueOfFailedOutcome { code: ErrorCode::NetworkError, .. }));
    assert!(err.to_string().contains("peer reset"));
}
