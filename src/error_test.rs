//! # Error Test Suite
//!
//! Display formats, conversions into [`TransformError`] and the tagging of
//! transform failures with their origin node.

use crate::error::{EngineError, NodeInvocationError, TransformError};
use crate::graph::NodeId;
use crate::result::ExecutionResult;
use chrono::Utc;
use std::time::Duration;

// ============================================================================
// EngineError
// ============================================================================

#[test]
fn test_engine_error_display() {
  let cycle = EngineError::GraphCycle {
    path: vec!["a".into(), "b".into(), "a".into()],
  };
  assert_eq!(cycle.to_string(), "graph contains a cycle: a -> b -> a");
  assert_eq!(
    EngineError::UnknownNode(NodeId::from_index(7)).to_string(),
    "node #7 is not part of the graph"
  );
  assert_eq!(
    EngineError::UnknownTransform("x.y".into()).to_string(),
    "no transform registered as 'x.y'"
  );
  assert_eq!(
    EngineError::Strategy("worker exited".into()).to_string(),
    "strategy error: worker exited"
  );
}

#[test]
fn test_timeout_carries_partial_result() {
  let result = ExecutionResult::new(Vec::new(), true, Utc::now(), Utc::now());
  let err = EngineError::Timeout {
    limit: Duration::from_millis(250),
    result: Box::new(result),
  };
  assert_eq!(err.to_string(), "run exceeded its time limit of 250ms");
  match err {
    EngineError::Timeout { result, .. } => assert!(result.cancelled),
    other => panic!("unexpected error: {other}"),
  }
}

#[test]
fn test_io_error_conversion() {
  let err: EngineError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
  assert!(matches!(err, EngineError::Io(_)));
  assert_eq!(err.to_string(), "gone");
}

// ============================================================================
// TransformError
// ============================================================================

#[test]
fn test_transform_error_constructors() {
  let err = TransformError::new("ValueError", "bad");
  assert!(!err.fatal);
  assert_eq!(err.to_string(), "ValueError: bad");
  let fatal = TransformError::fatal("Broken", "gone");
  assert!(fatal.fatal);
  assert_eq!(fatal.kind, "Broken");
}

#[test]
fn test_transform_error_conversions() {
  let from_str: TransformError = "plain".into();
  assert_eq!(from_str.kind, "Error");
  assert_eq!(from_str.message, "plain");

  let parse: TransformError = "x1".parse::<i64>().unwrap_err().into();
  assert_eq!(parse.kind, "ParseIntError");

  let float: TransformError = "x".parse::<f64>().unwrap_err().into();
  assert_eq!(float.kind, "ParseFloatError");

  let json: TransformError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
  assert_eq!(json.kind, "Error");

  let var: TransformError = std::env::var("BAGPIPE_ERROR_TEST_UNSET").unwrap_err().into();
  assert_eq!(var.kind, "VarError");
}

#[test]
fn test_from_panic_payloads() {
  let from_str = TransformError::from_panic(Box::new("static message"));
  assert_eq!(from_str.kind, "Panic");
  assert_eq!(from_str.message, "static message");
  let from_string = TransformError::from_panic(Box::new(String::from("owned")));
  assert_eq!(from_string.message, "owned");
  let other = TransformError::from_panic(Box::new(42_u8));
  assert_eq!(other.message, "transform panicked");
}

// ============================================================================
// NodeInvocationError
// ============================================================================

#[test]
fn test_invocation_error_tags_node() {
  let err = NodeInvocationError::new(
    NodeId::from_index(2),
    "transform",
    TransformError::fatal("TypeError", "expected a string"),
  );
  assert_eq!(err.node_id, NodeId::from_index(2));
  assert!(err.fatal);
  assert_eq!(
    err.to_string(),
    "node 'transform' (#2) failed with TypeError: expected a string"
  );

  let back: TransformError = err.into();
  assert_eq!(back, TransformError::fatal("TypeError", "expected a string"));
}

#[test]
fn test_invocation_error_serializes() {
  let err = NodeInvocationError::new(NodeId::from_index(1), "load", TransformError::new("E", "m"));
  let json = serde_json::to_string(&err).unwrap();
  let back: NodeInvocationError = serde_json::from_str(&json).unwrap();
  assert_eq!(back, err);
}
