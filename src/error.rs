//! # Error Handling
//!
//! Error types shared by the graph model, the execution engine and the
//! pipeline-definition layer.
//!
//! ## Error Kinds
//!
//! - **[`EngineError`]**: structural and run-level failures. Graph cycles and
//!   strategy failures abort a run before any node starts; a timeout is
//!   reported after the run has been cancelled and drained.
//! - **[`NodeInvocationError`]**: one failed invocation of one node for one
//!   bag. These never abort a run; they travel downstream inside error bags
//!   and end up in the sink and in the node's report.
//! - **[`TransformError`]**: what a user transform returns when it fails. The
//!   engine wraps it into a [`NodeInvocationError`] tagged with the node that
//!   raised it.
//!
//! ## Propagation
//!
//! Per-bag failures are converted to error bags and routed like data, so one
//! failing bag never halts unrelated bags already in flight. Only structural
//! errors surface synchronously from
//! [`GraphExecutor::execute`](crate::execution::GraphExecutor::execute).

use crate::graph::NodeId;
use crate::result::ExecutionResult;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Run-level and structural errors.
#[derive(Debug, Error)]
pub enum EngineError {
  /// Adding an edge (or validating a graph) found a cycle.
  ///
  /// `path` lists node names along the cycle, starting and ending at the
  /// same node.
  #[error("graph contains a cycle: {}", .path.join(" -> "))]
  GraphCycle {
    /// Node names along the cycle.
    path: Vec<String>,
  },

  /// An edge or a lookup referenced a node that is not part of the graph.
  #[error("node {0} is not part of the graph")]
  UnknownNode(NodeId),

  /// A node was declared with an arity that can never be satisfied.
  #[error("invalid arity for node '{node}': {reason}")]
  InvalidArity {
    /// Node name.
    node: String,
    /// Why the declaration was rejected.
    reason: String,
  },

  /// An execution unit could not be started or stopped.
  #[error("strategy error: {0}")]
  Strategy(String),

  /// The run exceeded its configured time limit and was cancelled.
  ///
  /// The partial result (counters, node states) is attached.
  #[error("run exceeded its time limit of {}ms", .limit.as_millis())]
  Timeout {
    /// The configured limit.
    limit: Duration,
    /// State of the run at the moment it was drained.
    result: Box<ExecutionResult>,
  },

  /// Invalid run options.
  #[error("configuration error: {0}")]
  Config(String),

  /// A pipeline definition could not be located, parsed or built.
  #[error("pipeline definition error: {0}")]
  Definition(String),

  /// No transform is registered under this key.
  #[error("no transform registered as '{0}'")]
  UnknownTransform(String),

  /// No pipeline is registered under this name.
  #[error("no pipeline registered as '{0}'")]
  UnknownPipeline(String),

  /// I/O failure outside of any node invocation.
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Failure raised by a user transform.
///
/// `kind` is a short classification (for example `"ValueError"` or
/// `"ParseIntError"`), `message` the human readable description. A `fatal`
/// error makes the node defunct immediately, regardless of the failure policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct TransformError {
  /// Failure classification.
  pub kind: String,
  /// Human readable description.
  pub message: String,
  /// Whether the node must stop invoking its transform.
  #[serde(default)]
  pub fatal: bool,
}

impl TransformError {
  /// Creates a non-fatal error of the given kind.
  pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      message: message.into(),
      fatal: false,
    }
  }

  /// Creates an error that makes the node defunct at once.
  pub fn fatal(kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      fatal: true,
      ..Self::new(kind, message)
    }
  }

  /// Wraps any error, using its type name as the kind.
  pub fn from_error<E: std::error::Error>(err: &E) -> Self {
    Self::new(short_type_name::<E>(), err.to_string())
  }

  /// Converts a caught panic payload.
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(msg) = payload.downcast_ref::<&str>() {
      (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
      msg.clone()
    } else {
      "transform panicked".to_string()
    };
    Self::new("Panic", message)
  }
}

impl From<String> for TransformError {
  fn from(message: String) -> Self {
    Self::new("Error", message)
  }
}

impl From<&str> for TransformError {
  fn from(message: &str) -> Self {
    Self::new("Error", message)
  }
}

impl From<std::io::Error> for TransformError {
  fn from(err: std::io::Error) -> Self {
    Self::from_error(&err)
  }
}

impl From<serde_json::Error> for TransformError {
  fn from(err: serde_json::Error) -> Self {
    Self::from_error(&err)
  }
}

impl From<std::num::ParseIntError> for TransformError {
  fn from(err: std::num::ParseIntError) -> Self {
    Self::from_error(&err)
  }
}

impl From<std::num::ParseFloatError> for TransformError {
  fn from(err: std::num::ParseFloatError) -> Self {
    Self::from_error(&err)
  }
}

impl From<std::env::VarError> for TransformError {
  fn from(err: std::env::VarError) -> Self {
    Self::from_error(&err)
  }
}

/// One failed invocation, tagged with the node that raised it.
///
/// This is the payload of error bags and the unit of failure detail in
/// [`NodeReport`](crate::result::NodeReport).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("node '{node_name}' ({node_id}) failed with {kind}: {message}")]
pub struct NodeInvocationError {
  /// Origin node.
  pub node_id: NodeId,
  /// Origin node name.
  pub node_name: String,
  /// Failure classification.
  pub kind: String,
  /// Human readable description.
  pub message: String,
  /// Whether the failure made the node defunct on its own.
  #[serde(default)]
  pub fatal: bool,
}

impl NodeInvocationError {
  /// Tags a transform failure with its origin node.
  pub fn new(node_id: NodeId, node_name: impl Into<String>, err: TransformError) -> Self {
    Self {
      node_id,
      node_name: node_name.into(),
      kind: err.kind,
      message: err.message,
      fatal: err.fatal,
    }
  }
}

impl From<NodeInvocationError> for TransformError {
  fn from(err: NodeInvocationError) -> Self {
    Self {
      kind: err.kind,
      message: err.message,
      fatal: err.fatal,
    }
  }
}

fn short_type_name<T>() -> String {
  let full = std::any::type_name::<T>();
  let base = full.split('<').next().unwrap_or(full);
  base.rsplit("::").next().unwrap_or(base).to_string()
}
