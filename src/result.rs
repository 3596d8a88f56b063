//! # Execution Result
//!
//! Summary of a finished run: overall status, per-node counters and failure
//! details, run-wide totals and timing.

use crate::context::NodeStatus;
use crate::error::NodeInvocationError;
use crate::graph::NodeId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Overall outcome of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
  /// Every node finished `Done`.
  Success,
  /// A node did not finish `Done`, or the run was cancelled.
  Failed,
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunStatus::Success => write!(f, "SUCCESS"),
      RunStatus::Failed => write!(f, "FAILED"),
    }
  }
}

/// Bag counters of one node, or of the whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
  /// Bags taken from inbound queues (or seeded, for entry nodes).
  pub received: u64,
  /// Bags produced, error Bags included.
  pub sent: u64,
  /// Failed invocations.
  pub errored: u64,
}

impl CounterSnapshot {
  pub(crate) fn add(&mut self, other: &CounterSnapshot) {
    self.received += other.received;
    self.sent += other.sent;
    self.errored += other.errored;
  }
}

/// Final state of one node.
#[derive(Clone, Debug, Serialize)]
pub struct NodeReport {
  /// Node identifier.
  pub id: NodeId,
  /// Node name.
  pub name: String,
  /// Final status.
  pub status: NodeStatus,
  /// Bag counters.
  pub counters: CounterSnapshot,
  /// Every failed invocation, in the order they happened.
  pub failures: Vec<NodeInvocationError>,
}

impl NodeReport {
  /// Whether the node ended defunct.
  pub fn is_defunct(&self) -> bool {
    self.status == NodeStatus::Defunct
  }
}

/// Summary of a run.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionResult {
  /// Overall outcome.
  pub status: RunStatus,
  /// One report per node, in topological order.
  pub nodes: Vec<NodeReport>,
  /// Counters summed over all nodes.
  pub totals: CounterSnapshot,
  /// Whether the run was cancelled before it drained by itself.
  pub cancelled: bool,
  /// When execution started.
  pub started_at: DateTime<Utc>,
  /// When execution finished.
  pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
  pub(crate) fn new(
    nodes: Vec<NodeReport>,
    cancelled: bool,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
  ) -> Self {
    let mut totals = CounterSnapshot::default();
    for report in &nodes {
      totals.add(&report.counters);
    }
    let status = if !cancelled && nodes.iter().all(|report| report.status == NodeStatus::Done) {
      RunStatus::Success
    } else {
      RunStatus::Failed
    };
    Self {
      status,
      nodes,
      totals,
      cancelled,
      started_at,
      finished_at,
    }
  }

  /// Whether the run succeeded.
  pub fn is_success(&self) -> bool {
    self.status == RunStatus::Success
  }

  /// Report of one node.
  pub fn node(&self, id: NodeId) -> Option<&NodeReport> {
    self.nodes.iter().find(|report| report.id == id)
  }

  /// Report of the first node with this name.
  pub fn node_named(&self, name: &str) -> Option<&NodeReport> {
    self.nodes.iter().find(|report| report.name == name)
  }

  /// Reports of defunct nodes.
  pub fn defunct(&self) -> impl Iterator<Item = &NodeReport> {
    self.nodes.iter().filter(|report| report.is_defunct())
  }

  /// Every failure of the run, grouped by node.
  pub fn failures(&self) -> impl Iterator<Item = &NodeInvocationError> {
    self.nodes.iter().flat_map(|report| report.failures.iter())
  }

  /// Wall-clock duration of the run.
  pub fn elapsed(&self) -> chrono::Duration {
    self.finished_at - self.started_at
  }
}
