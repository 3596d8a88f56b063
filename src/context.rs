//! # Execution Context
//!
//! Runtime state of one run: one [`NodeExecutionContext`] per node plus the
//! run-wide pieces (options, totals, cancellation).
//!
//! ## Node Lifecycle
//!
//! ```text
//! NotStarted ──start──▶ Running ──finish──▶ Done
//!                          │                   ▲ (no failures)
//!                          │ threshold / fatal │
//!                          ▼                   │
//!                       Defunct ◀──finish──────┘ (any failure)
//! ```
//!
//! A node turns defunct while running after
//! [`FailurePolicy::max_consecutive_failures`] failed invocations in a row,
//! or at once on a fatal error. A defunct node stops invoking its transform;
//! the strategy keeps draining (and counting) its inbound queue so upstream
//! producers never block on it, and downstream nodes still complete.
//!
//! A node that finishes with at least one failed invocation also ends
//! defunct, which is what makes the run report `FAILED`.
//!
//! Counters are atomics updated from whichever thread runs the node; the
//! context is shared through `Arc` and never requires `&mut`.

use crate::bag::Bag;
use crate::config::{FailurePolicy, RunOptions};
use crate::error::NodeInvocationError;
use crate::graph::{Graph, NodeId};
use crate::result::{CounterSnapshot, ExecutionResult, NodeReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lifecycle state of a node within one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  /// Execution unit not started yet.
  NotStarted,
  /// Processing inputs.
  Running,
  /// Finished without failures.
  Done,
  /// Stopped invoking its transform, or finished with failures.
  Defunct,
}

impl NodeStatus {
  fn from_u8(raw: u8) -> Self {
    match raw {
      0 => NodeStatus::NotStarted,
      1 => NodeStatus::Running,
      2 => NodeStatus::Done,
      _ => NodeStatus::Defunct,
    }
  }

  fn as_u8(self) -> u8 {
    match self {
      NodeStatus::NotStarted => 0,
      NodeStatus::Running => 1,
      NodeStatus::Done => 2,
      NodeStatus::Defunct => 3,
    }
  }

  /// Whether the node can no longer change state.
  pub fn is_terminal(&self) -> bool {
    matches!(self, NodeStatus::Done | NodeStatus::Defunct)
  }
}

impl fmt::Display for NodeStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      NodeStatus::NotStarted => "not started",
      NodeStatus::Running => "running",
      NodeStatus::Done => "done",
      NodeStatus::Defunct => "defunct",
    };
    f.write_str(label)
  }
}

/// Runtime state of one node.
#[derive(Debug)]
pub struct NodeExecutionContext {
  id: NodeId,
  name: Arc<str>,
  status: AtomicU8,
  received: AtomicU64,
  sent: AtomicU64,
  errored: AtomicU64,
  consecutive_failures: AtomicU32,
  failures: Mutex<Vec<NodeInvocationError>>,
  policy: FailurePolicy,
  cancel: CancellationToken,
}

impl NodeExecutionContext {
  pub(crate) fn new(
    id: NodeId,
    name: &str,
    policy: FailurePolicy,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      id,
      name: Arc::from(name),
      status: AtomicU8::new(NodeStatus::NotStarted.as_u8()),
      received: AtomicU64::new(0),
      sent: AtomicU64::new(0),
      errored: AtomicU64::new(0),
      consecutive_failures: AtomicU32::new(0),
      failures: Mutex::new(Vec::new()),
      policy,
      cancel,
    }
  }

  /// Node identifier.
  pub fn id(&self) -> NodeId {
    self.id
  }

  /// Node name.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn shared_name(&self) -> Arc<str> {
    Arc::clone(&self.name)
  }

  /// Current status.
  pub fn status(&self) -> NodeStatus {
    NodeStatus::from_u8(self.status.load(Ordering::Acquire))
  }

  /// Whether the node stopped invoking its transform.
  pub fn is_defunct(&self) -> bool {
    self.status() == NodeStatus::Defunct
  }

  /// Whether the run is being cancelled.
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Current counters.
  pub fn counters(&self) -> CounterSnapshot {
    CounterSnapshot {
      received: self.received.load(Ordering::Relaxed),
      sent: self.sent.load(Ordering::Relaxed),
      errored: self.errored.load(Ordering::Relaxed),
    }
  }

  /// Marks the node running. Idempotent; never leaves `Defunct`.
  pub(crate) fn start(&self) {
    let _ = self.status.compare_exchange(
      NodeStatus::NotStarted.as_u8(),
      NodeStatus::Running.as_u8(),
      Ordering::AcqRel,
      Ordering::Acquire,
    );
  }

  pub(crate) fn received(&self) {
    self.received.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn sent(&self) {
    self.sent.fetch_add(1, Ordering::Relaxed);
  }

  /// Records a successful invocation, resetting the failure streak.
  pub(crate) fn succeeded(&self) {
    self.consecutive_failures.store(0, Ordering::Relaxed);
  }

  /// Records a failed invocation of `input` and returns the error Bag to
  /// forward in its place.
  pub(crate) fn fail(&self, input: &Arc<Bag>, err: NodeInvocationError) -> Arc<Bag> {
    self.errored.fetch_add(1, Ordering::Relaxed);
    let streak = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(
      node = %self.name,
      id = %self.id,
      kind = %err.kind,
      message = %err.message,
      "node invocation failed"
    );
    let bag = Arc::new(Bag::failed(err.clone()).derived_from(input));
    self
      .failures
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(err.clone());
    if err.fatal || streak >= self.policy.max_consecutive_failures {
      self.mark_defunct();
    }
    bag
  }

  fn mark_defunct(&self) {
    let previous = self.status.swap(NodeStatus::Defunct.as_u8(), Ordering::AcqRel);
    if previous != NodeStatus::Defunct.as_u8() {
      debug!(node = %self.name, id = %self.id, "node is defunct");
      if self.policy.fail_fast {
        debug!("fail_fast set, cancelling run");
        self.cancel.cancel();
      }
    }
  }

  /// Marks the node finished: `Defunct` if any invocation failed, `Done`
  /// otherwise.
  pub(crate) fn finish(&self) {
    if self.errored.load(Ordering::Relaxed) > 0 {
      self.mark_defunct();
    } else {
      let _ = self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
        (raw != NodeStatus::Defunct.as_u8()).then_some(NodeStatus::Done.as_u8())
      });
    }
    debug!(node = %self.name, id = %self.id, status = %self.status(), "node finished");
  }

  /// Snapshot of this node for the execution result.
  pub fn report(&self) -> NodeReport {
    NodeReport {
      id: self.id,
      name: self.name.to_string(),
      status: self.status(),
      counters: self.counters(),
      failures: self
        .failures
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone(),
    }
  }
}

/// Runtime state of one run.
#[derive(Debug)]
pub struct ExecutionContext {
  options: RunOptions,
  order: Vec<NodeId>,
  nodes: Vec<Arc<NodeExecutionContext>>,
  cancel: CancellationToken,
  timed_out: AtomicBool,
  started_at: DateTime<Utc>,
}

impl ExecutionContext {
  /// Creates the context of a run of `graph`; `order` is its topological
  /// order.
  pub(crate) fn new(
    graph: &Graph,
    order: Vec<NodeId>,
    options: RunOptions,
    cancel: CancellationToken,
  ) -> Self {
    let nodes = graph
      .node_ids()
      .map(|id| {
        let name = graph.node(id).map(|node| node.name()).unwrap_or_default();
        Arc::new(NodeExecutionContext::new(
          id,
          name,
          options.failure.clone(),
          cancel.clone(),
        ))
      })
      .collect();
    Self {
      options,
      order,
      nodes,
      cancel,
      timed_out: AtomicBool::new(false),
      started_at: Utc::now(),
    }
  }

  /// Options of this run.
  pub fn options(&self) -> &RunOptions {
    &self.options
  }

  /// Per-node context.
  pub fn node(&self, id: NodeId) -> Option<&Arc<NodeExecutionContext>> {
    self.nodes.get(id.index())
  }

  /// Per-node contexts, by node id.
  pub fn nodes(&self) -> &[Arc<NodeExecutionContext>] {
    &self.nodes
  }

  /// Run-wide cancellation token.
  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Whether the run is being cancelled.
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub(crate) fn time_out(&self) {
    self.timed_out.store(true, Ordering::Release);
    self.cancel.cancel();
  }

  /// Whether the run was cancelled by its time limit.
  pub fn timed_out(&self) -> bool {
    self.timed_out.load(Ordering::Acquire)
  }

  /// Counters summed over all nodes, as of now.
  pub fn totals(&self) -> CounterSnapshot {
    let mut totals = CounterSnapshot::default();
    for node in &self.nodes {
      totals.add(&node.counters());
    }
    totals
  }

  /// Builds the result of the run. Nodes still not started are reported as
  /// such; reports follow the topological order.
  pub(crate) fn result(&self) -> ExecutionResult {
    let reports = self
      .order
      .iter()
      .filter_map(|id| self.node(*id))
      .map(|node| node.report())
      .collect();
    ExecutionResult::new(reports, self.is_cancelled(), self.started_at, Utc::now())
  }
}
