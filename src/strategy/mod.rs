//! # Execution Strategies
//!
//! A strategy decides where each node's execution unit runs and how Bags
//! travel between units. All strategies share the node semantics of
//! [`process`]: error Bags are forwarded untouched, defunct nodes drain
//! their input without invoking the transform, outputs are forwarded one at
//! a time and failures become error Bags.
//!
//! ## Variants
//!
//! | Strategy       | Unit                      | Transport                    |
//! |----------------|---------------------------|------------------------------|
//! | `sequential`   | one blocking thread       | direct depth-first calls     |
//! | `threaded`     | one blocking thread/node  | in-process FIFO queues       |
//! | `processed`    | one OS process/node       | JSON lines over stdin/stdout |
//!
//! Whatever the strategy, every initial Bag reaches every entry node, each
//! entry node's input is closed after the initial Bags, and every unit
//! terminates once its input is exhausted (or the run is cancelled).

mod processed;
mod sequential;
mod threaded;

pub use processed::{ProcessedStrategy, WorkerCommand};
pub use sequential::SequentialStrategy;
pub use threaded::ThreadedStrategy;

use crate::bag::Bag;
use crate::context::{ExecutionContext, NodeExecutionContext};
use crate::error::{EngineError, Result};
use crate::graph::NodeId;
use crate::node::Node;
use crate::queue::Closed;
use crate::sink::SinkHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Available strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
  /// Everything on one scheduler thread.
  #[default]
  Sequential,
  /// One thread per node.
  Threaded,
  /// One worker process per node.
  Processed,
}

impl StrategyKind {
  /// Every strategy, in declaration order.
  pub const ALL: [StrategyKind; 3] = [
    StrategyKind::Sequential,
    StrategyKind::Threaded,
    StrategyKind::Processed,
  ];

  /// Lowercase name as accepted by [`FromStr`].
  pub fn as_str(&self) -> &'static str {
    match self {
      StrategyKind::Sequential => "sequential",
      StrategyKind::Threaded => "threaded",
      StrategyKind::Processed => "processed",
    }
  }
}

impl fmt::Display for StrategyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StrategyKind {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self> {
    StrategyKind::ALL
      .into_iter()
      .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| {
        EngineError::Config(format!(
          "unknown strategy '{}', expected one of: sequential, threaded, processed",
          s
        ))
      })
  }
}

/// Everything a strategy needs to run a validated graph.
pub struct ExecutionPlan {
  pub(crate) nodes: Vec<Arc<Node>>,
  pub(crate) order: Vec<NodeId>,
  pub(crate) successors: Vec<Vec<NodeId>>,
  pub(crate) entries: Vec<NodeId>,
  pub(crate) initial: Vec<Arc<Bag>>,
  pub(crate) context: Arc<ExecutionContext>,
  pub(crate) sink: SinkHandle,
}

impl ExecutionPlan {
  /// Node by id.
  pub fn node(&self, id: NodeId) -> &Arc<Node> {
    &self.nodes[id.index()]
  }

  /// Node ids in topological order.
  pub fn order(&self) -> &[NodeId] {
    &self.order
  }

  /// Direct successors of a node, in edge order.
  pub fn successors(&self, id: NodeId) -> &[NodeId] {
    &self.successors[id.index()]
  }

  /// Nodes without predecessors, in topological order.
  pub fn entries(&self) -> &[NodeId] {
    &self.entries
  }

  /// Bags every entry node receives.
  pub fn initial(&self) -> &[Arc<Bag>] {
    &self.initial
  }

  /// Runtime state of the run.
  pub fn context(&self) -> &Arc<ExecutionContext> {
    &self.context
  }

  /// Per-node runtime state.
  pub fn node_context(&self, id: NodeId) -> &Arc<NodeExecutionContext> {
    &self.context.nodes()[id.index()]
  }

  /// Handle delivering exit-node outputs to the sinks.
  pub fn sink(&self) -> &SinkHandle {
    &self.sink
  }
}

/// How a run is scheduled.
#[async_trait]
pub trait Strategy: Send + Sync {
  /// Which variant this is.
  fn kind(&self) -> StrategyKind;

  /// Runs `plan` to completion (or cancellation).
  ///
  /// Per-Bag failures are recorded in the context; only failures to start
  /// or stop execution units are returned as errors.
  async fn run(&self, plan: ExecutionPlan) -> Result<()>;
}

/// Builds the strategy of the given kind.
pub fn create(kind: StrategyKind, worker: &WorkerCommand) -> Box<dyn Strategy> {
  match kind {
    StrategyKind::Sequential => Box::new(SequentialStrategy),
    StrategyKind::Threaded => Box::new(ThreadedStrategy),
    StrategyKind::Processed => Box::new(ProcessedStrategy::new(worker.clone())),
  }
}

/// Handles one input of one node in-process.
///
/// Counts the input, then either forwards it (error Bag), swallows it
/// (defunct node) or invokes the transform and passes each output to
/// `emit` as soon as it is produced. Stops early if the run is cancelled or
/// `emit` reports that every consumer is gone.
pub(crate) fn process(
  node: &Node,
  ctx: &NodeExecutionContext,
  input: &Arc<Bag>,
  mut emit: impl FnMut(Arc<Bag>) -> std::result::Result<(), Closed>,
) -> std::result::Result<(), Closed> {
  ctx.received();
  if input.is_error() {
    ctx.sent();
    return emit(Arc::clone(input));
  }
  if ctx.is_defunct() {
    return Ok(());
  }
  let mut failed = false;
  for output in node.invoke(ctx.id(), input) {
    let bag = match output {
      Ok(bag) => bag,
      Err(err) => {
        failed = true;
        ctx.fail(input, err)
      }
    };
    ctx.sent();
    emit(bag)?;
    if ctx.is_cancelled() {
      break;
    }
  }
  if !failed {
    ctx.succeeded();
  }
  Ok(())
}
