//! Sequential strategy: one scheduler thread, depth-first.
//!
//! Each initial Bag is handed to every entry node (in topological order),
//! and every output is pushed through the rest of the graph before the next
//! output of the same invocation is pulled. Outputs therefore reach the sink
//! in exactly the order a single-threaded reading of the graph suggests,
//! and two runs of the same graph produce identical output.

use super::{process, ExecutionPlan, Strategy, StrategyKind};
use crate::bag::Bag;
use crate::error::{EngineError, Result};
use crate::graph::NodeId;
use crate::queue::Closed;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs every node on one blocking thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialStrategy;

#[async_trait]
impl Strategy for SequentialStrategy {
  fn kind(&self) -> StrategyKind {
    StrategyKind::Sequential
  }

  async fn run(&self, plan: ExecutionPlan) -> Result<()> {
    tokio::task::spawn_blocking(move || schedule(&plan))
      .await
      .map_err(|err| EngineError::Strategy(format!("sequential scheduler failed: {}", err)))
  }
}

fn schedule(plan: &ExecutionPlan) {
  debug!(nodes = plan.order().len(), "sequential scheduler started");
  for id in plan.order() {
    plan.node_context(*id).start();
  }
  'bags: for bag in plan.initial() {
    for entry in plan.entries() {
      if plan.context().is_cancelled() {
        break 'bags;
      }
      // Closed only surfaces once the sink dispatcher is gone.
      if visit(plan, *entry, bag).is_err() {
        break 'bags;
      }
    }
  }
  for id in plan.order() {
    plan.node_context(*id).finish();
  }
  debug!("sequential scheduler finished");
}

fn visit(plan: &ExecutionPlan, id: NodeId, input: &Arc<Bag>) -> std::result::Result<(), Closed> {
  if plan.context().is_cancelled() {
    return Ok(());
  }
  let ctx = plan.node_context(id);
  let successors = plan.successors(id);
  process(plan.node(id), ctx, input, |output| {
    if successors.is_empty() {
      plan.sink().deliver(&ctx.shared_name(), output)
    } else {
      for next in successors {
        visit(plan, *next, &output)?;
      }
      Ok(())
    }
  })
}
