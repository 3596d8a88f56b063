//! Threaded strategy: one blocking worker thread per node.
//!
//! Each node owns one inbound queue. Every incoming edge holds its own
//! sender, entry nodes get one more held by the feeder task, and a queue
//! closes once all of those are gone. A unit loops on its queue until it is
//! closed and drained, then drops its outlet, which is what closes the
//! queues of its successors in turn.
//!
//! With a bounded `queue_capacity`, a unit whose consumer lags blocks in
//! `send_blocking` until room frees up.

use super::{process, ExecutionPlan, Strategy, StrategyKind};
use crate::context::NodeExecutionContext;
use crate::error::{EngineError, Result};
use crate::node::Node;
use crate::queue::{queue, Outlet, QueueReceiver, QueueSender};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Runs each node on its own blocking thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadedStrategy;

#[async_trait]
impl Strategy for ThreadedStrategy {
  fn kind(&self) -> StrategyKind {
    StrategyKind::Threaded
  }

  async fn run(&self, plan: ExecutionPlan) -> Result<()> {
    let capacity = plan.context().options().queue_capacity;
    let cancel = plan.context().cancellation().clone();

    let (senders, mut receivers): (Vec<QueueSender>, Vec<Option<QueueReceiver>>) = plan
      .nodes
      .iter()
      .map(|_| {
        let (tx, rx) = queue(capacity);
        (tx, Some(rx))
      })
      .unzip();

    let feeds: Vec<QueueSender> = plan
      .entries()
      .iter()
      .map(|id| senders[id.index()].clone())
      .collect();

    let mut units = Vec::with_capacity(plan.order().len());
    for id in plan.order() {
      let successors = plan.successors(*id);
      let ctx = Arc::clone(plan.node_context(*id));
      let outlet = if successors.is_empty() {
        Outlet::Sink {
          node: ctx.shared_name(),
          handle: plan.sink().clone(),
        }
      } else {
        Outlet::Queues(
          successors
            .iter()
            .map(|next| senders[next.index()].clone())
            .collect(),
        )
      };
      let inbound = receivers[id.index()]
        .take()
        .ok_or_else(|| EngineError::Strategy(format!("node {} scheduled twice", id)))?;
      let node = Arc::clone(plan.node(*id));
      units.push(tokio::task::spawn_blocking(move || {
        unit(&node, &ctx, inbound, outlet)
      }));
    }
    // Only the outlets and the feeds keep queues open from here on.
    drop(senders);

    feed(&plan, feeds, &cancel).await;

    let mut failure = None;
    for joined in join_all(units).await {
      if let Err(err) = joined {
        failure.get_or_insert_with(|| EngineError::Strategy(format!("node thread failed: {}", err)));
      }
    }
    failure.map_or(Ok(()), Err)
  }
}

async fn feed(plan: &ExecutionPlan, feeds: Vec<QueueSender>, cancel: &CancellationToken) {
  'bags: for bag in plan.initial() {
    for sender in &feeds {
      tokio::select! {
        _ = cancel.cancelled() => break 'bags,
        sent = sender.send(Arc::clone(bag)) => {
          if sent.is_err() {
            trace!("entry queue closed before the initial bags were fed");
          }
        }
      }
    }
  }
}

fn unit(node: &Node, ctx: &NodeExecutionContext, mut inbound: QueueReceiver, outlet: Outlet) {
  ctx.start();
  debug!(node = %ctx.name(), id = %ctx.id(), "unit started");
  while let Some(input) = inbound.recv_blocking() {
    if ctx.is_cancelled() {
      inbound.close();
      break;
    }
    if process(node, ctx, &input, |output| outlet.send_blocking(output)).is_err() {
      inbound.close();
      break;
    }
  }
  ctx.finish();
}
