//! Processed strategy: one worker process per node.
//!
//! Every node is rebuilt inside its own child process from its registry
//! key, so nodes not built through a [`Registry`](crate::registry::Registry)
//! are refused up front. All children are spawned before any Bag moves; a
//! spawn failure aborts the run with nothing executed.
//!
//! In the parent, each node gets one async unit made of two halves joined on
//! the same task: a writer draining the node's inbound queue into the
//! child's stdin, and a reader turning the child's replies into output Bags.
//! A queue of pending requests links the two, which keeps outputs, forwarded
//! error Bags and failures in input order.
//!
//! If a child dies, every request it left unanswered becomes a fatal
//! `WorkerCrashed` error Bag, making the node defunct; the unit keeps
//! draining its input so the rest of the graph completes.

use super::{ExecutionPlan, Strategy, StrategyKind};
use crate::bag::Bag;
use crate::context::NodeExecutionContext;
use crate::error::{EngineError, NodeInvocationError, Result, TransformError};
use crate::queue::{queue, Outlet, QueueReceiver, QueueSender};
use crate::wire::{Reply, RequestRef};
use crate::worker::WORKER_ENV;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Program (and arguments) started for each worker.
///
/// Defaults to the running executable, which must call
/// [`serve_if_requested`](crate::worker::serve_if_requested) before anything
/// else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerCommand {
  program: PathBuf,
  args: Vec<OsString>,
}

impl WorkerCommand {
  /// Runs `program` without arguments.
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
    }
  }

  /// Adds arguments.
  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  /// Program path.
  pub fn program(&self) -> &PathBuf {
    &self.program
  }

  fn spawn(&self, key: &str) -> std::io::Result<Child> {
    Command::new(&self.program)
      .args(&self.args)
      .env(WORKER_ENV, key)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()
  }
}

impl Default for WorkerCommand {
  fn default() -> Self {
    let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("bagpipe"));
    Self::new(program)
  }
}

/// Runs each node in its own worker process.
#[derive(Clone, Debug, Default)]
pub struct ProcessedStrategy {
  command: WorkerCommand,
}

impl ProcessedStrategy {
  /// Strategy starting workers with `command`.
  pub fn new(command: WorkerCommand) -> Self {
    Self { command }
  }
}

#[async_trait]
impl Strategy for ProcessedStrategy {
  fn kind(&self) -> StrategyKind {
    StrategyKind::Processed
  }

  async fn run(&self, plan: ExecutionPlan) -> Result<()> {
    let mut keys = Vec::with_capacity(plan.nodes.len());
    for node in &plan.nodes {
      let key = node.registry_key().ok_or_else(|| {
        EngineError::Strategy(format!(
          "node '{}' was not built from the registry and cannot run in a worker process",
          node.name()
        ))
      })?;
      keys.push(key);
    }
    let mut workers = Vec::with_capacity(keys.len());
    for (node, key) in plan.nodes.iter().zip(keys) {
      let mut child = self.command.spawn(key).map_err(|err| {
        EngineError::Strategy(format!(
          "failed to spawn worker {:?} for node '{}': {}",
          self.command.program(),
          node.name(),
          err
        ))
      })?;
      let pipes = child.stdin.take().zip(child.stdout.take()).ok_or_else(|| {
        EngineError::Strategy(format!("worker for node '{}' has no stdio pipes", node.name()))
      })?;
      debug!(node = %node.name(), key = %key, pid = ?child.id(), "worker spawned");
      workers.push(Some((child, pipes)));
    }

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
      let (inbound, worker) = receivers[id.index()]
        .take()
        .zip(workers[id.index()].take())
        .ok_or_else(|| EngineError::Strategy(format!("node {} scheduled twice", id)))?;
      let cancel = cancel.clone();
      units.push(tokio::spawn(async move {
        let (child, (stdin, stdout)) = worker;
        unit(ctx, child, stdin, stdout, inbound, outlet, cancel).await;
      }));
    }
    drop(senders);

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
    drop(feeds);

    let mut failure = None;
    for joined in join_all(units).await {
      if let Err(err) = joined {
        failure.get_or_insert_with(|| EngineError::Strategy(format!("worker unit failed: {}", err)));
      }
    }
    failure.map_or(Ok(()), Err)
  }
}

/// What to do once the worker acknowledges a request.
enum Pending {
  /// The Bag was sent for invocation.
  Invoke(Arc<Bag>),
  /// An error Bag to forward as is.
  Forward(Arc<Bag>),
  /// Input of a defunct node, dropped.
  Skip,
}

type PendingQueue = Mutex<VecDeque<(u64, Pending)>>;

async fn unit(
  ctx: Arc<NodeExecutionContext>,
  mut child: Child,
  stdin: ChildStdin,
  stdout: ChildStdout,
  inbound: QueueReceiver,
  outlet: Outlet,
  cancel: CancellationToken,
) {
  ctx.start();
  let pending: PendingQueue = Mutex::new(VecDeque::new());
  tokio::join!(
    write_requests(&ctx, stdin, inbound, &outlet, &pending, &cancel),
    read_replies(&ctx, stdout, &outlet, &pending, &cancel),
  );
  if cancel.is_cancelled() {
    if let Err(err) = child.start_kill() {
      trace!(error = %err, "worker already gone");
    }
  } else {
    sweep(&ctx, &outlet, &pending).await;
  }
  match child.wait().await {
    Ok(status) if !status.success() && !cancel.is_cancelled() => {
      warn!(node = %ctx.name(), %status, "worker exited abnormally");
    }
    Ok(_) => {}
    Err(err) => warn!(node = %ctx.name(), error = %err, "failed to reap worker"),
  }
  ctx.finish();
}

fn lock(pending: &PendingQueue) -> std::sync::MutexGuard<'_, VecDeque<(u64, Pending)>> {
  pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn crashed(ctx: &NodeExecutionContext, input: &Arc<Bag>) -> Arc<Bag> {
  let error = NodeInvocationError::new(
    ctx.id(),
    ctx.name(),
    TransformError::fatal("WorkerCrashed", "worker process exited before answering"),
  );
  ctx.fail(input, error)
}

async fn emit(ctx: &NodeExecutionContext, outlet: &Outlet, bag: Arc<Bag>) {
  ctx.sent();
  if outlet.send(bag).await.is_err() {
    trace!(node = %ctx.name(), "downstream closed");
  }
}

async fn write_requests(
  ctx: &NodeExecutionContext,
  mut stdin: ChildStdin,
  mut inbound: QueueReceiver,
  outlet: &Outlet,
  pending: &PendingQueue,
  cancel: &CancellationToken,
) {
  let mut seq = 0u64;
  let mut alive = true;
  loop {
    let input = tokio::select! {
      _ = cancel.cancelled() => break,
      input = inbound.recv() => match input {
        Some(input) => input,
        None => break,
      },
    };
    ctx.received();
    if !alive {
      if input.is_error() {
        emit(ctx, outlet, input).await;
      } else if !ctx.is_defunct() {
        let failed = crashed(ctx, &input);
        emit(ctx, outlet, failed).await;
      }
      continue;
    }
    let (entry, bag) = if input.is_error() {
      (Pending::Forward(Arc::clone(&input)), None)
    } else if ctx.is_defunct() {
      (Pending::Skip, None)
    } else {
      (Pending::Invoke(Arc::clone(&input)), Some(&*input))
    };
    let line = match serde_json::to_string(&RequestRef { seq, bag }) {
      Ok(line) => line,
      Err(err) => {
        let error = NodeInvocationError::new(ctx.id(), ctx.name(), TransformError::from_error(&err));
        let failed = ctx.fail(&input, error);
        emit(ctx, outlet, failed).await;
        continue;
      }
    };
    lock(pending).push_back((seq, entry));
    seq += 1;
    let written = async {
      stdin.write_all(line.as_bytes()).await?;
      stdin.write_all(b"\n").await?;
      stdin.flush().await
    };
    if let Err(err) = written.await {
      debug!(node = %ctx.name(), error = %err, "worker stdin closed");
      alive = false;
    }
  }
  // Closing stdin lets the worker finish and exit.
  drop(stdin);
}

async fn read_replies(
  ctx: &NodeExecutionContext,
  stdout: ChildStdout,
  outlet: &Outlet,
  pending: &PendingQueue,
  cancel: &CancellationToken,
) {
  let mut lines = BufReader::new(stdout).lines();
  let mut failed = false;
  loop {
    let line = tokio::select! {
      _ = cancel.cancelled() => return,
      line = lines.next_line() => match line {
        Ok(Some(line)) => line,
        Ok(None) => break,
        Err(err) => {
          debug!(node = %ctx.name(), error = %err, "worker stdout failed");
          break;
        }
      },
    };
    let reply = match Reply::from_line(&line) {
      None => {
        debug!(node = %ctx.name(), output = %line, "worker output");
        continue;
      }
      Some(Err(err)) => {
        warn!(node = %ctx.name(), error = %err, "unreadable worker reply");
        continue;
      }
      Some(Ok(reply)) => reply,
    };
    let front = {
      let queue = lock(pending);
      let front = match queue.front() {
        Some((seq, Pending::Invoke(input))) if *seq == reply.seq() => Some(Arc::clone(input)),
        Some((seq, _)) if *seq == reply.seq() => None,
        _ => {
          warn!(node = %ctx.name(), seq = reply.seq(), "reply out of sequence");
          continue;
        }
      };
      front
    };
    match (reply, front) {
      (Reply::Emit { bag, .. }, Some(input)) => {
        emit(ctx, outlet, Arc::new(bag.derived_from(&input))).await;
      }
      (Reply::Forward { .. }, Some(input)) => emit(ctx, outlet, input).await,
      (Reply::Failed { error, .. }, Some(input)) => {
        failed = true;
        let error = NodeInvocationError::new(ctx.id(), ctx.name(), error);
        let bag = ctx.fail(&input, error);
        emit(ctx, outlet, bag).await;
      }
      (Reply::Done { .. }, _) => {
        let done = lock(pending).pop_front();
        match done {
          Some((_, Pending::Invoke(_))) if !failed => ctx.succeeded(),
          Some((_, Pending::Forward(input))) => emit(ctx, outlet, input).await,
          _ => {}
        }
        failed = false;
      }
      (reply, None) => {
        warn!(node = %ctx.name(), seq = reply.seq(), "unexpected reply to an acknowledgement");
      }
    }
  }
  sweep(ctx, outlet, pending).await;
}

/// Settles requests the worker will never answer.
async fn sweep(ctx: &NodeExecutionContext, outlet: &Outlet, pending: &PendingQueue) {
  loop {
    let next = lock(pending).pop_front();
    match next {
      Some((_, Pending::Invoke(input))) => {
        let failed = crashed(ctx, &input);
        emit(ctx, outlet, failed).await;
      }
      Some((_, Pending::Forward(input))) => emit(ctx, outlet, input).await,
      Some((_, Pending::Skip)) => {}
      None => break,
    }
  }
}
