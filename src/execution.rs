//! # Graph Execution
//!
//! [`GraphExecutor`] runs a [`Graph`] once with a given set of
//! [`RunOptions`] and sinks.
//!
//! ## Execution Flow
//!
//! 1. **Validation**: the graph is validated (dangling edges, cycles) before
//!    anything else; structural errors abort with no node started
//! 2. **Environment**: the run's `KEY=VALUE` assignments are applied
//! 3. **Context**: one node context per node, one cancellation token
//! 4. **Dispatch**: the sink dispatcher thread starts
//! 5. **Strategy**: the configured strategy runs the plan, feeding every
//!    initial Bag to every entry node
//! 6. **Shutdown**: the dispatcher drains, sinks receive the result, the
//!    environment is restored
//!
//! A time limit cancels the run when it expires; the run is still drained
//! and the sinks still see the partial result, but `execute` then returns
//! [`EngineError::Timeout`] carrying that result.
//!
//! # Example
//!
//! ```rust,no_run
//! use bagpipe::bag::{Bag, Value};
//! use bagpipe::config::RunOptions;
//! use bagpipe::execution::GraphExecutor;
//! use bagpipe::graph::Graph;
//! use bagpipe::node::Node;
//! use bagpipe::sink::ConsoleSink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::new("hello");
//! graph.add_chain([
//!   Node::new("greet", || "hello"),
//!   Node::new("shout", |s: Value| s.as_str().unwrap_or_default().to_uppercase()),
//! ])?;
//!
//! let result = GraphExecutor::new(RunOptions::default().with_quiet(true))
//!   .with_plugin(ConsoleSink::new(true))
//!   .execute(&graph, Vec::<Bag>::new())
//!   .await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

use crate::bag::Bag;
use crate::config::RunOptions;
use crate::context::ExecutionContext;
use crate::env;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::result::ExecutionResult;
use crate::sink::{self, Sink};
use crate::strategy::{self, ExecutionPlan, WorkerCommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs graphs.
pub struct GraphExecutor {
  options: RunOptions,
  plugins: Vec<Box<dyn Sink>>,
  worker: WorkerCommand,
  cancel: CancellationToken,
}

impl GraphExecutor {
  /// Executor for one run with `options` and no sink.
  pub fn new(options: RunOptions) -> Self {
    Self {
      options,
      plugins: Vec::new(),
      worker: WorkerCommand::default(),
      cancel: CancellationToken::new(),
    }
  }

  /// Adds a sink. Sinks are called in the order they were added.
  pub fn with_plugin(mut self, sink: impl Sink + 'static) -> Self {
    self.plugins.push(Box::new(sink));
    self
  }

  /// Program started for each worker by the processed strategy.
  pub fn with_worker(mut self, command: WorkerCommand) -> Self {
    self.worker = command;
    self
  }

  /// Options of this run.
  pub fn options(&self) -> &RunOptions {
    &self.options
  }

  /// Token cancelling the run when triggered.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Executes `graph`, feeding every Bag of `initial` to every entry node.
  ///
  /// An empty `initial` means one empty Bag.
  ///
  /// # Errors
  ///
  /// - [`EngineError::Config`] for invalid options
  /// - [`EngineError::GraphCycle`] / [`EngineError::UnknownNode`] for an
  ///   invalid graph
  /// - [`EngineError::Strategy`] if execution units cannot be started
  /// - [`EngineError::Timeout`] if the time limit expired
  ///
  /// Per-Bag failures are not errors: they are reported in the returned
  /// [`ExecutionResult`].
  pub async fn execute(self, graph: &Graph, initial: Vec<Bag>) -> Result<ExecutionResult> {
    let GraphExecutor {
      options,
      plugins,
      worker,
      cancel,
    } = self;
    options.check()?;
    let order = graph.ordered_ids()?;
    let strategy = strategy::create(options.strategy, &worker);
    let limit = options.timeout();

    let _env = env::scope(&options.env).await;
    let context = Arc::new(ExecutionContext::new(
      graph,
      order.clone(),
      options,
      cancel,
    ));
    let (handle, dispatcher) = sink::dispatch(plugins);

    let initial = if initial.is_empty() {
      vec![Arc::new(Bag::empty())]
    } else {
      initial.into_iter().map(Arc::new).collect()
    };
    let entries = order
      .iter()
      .copied()
      .filter(|id| graph.predecessors(*id).is_empty())
      .collect();
    let plan = ExecutionPlan {
      nodes: graph.shared_nodes().to_vec(),
      successors: graph.node_ids().map(|id| graph.successors(id).to_vec()).collect(),
      order,
      entries,
      initial,
      context: Arc::clone(&context),
      sink: handle,
    };

    info!(
      graph = %graph.name(),
      nodes = graph.len(),
      strategy = %strategy.kind(),
      "run started"
    );
    let timer = limit.map(|limit| {
      let context = Arc::clone(&context);
      tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        debug!(?limit, "time limit reached, cancelling run");
        context.time_out();
      })
    });

    let outcome = strategy.run(plan).await;
    if let Some(timer) = timer {
      timer.abort();
    }
    let mut sinks = dispatcher
      .await
      .map_err(|err| EngineError::Strategy(format!("sink dispatcher failed: {}", err)))?;
    outcome?;

    let result = context.result();
    sink::finish(&mut sinks, &result);
    info!(
      graph = %graph.name(),
      status = %result.status,
      received = result.totals.received,
      sent = result.totals.sent,
      errored = result.totals.errored,
      "run finished"
    );
    match limit {
      Some(limit) if context.timed_out() => Err(EngineError::Timeout {
        limit,
        result: Box::new(result),
      }),
      _ => Ok(result),
    }
  }
}
