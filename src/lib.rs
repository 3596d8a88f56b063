//! # Bagpipe
//!
//! Graph-based ETL in Rust: bags of values pushed through a directed acyclic
//! graph of transforms.
//!
//! Bagpipe assembles a pipeline from plain transformation functions, pushes
//! data through it as discrete units of work ([`Bag`](bag::Bag)s) and runs
//! it under interchangeable concurrency strategies without changing what the
//! pipeline produces.
//!
//! ## Key Features
//!
//! - **Graph Pipelines**: linear chains, fan-out and fan-in over a validated DAG
//! - **Plain Functions**: closures become nodes, arity inferred from the signature
//! - **Streaming Outputs**: generator-like transforms forward results one by one
//! - **Three Strategies**: sequential, one thread per node, one process per node
//! - **Deterministic Ordering**: per-edge FIFO order whatever the strategy
//! - **Failure Isolation**: failures travel as error Bags, the run keeps draining
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bagpipe::bag::Value;
//! use bagpipe::config::RunOptions;
//! use bagpipe::execution::GraphExecutor;
//! use bagpipe::graph::Graph;
//! use bagpipe::node::Node;
//! use bagpipe::sink::ConsoleSink;
//! use bagpipe::strategy::StrategyKind;
//! use bagpipe::transform::Emit;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::new("strings");
//! graph.add_chain([
//!   Node::new("extract", || Emit::stream(["foo", "bar", "baz"])),
//!   Node::new("transform", |s: Value| s.as_str().unwrap_or_default().to_uppercase()),
//! ])?;
//!
//! let options = RunOptions::default().with_strategy(StrategyKind::Threaded);
//! let result = GraphExecutor::new(options)
//!   .with_plugin(ConsoleSink::new(false))
//!   .execute(&graph, Vec::new())
//!   .await?;
//! println!("{}", result.status);
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Data envelope flowing along graph edges.
pub mod bag;
/// Built-in transforms and demo pipelines.
pub mod builtin;
/// Run options and failure policy.
pub mod config;
/// Per-run and per-node runtime state.
pub mod context;
/// TOML pipeline definitions.
pub mod definition;
/// Environment injection for the duration of a run.
pub mod env;
/// Error types.
pub mod error;
/// Graph execution entry point.
pub mod execution;
/// Graph model and topological ordering.
pub mod graph;
/// Logging setup.
pub mod logging;
/// Nodes wrapping transforms.
pub mod node;
/// Queues between execution units.
pub mod queue;
/// Node and pipeline registry.
pub mod registry;
/// Result of a run.
pub mod result;
/// Sinks receiving exit-node outputs.
pub mod sink;
/// Execution strategies.
pub mod strategy;
/// Transform trait and return shapes.
pub mod transform;
/// Worker process wire protocol.
pub mod wire;
/// Worker process mode.
pub mod worker;

pub use bag::{Bag, Value};
pub use config::{FailurePolicy, RunOptions};
pub use error::{EngineError, NodeInvocationError, Result, TransformError};
pub use execution::GraphExecutor;
pub use graph::{Graph, NodeId};
pub use node::Node;
pub use result::{ExecutionResult, RunStatus};
pub use strategy::StrategyKind;
pub use transform::{Arity, Emit};

#[cfg(test)]
mod builtin_test;
#[cfg(test)]
mod definition_test;
#[cfg(test)]
mod error_test;
#[cfg(test)]
mod node_test;
#[cfg(test)]
mod sink_test;
