//! # Worker Mode
//!
//! The other end of the processed strategy: a process serving one node over
//! stdin/stdout.
//!
//! The processed strategy re-executes the program with [`WORKER_ENV`] set to
//! the node's registry key. [`serve_if_requested`], called first thing in
//! `main`, notices the variable, rebuilds the node from the registry and
//! answers requests until stdin is closed.

use crate::bag::Bag;
use crate::error::{EngineError, Result};
use crate::graph::NodeId;
use crate::node::Node;
use crate::registry::Registry;
use crate::wire::{Reply, Request};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error};

/// Environment variable holding the registry key of the node to serve.
pub const WORKER_ENV: &str = "BAGPIPE_WORKER";

/// Serves a node if this process was started as a worker.
///
/// Returns the exit code to terminate with, or `None` when the process is
/// not a worker and should carry on normally.
pub fn serve_if_requested(registry: &Registry) -> Option<ExitCode> {
  let key = std::env::var(WORKER_ENV).ok()?;
  let node = match registry.node(&key) {
    Ok(node) => node,
    Err(err) => {
      error!(key = %key, error = %err, "worker cannot build its node");
      return Some(ExitCode::from(2));
    }
  };
  let stdin = io::stdin();
  let stdout = io::stdout();
  match serve(&node, stdin.lock(), stdout.lock()) {
    Ok(()) => Some(ExitCode::SUCCESS),
    Err(err) => {
      error!(key = %key, error = %err, "worker failed");
      Some(ExitCode::FAILURE)
    }
  }
}

/// Answers requests read from `input` until it is exhausted.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if a request cannot be read or parsed, or a
/// reply cannot be written.
pub fn serve(node: &Node, input: impl BufRead, mut output: impl Write) -> Result<()> {
  debug!(node = %node.name(), "worker serving");
  for line in input.lines() {
    let line = line?;
    if line.trim().is_empty() {
      continue;
    }
    let request: Request = serde_json::from_str(&line).map_err(io::Error::from)?;
    if let Some(bag) = request.bag {
      answer(node, request.seq, bag, &mut output)?;
    }
    write_reply(&mut output, &Reply::Done { seq: request.seq })?;
  }
  debug!(node = %node.name(), "worker input closed");
  Ok(())
}

fn answer(node: &Node, seq: u64, bag: Bag, output: &mut impl Write) -> Result<()> {
  let input = Arc::new(bag);
  for outcome in node.invoke(NodeId::from_index(0), &input) {
    let reply = match outcome {
      Ok(out) if Arc::ptr_eq(&out, &input) => Reply::Forward { seq },
      Ok(out) => Reply::Emit {
        seq,
        bag: Arc::unwrap_or_clone(out),
      },
      Err(err) => Reply::Failed {
        seq,
        error: err.into(),
      },
    };
    write_reply(output, &reply)?;
  }
  Ok(())
}

fn write_reply(output: &mut impl Write, reply: &Reply) -> Result<()> {
  let line = reply.to_line().map_err(io::Error::from)?;
  writeln!(output, "{}", line)?;
  output.flush().map_err(EngineError::from)
}
