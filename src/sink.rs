//! # Sinks
//!
//! Where the outputs of exit nodes end up.
//!
//! A [`Sink`] receives every Bag produced by an exit node, error Bags
//! included, followed by one [`Sink::on_finish`] call with the result of the
//! run. Several sinks can be installed; they see the same Bags in the same
//! order, in the order they were installed.
//!
//! ## Dispatch
//!
//! Execution units never call sinks directly. They push deliveries through a
//! [`SinkHandle`] into one dispatcher thread, which calls the sinks in
//! emission order. Sinks therefore need `Send` but not `Sync`, and a slow
//! sink cannot interleave its output with another unit's.
//!
//! ## Provided Sinks
//!
//! - [`ConsoleSink`]: human readable output on stdout/stderr
//! - [`MemorySink`]: collects deliveries for inspection

use crate::bag::Bag;
use crate::queue::Closed;
use crate::result::ExecutionResult;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Receiver of exit-node outputs.
pub trait Sink: Send {
  /// Called for each Bag emitted by exit node `node`, in emission order.
  fn on_bag(&mut self, node: &str, bag: &Bag) -> io::Result<()>;

  /// Called once after the run has drained.
  fn on_finish(&mut self, _result: &ExecutionResult) -> io::Result<()> {
    Ok(())
  }
}

/// Sink printing Bags to the console.
///
/// Quiet mode prints one minimal line per Bag (`Foo 3 key=value`). Verbose
/// mode prints the emitting node with the full Bag, and a per-node summary
/// once the run finishes. Error Bags go to the error writer in both modes,
/// and the failure report is printed whenever the run had failures.
pub struct ConsoleSink {
  quiet: bool,
  out: Box<dyn Write + Send>,
  err: Box<dyn Write + Send>,
}

impl ConsoleSink {
  /// Console sink on stdout and stderr.
  pub fn new(quiet: bool) -> Self {
    Self::with_writers(quiet, io::stdout(), io::stderr())
  }

  /// Console sink on arbitrary writers.
  pub fn with_writers(
    quiet: bool,
    out: impl Write + Send + 'static,
    err: impl Write + Send + 'static,
  ) -> Self {
    Self {
      quiet,
      out: Box::new(out),
      err: Box::new(err),
    }
  }

  fn write_summary(&mut self, result: &ExecutionResult) -> io::Result<()> {
    for report in &result.nodes {
      writeln!(
        self.err,
        " - {} {} in={} out={} err={} [{}]",
        report.id,
        report.name,
        report.counters.received,
        report.counters.sent,
        report.counters.errored,
        report.status
      )?;
    }
    writeln!(
      self.err,
      "{} in {}ms",
      result.status,
      result.elapsed().num_milliseconds()
    )
  }

  fn write_failures(&mut self, result: &ExecutionResult) -> io::Result<()> {
    if result.cancelled {
      writeln!(self.err, "run cancelled before completion")?;
    }
    for report in result.nodes.iter().filter(|report| !report.failures.is_empty()) {
      writeln!(
        self.err,
        "node '{}' ({}) is {} after {} failure(s):",
        report.name,
        report.id,
        report.status,
        report.failures.len()
      )?;
      for failure in &report.failures {
        writeln!(self.err, "    {}: {}", failure.kind, failure.message)?;
      }
    }
    Ok(())
  }
}

impl Sink for ConsoleSink {
  fn on_bag(&mut self, node: &str, bag: &Bag) -> io::Result<()> {
    if let Some(error) = bag.error() {
      writeln!(self.err, "error: {}", error)?;
      return self.err.flush();
    }
    if self.quiet {
      writeln!(self.out, "{}", bag.render_minimal())?;
    } else {
      writeln!(self.out, "{}: {}", node, bag)?;
    }
    self.out.flush()
  }

  fn on_finish(&mut self, result: &ExecutionResult) -> io::Result<()> {
    if !self.quiet {
      self.write_summary(result)?;
    }
    if !result.is_success() {
      self.write_failures(result)?;
    }
    self.out.flush()?;
    self.err.flush()
  }
}

/// One delivery seen by a [`MemorySink`].
#[derive(Clone, Debug)]
pub struct SinkRecord {
  /// Emitting exit node.
  pub node: String,
  /// The delivered Bag.
  pub bag: Arc<Bag>,
}

/// Sink collecting deliveries in memory.
///
/// Clones share the same storage, so a clone kept by the caller can inspect
/// what the installed one received.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
  records: Arc<Mutex<Vec<SinkRecord>>>,
  finished: Arc<Mutex<Option<ExecutionResult>>>,
}

impl MemorySink {
  /// Empty sink.
  pub fn new() -> Self {
    Self::default()
  }

  /// Every delivery so far, in order.
  pub fn records(&self) -> Vec<SinkRecord> {
    self
      .records
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Delivered Bags in minimal rendering, error Bags excluded.
  pub fn rendered(&self) -> Vec<String> {
    self
      .records()
      .iter()
      .filter(|record| !record.bag.is_error())
      .map(|record| record.bag.render_minimal())
      .collect()
  }

  /// The result passed to `on_finish`, once the run is over.
  pub fn result(&self) -> Option<ExecutionResult> {
    self
      .finished
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

impl Sink for MemorySink {
  fn on_bag(&mut self, node: &str, bag: &Bag) -> io::Result<()> {
    self
      .records
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(SinkRecord {
        node: node.to_string(),
        bag: Arc::new(bag.clone()),
      });
    Ok(())
  }

  fn on_finish(&mut self, result: &ExecutionResult) -> io::Result<()> {
    *self.finished.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
    Ok(())
  }
}

/// Sending side of the sink dispatcher.
#[derive(Clone, Debug)]
pub struct SinkHandle {
  tx: mpsc::UnboundedSender<(Arc<str>, Arc<Bag>)>,
}

impl SinkHandle {
  /// Queues `bag`, emitted by exit node `node`, for the sinks.
  pub fn deliver(&self, node: &Arc<str>, bag: Arc<Bag>) -> Result<(), Closed> {
    trace!(node = %node, "SinkHandle::deliver()");
    self.tx.send((Arc::clone(node), bag)).map_err(|_| Closed)
  }
}

/// Starts the dispatcher thread for `sinks`.
///
/// The dispatcher runs until every [`SinkHandle`] is dropped, then hands the
/// sinks back through the join handle so `on_finish` can be called on them.
/// Must be called from within a tokio runtime.
pub fn dispatch(sinks: Vec<Box<dyn Sink>>) -> (SinkHandle, JoinHandle<Vec<Box<dyn Sink>>>) {
  let (tx, mut rx) = mpsc::unbounded_channel::<(Arc<str>, Arc<Bag>)>();
  let join = tokio::task::spawn_blocking(move || {
    let mut sinks = sinks;
    while let Some((node, bag)) = rx.blocking_recv() {
      for sink in sinks.iter_mut() {
        if let Err(err) = sink.on_bag(&node, &bag) {
          warn!(node = %node, error = %err, "sink failed to handle bag");
        }
      }
    }
    sinks
  });
  (SinkHandle { tx }, join)
}

/// Calls `on_finish` on every sink, in order.
pub(crate) fn finish(sinks: &mut [Box<dyn Sink>], result: &ExecutionResult) {
  for sink in sinks.iter_mut() {
    if let Err(err) = sink.on_finish(result) {
      warn!(error = %err, "sink failed to finish");
    }
  }
}
