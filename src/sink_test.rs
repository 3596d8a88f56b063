use crate::bag::{Bag, Kwargs};
use crate::context::NodeStatus;
use crate::error::{NodeInvocationError, TransformError};
use crate::graph::NodeId;
use crate::result::{CounterSnapshot, ExecutionResult, NodeReport};
use crate::sink::{dispatch, ConsoleSink, MemorySink, Sink};
use chrono::Utc;
use serde_json::json;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Writer appending into a shared buffer.
#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
  fn text(&self) -> String {
    String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
  }
}

impl Write for Buffer {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

fn console(quiet: bool) -> (ConsoleSink, Buffer, Buffer) {
  let out = Buffer::default();
  let err = Buffer::default();
  (ConsoleSink::with_writers(quiet, out.clone(), err.clone()), out, err)
}

fn failure() -> NodeInvocationError {
  NodeInvocationError::new(
    NodeId::from_index(1),
    "transform",
    TransformError::new("ValueError", "bad input"),
  )
}

fn result(failures: Vec<NodeInvocationError>) -> ExecutionResult {
  let status = if failures.is_empty() {
    NodeStatus::Done
  } else {
    NodeStatus::Defunct
  };
  let report = NodeReport {
    id: NodeId::from_index(1),
    name: "transform".to_string(),
    status,
    counters: CounterSnapshot {
      received: 3,
      sent: 3,
      errored: failures.len() as u64,
    },
    failures,
  };
  ExecutionResult::new(vec![report], false, Utc::now(), Utc::now())
}

#[test]
fn test_quiet_console_prints_minimal_lines() {
  let (mut sink, out, err) = console(true);
  let mut kwargs = Kwargs::new();
  kwargs.insert("n".to_string(), json!(3));
  sink.on_bag("load", &Bag::of("Foo (3)")).unwrap();
  sink
    .on_bag("load", &Bag::with_kwargs(vec![json!("Bar")], kwargs))
    .unwrap();
  sink.on_finish(&result(Vec::new())).unwrap();
  assert_eq!(out.text(), "Foo (3)\nBar n=3\n");
  assert_eq!(err.text(), "");
}

#[test]
fn test_verbose_console_prints_node_and_summary() {
  let (mut sink, out, err) = console(false);
  sink.on_bag("load", &Bag::of("Foo")).unwrap();
  sink.on_finish(&result(Vec::new())).unwrap();
  assert_eq!(out.text(), "load: (\"Foo\")\n");
  let summary = err.text();
  assert!(summary.contains("transform in=3 out=3 err=0 [done]"));
  assert!(summary.contains("SUCCESS"));
}

#[test]
fn test_error_bags_go_to_error_writer() {
  let (mut sink, out, err) = console(true);
  sink.on_bag("load", &Bag::failed(failure())).unwrap();
  assert_eq!(out.text(), "");
  assert!(err.text().starts_with("error: node 'transform' (#1) failed with ValueError: bad input"));
}

#[test]
fn test_quiet_never_hides_failure_report() {
  let (mut sink, _, err) = console(true);
  sink.on_finish(&result(vec![failure()])).unwrap();
  let report = err.text();
  assert!(report.contains("node 'transform' (#1) is defunct after 1 failure(s)"));
  assert!(report.contains("ValueError: bad input"));
}

#[test]
fn test_memory_sink_shares_records_between_clones() {
  let sink = MemorySink::new();
  let mut installed = sink.clone();
  installed.on_bag("a", &Bag::of(1)).unwrap();
  installed.on_bag("b", &Bag::failed(failure())).unwrap();
  installed.on_finish(&result(Vec::new())).unwrap();

  let records = sink.records();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0].node, "a");
  assert_eq!(sink.rendered(), vec!["1"]);
  assert!(sink.result().unwrap().is_success());
}

#[tokio::test]
async fn test_dispatcher_preserves_order_across_sinks() {
  let first = MemorySink::new();
  let second = MemorySink::new();
  let (handle, join) = dispatch(vec![Box::new(first.clone()), Box::new(second.clone())]);
  let node: Arc<str> = Arc::from("load");
  for n in 0..20 {
    handle.deliver(&node, Arc::new(Bag::of(n))).unwrap();
  }
  drop(handle);
  let sinks = join.await.unwrap();
  assert_eq!(sinks.len(), 2);

  let expected: Vec<String> = (0..20).map(|n| n.to_string()).collect();
  assert_eq!(first.rendered(), expected);
  assert_eq!(second.rendered(), expected);
}
