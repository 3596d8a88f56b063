use crate::bag::{Bag, Kwargs, Value};
use crate::error::{EngineError, TransformError};
use crate::graph::NodeId;
use crate::node::Node;
use crate::transform::{Arity, Emit, Transform};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const ID: NodeId = NodeId::from_index(3);

fn run(node: &Node, input: Bag) -> Vec<Result<Arc<Bag>, crate::error::NodeInvocationError>> {
  let input = Arc::new(input);
  node.invoke(ID, &input).collect()
}

fn rendered(node: &Node, input: Bag) -> Vec<String> {
  run(node, input)
    .into_iter()
    .map(|out| out.unwrap().render_minimal())
    .collect()
}

#[test]
fn test_arity_is_inferred_from_signature() {
  assert_eq!(Node::new("zero", || ()).arity(), Arity::exact(0));
  assert_eq!(Node::new("one", |_: Value| ()).arity(), Arity::exact(1));
  assert_eq!(Node::new("two", |_: Value, _: Value| ()).arity(), Arity::exact(2));
  assert_eq!(
    Node::new("three", |_: Value, _: Value, _: Value| ()).arity(),
    Arity::exact(3)
  );
}

#[test]
fn test_invalid_declared_arity_is_rejected() {
  struct Broken;
  impl Transform for Broken {
    fn arity(&self) -> Arity {
      Arity::between(3, 1)
    }
    fn call(&self, _bag: &Bag) -> Result<Emit, TransformError> {
      Ok(Emit::Nothing)
    }
  }
  let err = Node::from_transform("broken", Broken).unwrap_err();
  assert!(matches!(err, EngineError::InvalidArity { node, .. } if node == "broken"));
}

#[test]
fn test_single_value_output() {
  let node = Node::new("double", |n: Value| n.as_i64().unwrap_or(0) * 2);
  assert_eq!(rendered(&node, Bag::of(21)), vec!["42"]);
}

#[test]
fn test_group_output_is_one_bag() {
  let node = Node::new("split", |s: Value| {
    let s = s.as_str().unwrap_or_default().to_string();
    (s.to_uppercase(), s.len() as u64)
  });
  let outputs = run(&node, Bag::of("abc"));
  assert_eq!(outputs.len(), 1);
  let bag = outputs[0].as_ref().unwrap();
  assert_eq!(bag.args(), &[json!("ABC"), json!(3)]);
}

#[test]
fn test_nothing_produces_no_output() {
  let node = Node::new("drop", |_: Value| ());
  assert!(run(&node, Bag::of(1)).is_empty());
  let node = Node::new("maybe", |n: Value| (n.as_i64() == Some(1)).then_some("one"));
  assert_eq!(rendered(&node, Bag::of(1)), vec!["one"]);
  assert!(run(&node, Bag::of(2)).is_empty());
}

#[test]
fn test_not_modified_forwards_the_same_bag() {
  let node = Node::new("peek", |_: Value| Emit::NotModified);
  let input = Arc::new(Bag::of("same"));
  let outputs: Vec<_> = node.invoke(ID, &input).map(Result::unwrap).collect();
  assert_eq!(outputs.len(), 1);
  assert!(Arc::ptr_eq(&outputs[0], &input));
}

#[test]
fn test_outputs_record_their_parent() {
  let node = Node::new("upper", |s: Value| s.as_str().unwrap_or_default().to_uppercase());
  let input = Arc::new(Bag::of("foo"));
  let output = node.invoke(ID, &input).next().unwrap().unwrap();
  assert!(Arc::ptr_eq(output.parent().unwrap(), &input));
}

#[test]
fn test_stream_outputs_in_order() {
  let node = Node::new("extract", || Emit::stream(["foo", "bar", "baz"]));
  assert_eq!(rendered(&node, Bag::empty()), vec!["foo", "bar", "baz"]);
}

#[test]
fn test_nested_streams_are_flattened() {
  let node = Node::new("nested", || {
    Emit::stream(vec![
      Emit::Value(json!(1)),
      Emit::stream([2, 3]),
      Emit::Nothing,
      Emit::Value(json!(4)),
    ])
  });
  assert_eq!(rendered(&node, Bag::empty()), vec!["1", "2", "3", "4"]);
}

#[test]
fn test_stream_is_pulled_lazily() {
  let pulled = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&pulled);
  let node = Node::new("count", move || {
    let counter = Arc::clone(&counter);
    Emit::stream((0..10).map(move |n| {
      counter.fetch_add(1, Ordering::SeqCst);
      n
    }))
  });
  let input = Arc::new(Bag::empty());
  let mut invocation = node.invoke(ID, &input);
  invocation.next().unwrap().unwrap();
  assert_eq!(pulled.load(Ordering::SeqCst), 1);
  invocation.next().unwrap().unwrap();
  assert_eq!(pulled.load(Ordering::SeqCst), 2);
}

#[test]
fn test_error_ends_invocation_after_partial_output() {
  let node = Node::new("partial", || {
    Emit::stream(vec![
      Ok(json!("first")),
      Err(TransformError::new("ValueError", "second is broken")),
      Ok(json!("never")),
    ])
  });
  let outputs = run(&node, Bag::empty());
  assert_eq!(outputs.len(), 2);
  assert_eq!(outputs[0].as_ref().unwrap().render_minimal(), "first");
  let err = outputs[1].as_ref().unwrap_err();
  assert_eq!(err.node_id, ID);
  assert_eq!(err.node_name, "partial");
  assert_eq!(err.kind, "ValueError");
  assert_eq!(err.message, "second is broken");
}

#[test]
fn test_arity_mismatch_is_a_per_bag_error() {
  let node = Node::new("pair", |a: Value, b: Value| json!([a, b]));
  let outputs = run(&node, Bag::of(1));
  assert_eq!(outputs.len(), 1);
  assert_eq!(outputs[0].as_ref().unwrap_err().kind, "ArityMismatch");
}

#[test]
fn test_panic_is_caught() {
  let node = Node::new("boom", |_: Value| -> Value { panic!("kaboom") });
  let outputs = run(&node, Bag::of(1));
  let err = outputs[0].as_ref().unwrap_err();
  assert_eq!(err.kind, "Panic");
  assert_eq!(err.message, "kaboom");
}

#[test]
fn test_panic_inside_stream_ends_the_invocation() {
  let node = Node::new("boom", |_: Value| {
    Emit::stream((0..3_i32).map(|n| {
      if n == 1 {
        panic!("stream broke at {}", n);
      }
      n
    }))
  });
  let outputs = run(&node, Bag::of(1));
  assert_eq!(outputs.len(), 2);
  assert_eq!(outputs[0].as_ref().unwrap().render_minimal(), "0");
  let err = outputs[1].as_ref().unwrap_err();
  assert_eq!(err.kind, "Panic");
  assert_eq!(err.message, "stream broke at 1");
}

#[test]
fn test_parse_errors_convert() {
  let node = Node::new("parse", |s: Value| s.as_str().unwrap_or_default().parse::<i64>());
  assert_eq!(rendered(&node, Bag::of("12")), vec!["12"]);
  let outputs = run(&node, Bag::of("twelve"));
  assert_eq!(outputs[0].as_ref().unwrap_err().kind, "ParseIntError");
}

#[test]
fn test_variadic_node_sees_keywords() {
  let node = Node::variadic("greet", Arity::any(), |bag: &Bag| {
    let name = bag.kwarg("name").and_then(Value::as_str).unwrap_or("nobody");
    format!("hello {} ({} args)", name, bag.len())
  })
  .unwrap();
  let mut kwargs = Kwargs::new();
  kwargs.insert("name".to_string(), json!("ada"));
  let bag = Bag::with_kwargs(vec![json!(1), json!(2)], kwargs);
  assert_eq!(rendered(&node, bag), vec!["hello ada (2 args)"]);
}

#[test]
fn test_bag_output_keeps_keywords() {
  let node = Node::variadic("tag", Arity::exact(1), |bag: &Bag| {
    let mut kwargs = Kwargs::new();
    kwargs.insert("seen".to_string(), json!(true));
    Bag::with_kwargs(bag.args().to_vec(), kwargs)
  })
  .unwrap();
  assert_eq!(rendered(&node, Bag::of("x")), vec!["x seen=true"]);
}

#[test]
fn test_with_name_keeps_transform() {
  let node = Node::new("a", |v: Value| v).with_name("b");
  assert_eq!(node.name(), "b");
  assert_eq!(rendered(&node, Bag::of(5)), vec!["5"]);
}
