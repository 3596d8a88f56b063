use crate::bag::Bag;
use crate::builtin::{registry, title_with_length};
use crate::graph::NodeId;
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_title_with_length() {
  assert_eq!(title_with_length(json!("foo")).unwrap(), "Foo (3)");
  assert_eq!(title_with_length(json!("bAZ")).unwrap(), "Baz (3)");
  assert_eq!(title_with_length(json!("")).unwrap(), " (0)");
  assert_eq!(title_with_length(json!(3)).unwrap_err().kind, "TypeError");
}

#[test]
fn test_registry_contents() {
  let registry = registry();
  let keys: Vec<_> = registry.node_keys().collect();
  assert_eq!(
    keys,
    vec![
      "env.extract",
      "strings.extract",
      "strings.load",
      "strings.transform",
      "util.fail",
      "util.identity",
    ]
  );
  let pipelines: Vec<_> = registry.pipeline_names().collect();
  assert_eq!(pipelines, vec!["env_vars.get_passed_env", "types.strings"]);
}

#[test]
fn test_extract_streams_three_strings() {
  let node = registry().node("strings.extract").unwrap();
  let input = Arc::new(Bag::empty());
  let outputs: Vec<String> = node
    .invoke(NodeId::from_index(0), &input)
    .map(|out| out.unwrap().render_minimal())
    .collect();
  assert_eq!(outputs, vec!["foo", "bar", "baz"]);
}

#[test]
fn test_load_forwards_input() {
  let node = registry().node("strings.load").unwrap();
  let input = Arc::new(Bag::of("Foo (3)"));
  let outputs: Vec<_> = node
    .invoke(NodeId::from_index(0), &input)
    .map(Result::unwrap)
    .collect();
  assert_eq!(outputs.len(), 1);
  assert!(Arc::ptr_eq(&outputs[0], &input));
}

#[test]
fn test_fail_rejects_everything() {
  let node = registry().node("util.fail").unwrap();
  let input = Arc::new(Bag::new(vec![json!(1), json!(2)]));
  let outputs: Vec<_> = node.invoke(NodeId::from_index(4), &input).collect();
  assert_eq!(outputs.len(), 1);
  let err = outputs[0].as_ref().unwrap_err();
  assert_eq!(err.kind, "Rejected");
  assert_eq!(err.node_id, NodeId::from_index(4));
  assert_eq!(err.node_name, "fail");
}

#[test]
fn test_pipelines_build() {
  let registry = registry();
  let graph = registry.pipeline("types.strings").unwrap();
  assert_eq!(graph.len(), 3);
  assert_eq!(graph.entry_nodes(), vec![NodeId::from_index(0)]);
  let graph = registry.pipeline("env_vars.get_passed_env").unwrap();
  assert_eq!(graph.len(), 2);
  for id in graph.node_ids() {
    assert!(graph.node(id).unwrap().registry_key().is_some());
  }
}
