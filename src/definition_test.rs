use crate::builtin;
use crate::definition::{locate, NodeDefinition, PipelineDefinition};
use crate::error::EngineError;
use crate::strategy::StrategyKind;
use std::fs;

const STRINGS: &str = r#"
name = "strings"

[run]
strategy = "threaded"
quiet = true

[[chain]]
nodes = ["strings.extract", "strings.transform", { key = "strings.load", name = "sink" }]
"#;

#[test]
fn test_parse_definition() {
  let definition = PipelineDefinition::from_toml_str(STRINGS).unwrap();
  assert_eq!(definition.graph_name(), "strings");
  assert_eq!(definition.run.strategy, StrategyKind::Threaded);
  assert!(definition.run.quiet);
  assert_eq!(definition.chains.len(), 1);
  assert_eq!(
    definition.chains[0].nodes[2],
    NodeDefinition::Named {
      key: "strings.load".to_string(),
      name: "sink".to_string(),
    }
  );
  assert_eq!(definition.chains[0].nodes[0].label(), "strings.extract");
  assert_eq!(definition.chains[0].nodes[2].label(), "sink");
  assert_eq!(definition.chains[0].nodes[2].key(), "strings.load");
}

#[test]
fn test_build_linear_graph() {
  let definition = PipelineDefinition::from_toml_str(STRINGS).unwrap();
  let graph = definition.build(&builtin::registry()).unwrap();
  assert_eq!(graph.name(), "strings");
  assert_eq!(graph.len(), 3);
  let sink = graph.find("sink").unwrap();
  assert_eq!(graph.exit_nodes(), vec![sink]);
  assert_eq!(graph.node(sink).unwrap().registry_key(), Some("strings.load"));
}

#[test]
fn test_build_connects_chains_by_label() {
  let definition = PipelineDefinition::from_toml_str(
    r#"
    [[chain]]
    nodes = ["strings.extract", { key = "strings.load", name = "left" }]

    [[chain]]
    input = "strings.extract"
    nodes = [{ key = "util.identity", name = "right" }]

    [[chain]]
    input = "right"
    output = "left"
    "#,
  )
  .unwrap();
  let graph = definition.build(&builtin::registry()).unwrap();
  assert_eq!(graph.name(), "pipeline");
  let extract = graph.find("extract").unwrap();
  let left = graph.find("left").unwrap();
  let right = graph.find("right").unwrap();
  assert_eq!(graph.successors(extract).len(), 2);
  assert_eq!(graph.predecessors(left), &[extract, right]);
}

#[test]
fn test_build_rejects_bad_references() {
  let registry = builtin::registry();
  let unknown = PipelineDefinition::from_toml_str(
    r#"
    [[chain]]
    input = "missing"
    nodes = ["strings.load"]
    "#,
  )
  .unwrap();
  assert!(matches!(unknown.build(&registry), Err(EngineError::Definition(_))));

  let ambiguous = PipelineDefinition::from_toml_str(
    r#"
    [[chain]]
    nodes = ["strings.extract"]

    [[chain]]
    nodes = ["strings.extract"]

    [[chain]]
    input = "strings.extract"
    nodes = ["strings.load"]
    "#,
  )
  .unwrap();
  let err = ambiguous.build(&registry).unwrap_err();
  assert!(err.to_string().contains("several nodes"));

  let unregistered = PipelineDefinition::from_toml_str("[[chain]]\nnodes = [\"nope\"]").unwrap();
  assert!(matches!(
    unregistered.build(&registry),
    Err(EngineError::UnknownTransform(_))
  ));

  let empty = PipelineDefinition::from_toml_str("[[chain]]\ninput = \"x\"").unwrap();
  assert!(matches!(empty.build(&registry), Err(EngineError::Definition(_))));
}

#[test]
fn test_build_rejects_cycles() {
  let definition = PipelineDefinition::from_toml_str(
    r#"
    [[chain]]
    nodes = [{ key = "util.identity", name = "a" }, { key = "util.identity", name = "b" }]

    [[chain]]
    input = "b"
    output = "a"
    "#,
  )
  .unwrap();
  assert!(matches!(
    definition.build(&builtin::registry()),
    Err(EngineError::GraphCycle { .. })
  ));
}

#[test]
fn test_parse_errors() {
  assert!(matches!(
    PipelineDefinition::from_toml_str("chains = []"),
    Err(EngineError::Definition(_))
  ));
  assert!(matches!(
    PipelineDefinition::from_toml_str("[run]\nqueue_capacity = 0"),
    Err(EngineError::Config(_))
  ));
}

#[test]
fn test_locate_and_load() {
  let dir = tempfile::tempdir().unwrap();
  assert!(matches!(locate(dir.path()), Err(EngineError::Definition(_))));

  fs::write(dir.path().join("_pipeline.toml"), STRINGS).unwrap();
  assert_eq!(locate(dir.path()).unwrap(), dir.path().join("_pipeline.toml"));

  fs::write(dir.path().join("pipeline.toml"), "name = \"preferred\"").unwrap();
  assert_eq!(locate(dir.path()).unwrap(), dir.path().join("pipeline.toml"));

  let loaded = PipelineDefinition::load(dir.path().join("_pipeline.toml")).unwrap();
  assert_eq!(loaded.graph_name(), "strings");
  assert_eq!(PipelineDefinition::load(dir.path()).unwrap().graph_name(), "preferred");

  assert!(locate(&dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_load_reports_file_name() {
  let dir = tempfile::tempdir().unwrap();
  let file = dir.path().join("broken.toml");
  fs::write(&file, "[[chain]\n").unwrap();
  let err = PipelineDefinition::load(&file).unwrap_err();
  assert!(err.to_string().contains("broken.toml"));
}
