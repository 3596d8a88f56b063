//! # Registry
//!
//! Named factories for nodes and pipelines.
//!
//! Nodes are registered explicitly under a key such as `"strings.extract"`.
//! A node built from the registry remembers its key; that is what allows the
//! processed strategy to rebuild the same node inside a worker process, and
//! what pipeline definitions refer to.
//!
//! Pipelines are registered as functions assembling a [`Graph`] from the
//! registry, so they can be selected by name from the command line.
//!
//! ```rust
//! use bagpipe::bag::Value;
//! use bagpipe::node::Node;
//! use bagpipe::registry::Registry;
//!
//! let mut registry = Registry::new();
//! registry.register_node("math.double", || {
//!   Ok(Node::new("double", |n: Value| n.as_i64().unwrap_or(0) * 2))
//! });
//! let node = registry.node("math.double").unwrap();
//! assert_eq!(node.registry_key(), Some("math.double"));
//! ```

use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::node::Node;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type NodeFactory = Arc<dyn Fn() -> Result<Node> + Send + Sync>;
type PipelineFactory = Arc<dyn Fn(&Registry) -> Result<Graph> + Send + Sync>;

/// Named node and pipeline factories.
#[derive(Clone, Default)]
pub struct Registry {
  nodes: BTreeMap<String, NodeFactory>,
  pipelines: BTreeMap<String, PipelineFactory>,
}

impl Registry {
  /// Empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a node factory under `key`, replacing any previous one.
  pub fn register_node<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
  where
    F: Fn() -> Result<Node> + Send + Sync + 'static,
  {
    self.nodes.insert(key.into(), Arc::new(factory));
    self
  }

  /// Registers a pipeline under `name`, replacing any previous one.
  pub fn register_pipeline<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
  where
    F: Fn(&Registry) -> Result<Graph> + Send + Sync + 'static,
  {
    self.pipelines.insert(name.into(), Arc::new(factory));
    self
  }

  /// Builds the node registered under `key`.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::UnknownTransform`] if nothing is registered under
  /// `key`, or whatever the factory fails with.
  pub fn node(&self, key: &str) -> Result<Node> {
    let factory = self
      .nodes
      .get(key)
      .ok_or_else(|| EngineError::UnknownTransform(key.to_string()))?;
    Ok(factory()?.with_registry_key(key))
  }

  /// Builds the pipeline registered under `name`.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::UnknownPipeline`] if nothing is registered under
  /// `name`, or whatever the factory fails with.
  pub fn pipeline(&self, name: &str) -> Result<Graph> {
    let factory = self
      .pipelines
      .get(name)
      .ok_or_else(|| EngineError::UnknownPipeline(name.to_string()))?;
    factory(self)
  }

  /// Whether a node is registered under `key`.
  pub fn contains_node(&self, key: &str) -> bool {
    self.nodes.contains_key(key)
  }

  /// Registered node keys, sorted.
  pub fn node_keys(&self) -> impl Iterator<Item = &str> {
    self.nodes.keys().map(String::as_str)
  }

  /// Registered pipeline names, sorted.
  pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
    self.pipelines.keys().map(String::as_str)
  }
}

impl fmt::Debug for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registry")
      .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
      .field("pipelines", &self.pipelines.keys().collect::<Vec<_>>())
      .finish()
  }
}
