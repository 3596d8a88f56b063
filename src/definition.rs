//! # Pipeline Definitions
//!
//! Pipelines described in TOML instead of code.
//!
//! A definition names registered transforms and wires them into chains; an
//! optional `[run]` table carries default [`RunOptions`].
//!
//! ```toml
//! name = "strings"
//!
//! [run]
//! strategy = "threaded"
//!
//! [[chain]]
//! nodes = ["strings.extract", "strings.transform", { key = "strings.load", name = "load" }]
//!
//! [[chain]]
//! input = "strings.extract"
//! output = "load"
//! nodes = ["util.identity"]
//! ```
//!
//! A chain's nodes are built from the registry, each chain getting its own
//! instances. `input` and `output` refer to nodes created by earlier chains,
//! by the `name` given to them or, failing that, by their registry key; a
//! reference matching several nodes is rejected.
//!
//! ## Locating Definitions
//!
//! [`locate`] accepts a file, or a directory holding one of
//! [`DEFAULT_PIPELINE_FILENAMES`].

use crate::config::RunOptions;
use crate::error::{EngineError, Result};
use crate::graph::{Graph, NodeId};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names looked up, in order, when a directory is given.
pub const DEFAULT_PIPELINE_FILENAMES: [&str; 3] = ["pipeline.toml", "_pipeline.toml", "bagpipe.toml"];

/// A node in a chain: a registry key, optionally with a name of its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeDefinition {
  /// Registry key only; the key doubles as reference label.
  Key(String),
  /// Registry key and node name.
  Named {
    /// Registry key.
    key: String,
    /// Node name, also used as reference label.
    name: String,
  },
}

impl NodeDefinition {
  /// Registry key.
  pub fn key(&self) -> &str {
    match self {
      NodeDefinition::Key(key) | NodeDefinition::Named { key, .. } => key,
    }
  }

  /// Label other chains refer to this node by.
  pub fn label(&self) -> &str {
    match self {
      NodeDefinition::Key(key) => key,
      NodeDefinition::Named { name, .. } => name,
    }
  }
}

/// One linear chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainDefinition {
  /// Node whose outputs feed the chain's head.
  pub input: Option<String>,
  /// Node fed by the chain's tail.
  pub output: Option<String>,
  /// Nodes of the chain, in order.
  pub nodes: Vec<NodeDefinition>,
}

/// A whole pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineDefinition {
  /// Graph name; defaults to `"pipeline"`.
  pub name: Option<String>,
  /// Default run options.
  pub run: RunOptions,
  /// Chains, applied in order.
  #[serde(rename = "chain")]
  pub chains: Vec<ChainDefinition>,
}

impl PipelineDefinition {
  /// Parses a definition.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::Definition`] for malformed TOML or unknown
  /// fields, [`EngineError::Config`] for invalid run options.
  pub fn from_toml_str(source: &str) -> Result<Self> {
    let definition: Self =
      toml::from_str(source).map_err(|e| EngineError::Definition(e.to_string()))?;
    definition.run.check()?;
    Ok(definition)
  }

  /// Locates and parses a definition.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::Definition`] if no definition can be found or
  /// read, or parsing fails.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let file = locate(path.as_ref())?;
    debug!(path = %file.display(), "loading pipeline definition");
    let source = fs::read_to_string(&file)
      .map_err(|e| EngineError::Definition(format!("cannot read {}: {}", file.display(), e)))?;
    Self::from_toml_str(&source).map_err(|err| match err {
      EngineError::Definition(reason) => {
        EngineError::Definition(format!("{}: {}", file.display(), reason))
      }
      other => other,
    })
  }

  /// Graph name.
  pub fn graph_name(&self) -> &str {
    self.name.as_deref().unwrap_or("pipeline")
  }

  /// Builds the graph from `registry`.
  ///
  /// # Errors
  ///
  /// - [`EngineError::UnknownTransform`] for an unregistered key
  /// - [`EngineError::Definition`] for an empty chain or an unknown or
  ///   ambiguous reference
  /// - [`EngineError::GraphCycle`] if a chain closes a cycle
  pub fn build(&self, registry: &Registry) -> Result<Graph> {
    let mut graph = Graph::new(self.graph_name());
    let mut labels: HashMap<String, Vec<NodeId>> = HashMap::new();
    for (index, chain) in self.chains.iter().enumerate() {
      if chain.nodes.is_empty() && (chain.input.is_none() || chain.output.is_none()) {
        return Err(EngineError::Definition(format!(
          "chain #{} has no nodes and does not connect two existing nodes",
          index + 1
        )));
      }
      let input = chain
        .input
        .as_deref()
        .map(|label| resolve(&labels, label))
        .transpose()?;
      let output = chain
        .output
        .as_deref()
        .map(|label| resolve(&labels, label))
        .transpose()?;
      let nodes = chain
        .nodes
        .iter()
        .map(|definition| {
          let node = registry.node(definition.key())?;
          Ok(match definition {
            NodeDefinition::Named { name, .. } => node.with_name(name),
            NodeDefinition::Key(_) => node,
          })
        })
        .collect::<Result<Vec<_>>>()?;
      let added = graph.add_chain_between(input, output, nodes)?;
      for (definition, id) in chain.nodes.iter().zip(added.ids()) {
        labels
          .entry(definition.label().to_string())
          .or_default()
          .push(*id);
      }
    }
    Ok(graph)
  }
}

fn resolve(labels: &HashMap<String, Vec<NodeId>>, label: &str) -> Result<NodeId> {
  match labels.get(label).map(Vec::as_slice) {
    Some([id]) => Ok(*id),
    Some([]) | None => Err(EngineError::Definition(format!(
      "'{}' does not refer to a node of an earlier chain",
      label
    ))),
    Some(_) => Err(EngineError::Definition(format!(
      "'{}' refers to several nodes; give them distinct names",
      label
    ))),
  }
}

/// Resolves `path` to a definition file.
///
/// # Errors
///
/// Returns [`EngineError::Definition`] if `path` does not exist, or is a
/// directory holding none of [`DEFAULT_PIPELINE_FILENAMES`].
pub fn locate(path: &Path) -> Result<PathBuf> {
  if path.is_file() {
    return Ok(path.to_path_buf());
  }
  if !path.is_dir() {
    return Err(EngineError::Definition(format!(
      "{} does not exist",
      path.display()
    )));
  }
  DEFAULT_PIPELINE_FILENAMES
    .iter()
    .map(|name| path.join(name))
    .find(|candidate| candidate.is_file())
    .ok_or_else(|| {
      EngineError::Definition(format!(
        "no pipeline definition in {} (looked for {})",
        path.display(),
        DEFAULT_PIPELINE_FILENAMES.join(", ")
      ))
    })
}
