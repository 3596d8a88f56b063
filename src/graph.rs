//! # Graph
//!
//! The acyclic wiring of nodes that defines a pipeline.
//!
//! A [`Graph`] owns its nodes exclusively and records directed edges
//! between them. Pipelines are usually built by chaining nodes:
//!
//! ```rust
//! use bagpipe::bag::Value;
//! use bagpipe::graph::Graph;
//! use bagpipe::node::Node;
//! use bagpipe::transform::Emit;
//!
//! let mut graph = Graph::new("strings");
//! let chain = graph.add_chain(vec![
//!   Node::new("extract", || Emit::stream(["foo", "bar", "baz"])),
//!   Node::new("load", |s: Value| s),
//! ])?;
//! assert_eq!(graph.entry_nodes(), chain.head().into_iter().collect::<Vec<_>>());
//! assert_eq!(graph.exit_nodes(), chain.tail().into_iter().collect::<Vec<_>>());
//! # Ok::<(), bagpipe::error::EngineError>(())
//! ```
//!
//! ## Structure and Validation
//!
//! Edges are checked as they are added: both ends must exist and the edge
//! must not close a cycle. Before the first execution the graph is validated
//! as a whole (dangling edges, cycles) with Kahn's algorithm; the result and
//! the topological order are cached until the graph is mutated again.
//!
//! ## Ordering
//!
//! Ties in the topological order are broken by insertion order, so the same
//! graph always yields the same order.

use crate::error::{EngineError, Result};
use crate::node::Node;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Identifier of a node inside one graph: its insertion index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
  /// Builds an identifier from an insertion index.
  pub const fn from_index(index: usize) -> Self {
    Self(index)
  }

  /// Insertion index of the node.
  pub const fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A linear run of nodes added by one of the `add_chain*` methods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chain {
  ids: Vec<NodeId>,
}

impl Chain {
  /// First node of the chain, `None` when the chain added no node.
  pub fn head(&self) -> Option<NodeId> {
    self.ids.first().copied()
  }

  /// Last node of the chain, the point to attach further chains to.
  /// `None` when the chain added no node.
  pub fn tail(&self) -> Option<NodeId> {
    self.ids.last().copied()
  }

  /// All node identifiers in chain order.
  pub fn ids(&self) -> &[NodeId] {
    &self.ids
  }

  /// Whether the chain added no node.
  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }
}

/// Why a graph failed validation; cached alongside the order.
#[derive(Clone, Debug)]
enum Invalid {
  Cycle(Vec<String>),
  Dangling(NodeId),
}

impl From<Invalid> for EngineError {
  fn from(invalid: Invalid) -> Self {
    match invalid {
      Invalid::Cycle(path) => EngineError::GraphCycle { path },
      Invalid::Dangling(id) => EngineError::UnknownNode(id),
    }
  }
}

/// A directed acyclic graph of nodes.
#[derive(Debug)]
pub struct Graph {
  name: String,
  nodes: Vec<Arc<Node>>,
  edges: Vec<(NodeId, NodeId)>,
  successors: Vec<Vec<NodeId>>,
  predecessors: Vec<Vec<NodeId>>,
  order: OnceLock<std::result::Result<Vec<NodeId>, Invalid>>,
}

impl Graph {
  /// Creates an empty graph.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      nodes: Vec::new(),
      edges: Vec::new(),
      successors: Vec::new(),
      predecessors: Vec::new(),
      order: OnceLock::new(),
    }
  }

  /// Name of the graph.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Number of nodes.
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  /// Whether the graph has no node.
  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Node for `id`.
  pub fn node(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(id.0).map(Arc::as_ref)
  }

  /// Shared handles to all nodes, indexed by [`NodeId::index`].
  pub(crate) fn shared_nodes(&self) -> &[Arc<Node>] {
    &self.nodes
  }

  /// Identifiers of all nodes, in insertion order.
  pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
    (0..self.nodes.len()).map(NodeId)
  }

  /// Looks a node up by name. Returns the first match in insertion order.
  pub fn find(&self, name: &str) -> Option<NodeId> {
    self.nodes.iter().position(|node| node.name() == name).map(NodeId)
  }

  /// All edges, in insertion order.
  pub fn edges(&self) -> &[(NodeId, NodeId)] {
    &self.edges
  }

  /// Direct consumers of `id`.
  pub fn successors(&self, id: NodeId) -> &[NodeId] {
    self.successors.get(id.0).map_or(&[], Vec::as_slice)
  }

  /// Direct producers feeding `id`.
  pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
    self.predecessors.get(id.0).map_or(&[], Vec::as_slice)
  }

  /// Nodes without incoming edges.
  pub fn entry_nodes(&self) -> Vec<NodeId> {
    self.node_ids().filter(|id| self.predecessors(*id).is_empty()).collect()
  }

  /// Nodes without outgoing edges.
  pub fn exit_nodes(&self) -> Vec<NodeId> {
    self.node_ids().filter(|id| self.successors(*id).is_empty()).collect()
  }

  /// Adds a node and returns its identifier.
  pub fn add_node(&mut self, node: Node) -> NodeId {
    let id = NodeId(self.nodes.len());
    self.nodes.push(Arc::new(node));
    self.successors.push(Vec::new());
    self.predecessors.push(Vec::new());
    self.order = OnceLock::new();
    id
  }

  /// Adds an edge from producer `from` to consumer `to`.
  ///
  /// Adding an edge that already exists is a no-op.
  ///
  /// # Errors
  ///
  /// - [`EngineError::UnknownNode`] if either end is not in the graph
  /// - [`EngineError::GraphCycle`] if the edge would close a cycle
  pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<()> {
    for id in [from, to] {
      if id.0 >= self.nodes.len() {
        return Err(EngineError::UnknownNode(id));
      }
    }
    if self.successors[from.0].contains(&to) {
      return Ok(());
    }
    if let Some(path) = self.path(to, from) {
      let mut names = vec![self.nodes[from.0].name().to_string()];
      names.extend(path.iter().map(|id| self.nodes[id.0].name().to_string()));
      return Err(EngineError::GraphCycle { path: names });
    }
    self.edges.push((from, to));
    self.successors[from.0].push(to);
    self.predecessors[to.0].push(from);
    self.order = OnceLock::new();
    Ok(())
  }

  /// Appends a linear chain with no input: its head becomes an entry node.
  ///
  /// # Errors
  ///
  /// Same as [`Graph::add_chain_between`].
  pub fn add_chain(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<Chain> {
    self.add_chain_between(None, None, nodes)
  }

  /// Appends a linear chain consuming the output of `input` (fan-out when
  /// `input` already has consumers).
  ///
  /// # Errors
  ///
  /// Same as [`Graph::add_chain_between`].
  pub fn add_chain_from(
    &mut self,
    input: NodeId,
    nodes: impl IntoIterator<Item = Node>,
  ) -> Result<Chain> {
    self.add_chain_between(Some(input), None, nodes)
  }

  /// Appends a linear chain between optional `input` and `output` nodes.
  ///
  /// The chain's head consumes `input`, and its tail feeds `output` (fan-in
  /// when `output` already has producers). With no node in between, `input`
  /// is connected directly to `output`.
  ///
  /// The graph is left untouched when an error is returned.
  ///
  /// # Errors
  ///
  /// - [`EngineError::UnknownNode`] if `input` or `output` is not in the graph
  /// - [`EngineError::GraphCycle`] if connecting `output` closes a cycle
  pub fn add_chain_between(
    &mut self,
    input: Option<NodeId>,
    output: Option<NodeId>,
    nodes: impl IntoIterator<Item = Node>,
  ) -> Result<Chain> {
    for id in input.iter().chain(output.iter()) {
      if id.0 >= self.nodes.len() {
        return Err(EngineError::UnknownNode(*id));
      }
    }
    let nodes: Vec<Node> = nodes.into_iter().collect();
    // Fresh nodes cannot close a cycle; only an existing output ..= input path can.
    if let (Some(input), Some(output)) = (input, output) {
      if let Some(path) = self.path(output, input) {
        let mut names = vec![self.nodes[input.0].name().to_string()];
        names.extend(nodes.iter().map(|node| node.name().to_string()));
        names.extend(path.iter().map(|id| self.nodes[id.0].name().to_string()));
        return Err(EngineError::GraphCycle { path: names });
      }
    }
    let mut ids = Vec::with_capacity(nodes.len());
    let mut previous = input;
    for node in nodes {
      let id = self.add_node(node);
      if let Some(previous) = previous {
        self.add_edge(previous, id)?;
      }
      ids.push(id);
      previous = Some(id);
    }
    if let (Some(previous), Some(output)) = (previous, output) {
      self.add_edge(previous, output)?;
    }
    Ok(Chain { ids })
  }

  /// Validates the graph and caches its topological order.
  ///
  /// # Errors
  ///
  /// - [`EngineError::UnknownNode`] for an edge referencing a missing node
  /// - [`EngineError::GraphCycle`] if the graph contains a cycle
  pub fn validate(&self) -> Result<()> {
    self.cached_order().map(|_| ())
  }

  /// Nodes in topological order: every node comes after all its producers.
  ///
  /// The returned iterator is lazy and finite; call this again (or clone the
  /// iterator) to restart the traversal.
  ///
  /// # Errors
  ///
  /// Same as [`Graph::validate`].
  pub fn topological_order(&self) -> Result<Topology<'_>> {
    let order = self.cached_order()?;
    Ok(Topology {
      graph: self,
      order,
      position: 0,
    })
  }

  /// Identifiers in topological order.
  pub(crate) fn ordered_ids(&self) -> Result<Vec<NodeId>> {
    self.cached_order().map(<[NodeId]>::to_vec)
  }

  fn cached_order(&self) -> Result<&[NodeId]> {
    self
      .order
      .get_or_init(|| self.sort())
      .as_deref()
      .map_err(|invalid| invalid.clone().into())
  }

  /// Kahn's algorithm with a min-heap so ties resolve by insertion order.
  fn sort(&self) -> std::result::Result<Vec<NodeId>, Invalid> {
    for &(from, to) in &self.edges {
      for id in [from, to] {
        if id.0 >= self.nodes.len() {
          return Err(Invalid::Dangling(id));
        }
      }
    }

    let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<NodeId>> = self
      .node_ids()
      .filter(|id| in_degree[id.0] == 0)
      .map(Reverse)
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());
    while let Some(Reverse(id)) = ready.pop() {
      order.push(id);
      for next in &self.successors[id.0] {
        in_degree[next.0] -= 1;
        if in_degree[next.0] == 0 {
          ready.push(Reverse(*next));
        }
      }
    }

    if order.len() != self.nodes.len() {
      let path = self.find_cycle(&in_degree);
      return Err(Invalid::Cycle(path));
    }
    debug!(graph = %self.name, nodes = order.len(), "graph validated");
    Ok(order)
  }

  /// Walks producers backwards among the nodes Kahn could not release
  /// until one repeats; the repeated stretch is a cycle.
  fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
    let stuck = |id: &NodeId| in_degree[id.0] > 0;
    let Some(start) = self.node_ids().find(|id| stuck(id)) else {
      return Vec::new();
    };
    let mut walk = vec![start];
    let mut current = start;
    loop {
      let Some(previous) = self.predecessors[current.0].iter().copied().find(|id| stuck(id)) else {
        return Vec::new();
      };
      if let Some(position) = walk.iter().position(|id| *id == previous) {
        let mut cycle: Vec<NodeId> = walk[position..].to_vec();
        cycle.reverse();
        cycle.push(cycle[0]);
        return cycle
          .iter()
          .map(|id| self.nodes[id.0].name().to_string())
          .collect();
      }
      walk.push(previous);
      current = previous;
    }
  }

  /// Depth-first search for a path `from` ..= `to` along edges.
  fn path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
    let mut visited = vec![false; self.nodes.len()];
    let mut stack = vec![vec![from]];
    while let Some(path) = stack.pop() {
      let last = path[path.len() - 1];
      if last == to {
        return Some(path);
      }
      if std::mem::replace(&mut visited[last.0], true) {
        continue;
      }
      for next in self.successors[last.0].iter().rev() {
        let mut extended = path.clone();
        extended.push(*next);
        stack.push(extended);
      }
    }
    None
  }
}

/// Lazy traversal of a graph in topological order.
#[derive(Clone)]
pub struct Topology<'a> {
  graph: &'a Graph,
  order: &'a [NodeId],
  position: usize,
}

impl<'a> Iterator for Topology<'a> {
  type Item = (NodeId, &'a Node);

  fn next(&mut self) -> Option<Self::Item> {
    let id = *self.order.get(self.position)?;
    self.position += 1;
    Some((id, self.graph.nodes[id.0].as_ref()))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.order.len() - self.position;
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for Topology<'_> {}
