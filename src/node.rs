//! # Node
//!
//! A node wraps one [`Transform`] with a name and a validated arity, and
//! turns each invocation into a stream of output Bags.
//!
//! ## Invocation
//!
//! [`Node::invoke`] returns an [`Invocation`], an iterator over the outputs
//! produced for one input Bag. Outputs are produced lazily: when the
//! transform returns a stream, each item is normalised and handed out before
//! the next one is pulled. This is what lets strategies forward the first
//! result downstream while the transform is still producing the rest.
//!
//! Failures never escape as panics or early returns. A transform error, an
//! arity mismatch or a panic inside the transform ends the invocation with a
//! single [`NodeInvocationError`] after the outputs already produced.
//!
//! ## Example
//!
//! ```rust
//! use bagpipe::bag::{Bag, Value};
//! use bagpipe::graph::NodeId;
//! use bagpipe::node::Node;
//! use std::sync::Arc;
//!
//! let node = Node::new("upper", |s: Value| s.as_str().unwrap_or_default().to_uppercase());
//! let input = Arc::new(Bag::of("foo"));
//! let outputs: Vec<_> = node.invoke(NodeId::from_index(0), &input).collect();
//! assert_eq!(outputs[0].as_ref().unwrap().render_minimal(), "FOO");
//! ```

use crate::bag::Bag;
use crate::error::{EngineError, NodeInvocationError, Result, TransformError};
use crate::graph::NodeId;
use crate::transform::{Arity, BagTransform, Callable, Emit, EmitStream, FnTransform, IntoEmit, Transform};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

/// A named transformation step.
///
/// Nodes are stateless and reusable across runs. A node built through the
/// [`Registry`](crate::registry::Registry) remembers its registry key, which
/// is what lets the processed strategy rebuild it inside a worker process.
#[derive(Clone)]
pub struct Node {
  name: String,
  arity: Arity,
  transform: Arc<dyn Transform>,
  registry_key: Option<String>,
}

impl Node {
  /// Wraps a closure whose arity follows from its signature.
  ///
  /// # Example
  ///
  /// ```rust
  /// use bagpipe::bag::Value;
  /// use bagpipe::node::Node;
  ///
  /// let node = Node::new("double", |n: Value| n.as_i64().unwrap_or(0) * 2);
  /// assert_eq!(node.arity().min(), 1);
  /// ```
  pub fn new<F, M>(name: impl Into<String>, f: F) -> Self
  where
    F: Callable<M>,
    M: 'static,
  {
    let transform = FnTransform::new(f);
    Self {
      name: name.into(),
      arity: transform.arity(),
      transform: Arc::new(transform),
      registry_key: None,
    }
  }

  /// Wraps a closure receiving the whole Bag, with an explicit arity.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::InvalidArity`] if `arity` can never be satisfied.
  pub fn variadic<F, R>(name: impl Into<String>, arity: Arity, f: F) -> Result<Self>
  where
    F: Fn(&Bag) -> R + Send + Sync + 'static,
    R: IntoEmit + 'static,
  {
    Self::from_transform(name, BagTransform::new(arity, f))
  }

  /// Wraps any [`Transform`] implementation.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::InvalidArity`] if the declared arity can never be
  /// satisfied.
  pub fn from_transform(name: impl Into<String>, transform: impl Transform) -> Result<Self> {
    let name = name.into();
    let arity = transform.arity();
    arity
      .check()
      .map_err(|reason| EngineError::InvalidArity {
        node: name.clone(),
        reason,
      })?;
    Ok(Self {
      name,
      arity,
      transform: Arc::new(transform),
      registry_key: None,
    })
  }

  /// Renames the node; the transform and registry key are kept.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Records the key this node was registered under.
  pub(crate) fn with_registry_key(mut self, key: impl Into<String>) -> Self {
    self.registry_key = Some(key.into());
    self
  }

  /// Diagnostic name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Accepted positional values.
  pub fn arity(&self) -> Arity {
    self.arity
  }

  /// Registry key, when the node was built from a registry.
  pub fn registry_key(&self) -> Option<&str> {
    self.registry_key.as_deref()
  }

  /// Invokes the transform for `input`.
  ///
  /// `id` is the node's identifier in the graph being executed; it tags any
  /// failure produced by this invocation. Error Bags must not be passed here:
  /// strategies forward them without invoking transforms.
  ///
  /// A panic inside the transform, or inside a stream it returned, is caught
  /// and reported as a `Panic` failure. The process panic hook still runs
  /// first, so the default hook prints the panic message to stderr; install a
  /// quiet hook with [`std::panic::set_hook`] to suppress it.
  pub fn invoke<'a>(&'a self, id: NodeId, input: &'a Arc<Bag>) -> Invocation<'a> {
    trace!(node = %self.name, args = input.len(), "invoke");
    let first = if self.arity.accepts(input.len()) {
      catch_unwind(AssertUnwindSafe(|| self.transform.call(input)))
        .unwrap_or_else(|panic| Err(TransformError::from_panic(panic)))
    } else {
      Err(TransformError::new(
        "ArityMismatch",
        format!(
          "'{}' expects {}, got {}",
          self.name,
          self.arity,
          input.len()
        ),
      ))
    };
    Invocation {
      id,
      node: self,
      input,
      first: Some(first),
      streams: Vec::new(),
      finished: false,
    }
  }
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("name", &self.name)
      .field("arity", &self.arity)
      .field("registry_key", &self.registry_key)
      .finish()
  }
}

/// Outputs of one node invocation, produced lazily.
///
/// Yields `Ok` for each output Bag and at most one `Err`, after which the
/// iterator is exhausted.
pub struct Invocation<'a> {
  id: NodeId,
  node: &'a Node,
  input: &'a Arc<Bag>,
  first: Option<Result<Emit, TransformError>>,
  streams: Vec<EmitStream>,
  finished: bool,
}

impl Invocation<'_> {
  fn pull(&mut self) -> Option<Result<Emit, TransformError>> {
    if let Some(first) = self.first.take() {
      return Some(first);
    }
    loop {
      let stream = self.streams.last_mut()?;
      match catch_unwind(AssertUnwindSafe(|| stream.next())) {
        Ok(Some(step)) => return Some(step),
        Ok(None) => {
          self.streams.pop();
        }
        Err(panic) => return Some(Err(TransformError::from_panic(panic))),
      }
    }
  }

  fn derive(&self, bag: Bag) -> Arc<Bag> {
    Arc::new(bag.derived_from(self.input))
  }
}

impl Iterator for Invocation<'_> {
  type Item = std::result::Result<Arc<Bag>, NodeInvocationError>;

  fn next(&mut self) -> Option<Self::Item> {
    while !self.finished {
      let Some(step) = self.pull() else {
        self.finished = true;
        break;
      };
      match step {
        Ok(Emit::Nothing) => {}
        Ok(Emit::NotModified) => return Some(Ok(Arc::clone(self.input))),
        Ok(Emit::Value(value)) => return Some(Ok(self.derive(Bag::new(vec![value])))),
        Ok(Emit::Group(values)) => return Some(Ok(self.derive(Bag::new(values)))),
        Ok(Emit::Bag(bag)) => return Some(Ok(self.derive(bag))),
        Ok(Emit::Stream(stream)) => self.streams.push(stream),
        Err(err) => {
          self.finished = true;
          self.streams.clear();
          return Some(Err(NodeInvocationError::new(
            self.id,
            self.node.name.clone(),
            err,
          )));
        }
      }
    }
    None
  }
}
