//! # Bag
//!
//! The data envelope that flows along graph edges.
//!
//! A [`Bag`] carries an ordered sequence of positional values, a map of
//! keyword values, an optional error marker and an optional reference to the
//! Bag it was derived from. Bags are immutable once built: nodes never mutate
//! their input, they derive new Bags from it. Inside the engine Bags travel as
//! `Arc<Bag>`, so fan-out to several consumers only clones the pointer.
//!
//! Values are [`serde_json::Value`]s so that a Bag can be serialized whenever
//! it has to cross a process boundary.
//!
//! ## Lineage
//!
//! The parent reference exists for tracing and debugging. It is never
//! serialized and never consulted for control flow.
//!
//! ## Example
//!
//! ```rust
//! use bagpipe::bag::Bag;
//! use serde_json::json;
//!
//! let bag = Bag::new(vec![json!("Foo"), json!(1)]);
//! assert_eq!(bag.len(), 2);
//! assert_eq!(bag.render_minimal(), "Foo 1");
//! ```

use crate::error::NodeInvocationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single payload value.
pub type Value = serde_json::Value;

/// Keyword values of a Bag. Keys are unique and iterate in sorted order.
pub type Kwargs = BTreeMap<String, Value>;

/// Immutable unit of work passed between nodes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bag {
  #[serde(default)]
  args: Vec<Value>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  kwargs: Kwargs,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  error: Option<NodeInvocationError>,
  #[serde(skip)]
  parent: Option<Arc<Bag>>,
}

impl Bag {
  /// Creates a Bag holding positional values only.
  pub fn new(args: Vec<Value>) -> Self {
    Self {
      args,
      ..Self::default()
    }
  }

  /// Creates the empty Bag used as default initial input.
  pub fn empty() -> Self {
    Self::default()
  }

  /// Creates a Bag holding a single positional value.
  pub fn of(value: impl Into<Value>) -> Self {
    Self::new(vec![value.into()])
  }

  /// Creates a Bag holding positional and keyword values.
  pub fn with_kwargs(args: Vec<Value>, kwargs: Kwargs) -> Self {
    Self {
      args,
      kwargs,
      ..Self::default()
    }
  }

  /// Creates an error Bag carrying a failed invocation.
  pub fn failed(error: NodeInvocationError) -> Self {
    Self {
      error: Some(error),
      ..Self::default()
    }
  }

  /// Returns this Bag with `parent` recorded as its origin.
  pub(crate) fn derived_from(mut self, parent: &Arc<Bag>) -> Self {
    self.parent = Some(Arc::clone(parent));
    self
  }

  /// Positional values.
  pub fn args(&self) -> &[Value] {
    &self.args
  }

  /// Keyword values.
  pub fn kwargs(&self) -> &Kwargs {
    &self.kwargs
  }

  /// Positional value at `index`.
  pub fn arg(&self, index: usize) -> Option<&Value> {
    self.args.get(index)
  }

  /// Keyword value for `key`.
  pub fn kwarg(&self, key: &str) -> Option<&Value> {
    self.kwargs.get(key)
  }

  /// Number of positional values.
  pub fn len(&self) -> usize {
    self.args.len()
  }

  /// Whether the Bag has neither positional nor keyword values.
  pub fn is_empty(&self) -> bool {
    self.args.is_empty() && self.kwargs.is_empty()
  }

  /// Whether this Bag carries a failure instead of data.
  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }

  /// The failure carried by an error Bag.
  pub fn error(&self) -> Option<&NodeInvocationError> {
    self.error.as_ref()
  }

  /// The Bag this one was derived from, if any.
  pub fn parent(&self) -> Option<&Arc<Bag>> {
    self.parent.as_ref()
  }

  /// Iterates over ancestors, nearest first.
  pub fn lineage(&self) -> Lineage<'_> {
    Lineage {
      next: self.parent.as_deref(),
    }
  }

  /// Minimal textual form: positional values separated by spaces (strings
  /// unquoted), followed by `key=value` pairs.
  pub fn render_minimal(&self) -> String {
    let positional = self.args.iter().map(render_value);
    let keywords = self
      .kwargs
      .iter()
      .map(|(key, value)| format!("{}={}", key, render_value(value)));
    positional.chain(keywords).collect::<Vec<_>>().join(" ")
  }
}

/// Content equality: payload and error marker. Lineage is ignored.
impl PartialEq for Bag {
  fn eq(&self, other: &Self) -> bool {
    self.args == other.args && self.kwargs == other.kwargs && self.error == other.error
  }
}

impl fmt::Display for Bag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(error) = &self.error {
      return write!(f, "<error {}: {}>", error.kind, error.message);
    }
    write!(f, "(")?;
    let mut first = true;
    for value in &self.args {
      if !first {
        write!(f, ", ")?;
      }
      first = false;
      write!(f, "{}", value)?;
    }
    for (key, value) in &self.kwargs {
      if !first {
        write!(f, ", ")?;
      }
      first = false;
      write!(f, "{}={}", key, value)?;
    }
    write!(f, ")")
  }
}

/// Iterator over the ancestors of a Bag.
pub struct Lineage<'a> {
  next: Option<&'a Bag>,
}

impl<'a> Iterator for Lineage<'a> {
  type Item = &'a Bag;

  fn next(&mut self) -> Option<Self::Item> {
    let current = self.next?;
    self.next = current.parent.as_deref();
    Some(current)
  }
}

fn render_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
