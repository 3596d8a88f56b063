//! # Built-in Transforms and Pipelines
//!
//! A small set of transforms and demo pipelines compiled into the binary.
//! Worker processes rebuild nodes from this registry too, so every node a
//! processed run uses must be registered here (or in the registry the
//! embedding program passes to
//! [`serve_if_requested`](crate::worker::serve_if_requested)).
//!
//! ## Transforms
//!
//! | Key                 | Behaviour                                          |
//! |---------------------|----------------------------------------------------|
//! | `strings.extract`   | emits `foo`, `bar`, `baz`                          |
//! | `strings.transform` | title-cases a string and appends its length        |
//! | `strings.load`      | forwards its input unchanged                       |
//! | `env.extract`       | emits `ENV_TEST_USER`, `_NUMBER`, `_STRING` values |
//! | `util.identity`     | forwards its input unchanged, any arity            |
//! | `util.fail`         | rejects every input                                |
//!
//! ## Pipelines
//!
//! - `types.strings`: `strings.extract → strings.transform → strings.load`
//! - `env_vars.get_passed_env`: `env.extract → strings.load`

use crate::bag::{Bag, Value};
use crate::error::{Result, TransformError};
use crate::graph::Graph;
use crate::node::Node;
use crate::registry::Registry;
use crate::transform::{Arity, Emit};

/// Variables read by `env.extract`, in emission order.
pub const ENV_TEST_VARIABLES: [&str; 3] = ["ENV_TEST_USER", "ENV_TEST_NUMBER", "ENV_TEST_STRING"];

/// Registry holding every built-in transform and pipeline.
pub fn registry() -> Registry {
  let mut registry = Registry::new();
  registry
    .register_node("strings.extract", || {
      Ok(Node::new("extract", || Emit::stream(["foo", "bar", "baz"])))
    })
    .register_node("strings.transform", || Ok(Node::new("transform", title_with_length)))
    .register_node("strings.load", || Ok(Node::new("load", |_: Value| Emit::NotModified)))
    .register_node("env.extract", || {
      Ok(Node::new("extract", || {
        Emit::stream(ENV_TEST_VARIABLES.into_iter().map(|key| std::env::var(key).ok()))
      }))
    })
    .register_node("util.identity", || {
      Node::variadic("identity", Arity::any(), |_: &Bag| Emit::NotModified)
    })
    .register_node("util.fail", || {
      Node::variadic("fail", Arity::any(), |bag: &Bag| {
        Err::<Emit, _>(TransformError::new(
          "Rejected",
          format!("rejected {}", bag),
        ))
      })
    });
  registry
    .register_pipeline("types.strings", |registry| {
      chain(
        registry,
        "types.strings",
        &["strings.extract", "strings.transform", "strings.load"],
      )
    })
    .register_pipeline("env_vars.get_passed_env", |registry| {
      chain(
        registry,
        "env_vars.get_passed_env",
        &["env.extract", "strings.load"],
      )
    });
  registry
}

fn chain(registry: &Registry, name: &str, keys: &[&str]) -> Result<Graph> {
  let nodes = keys
    .iter()
    .map(|key| registry.node(key))
    .collect::<Result<Vec<_>>>()?;
  let mut graph = Graph::new(name);
  graph.add_chain(nodes)?;
  Ok(graph)
}

pub(crate) fn title_with_length(value: Value) -> std::result::Result<String, TransformError> {
  let text = value.as_str().ok_or_else(|| {
    TransformError::new("TypeError", format!("expected a string, got {}", value))
  })?;
  let mut chars = text.chars();
  let title = match chars.next() {
    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
    None => String::new(),
  };
  Ok(format!("{} ({})", title, text.chars().count()))
}
