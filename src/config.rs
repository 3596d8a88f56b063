//! # Run Configuration
//!
//! [`RunOptions`] gathers everything the engine recognises for one run:
//! strategy, quiet rendering, injected environment, time limit, queue bound
//! and failure policy. It is plain data, deserializable from the `[run]`
//! table of a pipeline definition and overridable from the command line.
//!
//! ```toml
//! [run]
//! strategy = "threaded"
//! quiet = true
//! env = ["ENV_TEST_USER=cwandrews"]
//! timeout_ms = 30000
//! queue_capacity = 64
//!
//! [run.failure]
//! max_consecutive_failures = 5
//! fail_fast = false
//! ```
//!
//! Quiet mode is a per-run value carried by these options, never a
//! process-wide flag, so concurrent runs cannot affect each other.

use crate::env::EnvAssignment;
use crate::error::{EngineError, Result};
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What makes a node defunct, and what a defunct node does to the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailurePolicy {
  /// Consecutive failed invocations after which a node turns defunct.
  pub max_consecutive_failures: u32,
  /// Cancel the whole run as soon as one node turns defunct.
  pub fail_fast: bool,
}

impl Default for FailurePolicy {
  fn default() -> Self {
    Self {
      max_consecutive_failures: 3,
      fail_fast: false,
    }
  }
}

/// Options for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunOptions {
  /// Scheduling strategy.
  pub strategy: StrategyKind,
  /// Minimal rendering in the console sink.
  pub quiet: bool,
  /// Variables injected into the environment for the duration of the run.
  pub env: Vec<EnvAssignment>,
  /// Upper bound on the run's duration, in milliseconds.
  pub timeout_ms: Option<u64>,
  /// Capacity of every queue; unbounded when absent.
  pub queue_capacity: Option<usize>,
  /// Failure handling.
  pub failure: FailurePolicy,
}

impl RunOptions {
  /// Parses options from a TOML document holding the fields at top level.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::Config`] for malformed TOML or unknown fields.
  pub fn from_toml_str(source: &str) -> Result<Self> {
    let options: Self = toml::from_str(source).map_err(|e| EngineError::Config(e.to_string()))?;
    options.check()?;
    Ok(options)
  }

  /// Rejects option combinations the engine cannot honour.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::Config`] describing the first problem found.
  pub fn check(&self) -> Result<()> {
    if self.queue_capacity == Some(0) {
      return Err(EngineError::Config(
        "queue_capacity must be at least 1".to_string(),
      ));
    }
    if self.failure.max_consecutive_failures == 0 {
      return Err(EngineError::Config(
        "failure.max_consecutive_failures must be at least 1".to_string(),
      ));
    }
    Ok(())
  }

  /// Time limit, if any.
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_ms.map(Duration::from_millis)
  }

  /// Sets the strategy.
  pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
    self.strategy = strategy;
    self
  }

  /// Sets quiet rendering.
  pub fn with_quiet(mut self, quiet: bool) -> Self {
    self.quiet = quiet;
    self
  }

  /// Appends an environment assignment.
  pub fn with_env(mut self, assignment: EnvAssignment) -> Self {
    self.env.push(assignment);
    self
  }

  /// Sets the time limit.
  pub fn with_timeout(mut self, limit: Duration) -> Self {
    self.timeout_ms = Some(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX));
    self
  }

  /// Bounds every queue to `capacity` Bags.
  pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
    self.queue_capacity = Some(capacity);
    self
  }

  /// Sets the failure policy.
  pub fn with_failure_policy(mut self, failure: FailurePolicy) -> Self {
    self.failure = failure;
    self
  }
}
