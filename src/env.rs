//! # Environment Injection
//!
//! `KEY=VALUE` assignments applied to the process environment for the
//! duration of one run.
//!
//! Values wrapped in a matching pair of single or double quotes are
//! unquoted, so `ENV_TEST_STRING='my_test_string'` injects `my_test_string`.
//!
//! The environment is process-wide, so runs carrying assignments are
//! serialized through one lock, and every variable is restored (or removed)
//! when the run ends. Worker processes spawned by the processed strategy
//! inherit the injected values.

use scopeguard::ScopeGuard;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Malformed `KEY=VALUE` assignment.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid environment assignment '{input}': {reason}")]
pub struct EnvParseError {
  input: String,
  reason: &'static str,
}

/// One `KEY=VALUE` assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnvAssignment {
  key: String,
  value: String,
}

impl EnvAssignment {
  /// Builds an assignment from its parts.
  pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      value: value.into(),
    }
  }

  /// Variable name.
  pub fn key(&self) -> &str {
    &self.key
  }

  /// Variable value, unquoted.
  pub fn value(&self) -> &str {
    &self.value
  }
}

impl FromStr for EnvAssignment {
  type Err = EnvParseError;

  fn from_str(input: &str) -> Result<Self, Self::Err> {
    let fail = |reason| EnvParseError {
      input: input.to_string(),
      reason,
    };
    let (key, value) = input.split_once('=').ok_or_else(|| fail("expected KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
      return Err(fail("empty variable name"));
    }
    if key.contains('\0') || value.contains('\0') {
      return Err(fail("NUL character"));
    }
    Ok(Self::new(key, unquote(value)))
  }
}

impl TryFrom<String> for EnvAssignment {
  type Error = EnvParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<EnvAssignment> for String {
  fn from(assignment: EnvAssignment) -> Self {
    assignment.to_string()
  }
}

impl fmt::Display for EnvAssignment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}={}", self.key, self.value)
  }
}

fn unquote(value: &str) -> &str {
  for quote in ['\'', '"'] {
    if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
      return &value[1..value.len() - 1];
    }
  }
  value
}

type Restore = ScopeGuard<Vec<(String, Option<OsString>)>, fn(Vec<(String, Option<OsString>)>)>;

/// Environment overrides held for the duration of a run.
///
/// Dropping the scope restores the previous values, then releases the lock.
pub(crate) struct EnvScope {
  _restore: Option<Restore>,
  _lock: Option<MutexGuard<'static, ()>>,
}

fn lock() -> &'static Mutex<()> {
  static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
  LOCK.get_or_init(|| Mutex::new(()))
}

fn restore(previous: Vec<(String, Option<OsString>)>) {
  for (key, value) in previous.into_iter().rev() {
    match value {
      Some(value) => std::env::set_var(&key, value),
      None => std::env::remove_var(&key),
    }
  }
}

/// Applies `assignments` until the returned scope is dropped.
///
/// Without assignments nothing is locked or changed.
///
/// # Concurrency
///
/// `set_var` and `remove_var` race with any concurrent read or write of the
/// process environment, including reads made by libc on other threads. Runs
/// holding assignments are serialized by a global lock, so two runs never
/// write at once. Nothing else in the process may touch the environment while
/// a scope is alive; transforms only read it.
pub(crate) async fn scope(assignments: &[EnvAssignment]) -> EnvScope {
  if assignments.is_empty() {
    return EnvScope {
      _restore: None,
      _lock: None,
    };
  }
  let guard = lock().lock().await;
  let mut previous = Vec::with_capacity(assignments.len());
  for assignment in assignments {
    previous.push((assignment.key.clone(), std::env::var_os(&assignment.key)));
    std::env::set_var(&assignment.key, &assignment.value);
    debug!(key = %assignment.key, "environment variable injected");
  }
  EnvScope {
    _restore: Some(scopeguard::guard(previous, restore as fn(_))),
    _lock: Some(guard),
  }
}
