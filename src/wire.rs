//! # Worker Wire Protocol
//!
//! Messages exchanged between the processed strategy and a worker process,
//! one JSON document per line.
//!
//! The parent writes [`Request`]s to the worker's stdin. The worker answers
//! each request, in order, with any number of `emit`, `forward` or `failed`
//! replies followed by exactly one `done`:
//!
//! ```text
//! parent → worker   {"seq":0,"bag":{"args":["foo"]}}
//! worker → parent   @bagpipe {"type":"emit","seq":0,"bag":{"args":["Foo (3)"]}}
//! worker → parent   @bagpipe {"type":"done","seq":0}
//! ```
//!
//! A request without a Bag only asks the worker to acknowledge the sequence
//! number; the parent uses it to keep forwarded error Bags in order with
//! regular outputs.
//!
//! Replies carry the [`REPLY_PREFIX`] marker so that anything a transform
//! prints on stdout by itself can be told apart from protocol traffic.

use crate::bag::Bag;
use crate::error::TransformError;
use serde::{Deserialize, Serialize};

/// Marker starting every reply line.
pub const REPLY_PREFIX: &str = "@bagpipe ";

/// Input sent to a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
  /// Sequence number, increasing by one per request.
  pub seq: u64,
  /// Bag to process; absent for acknowledgement-only requests.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bag: Option<Bag>,
}

/// Borrowing twin of [`Request`], serialized without cloning the Bag.
#[derive(Serialize)]
pub(crate) struct RequestRef<'a> {
  pub seq: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bag: Option<&'a Bag>,
}

/// Answer from a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
  /// One output Bag derived from the request's Bag.
  Emit {
    /// Request being answered.
    seq: u64,
    /// Output payload.
    bag: Bag,
  },
  /// The request's Bag is forwarded unchanged.
  Forward {
    /// Request being answered.
    seq: u64,
  },
  /// The invocation failed; no further outputs follow for this request.
  Failed {
    /// Request being answered.
    seq: u64,
    /// What went wrong.
    error: TransformError,
  },
  /// The request is fully answered.
  Done {
    /// Request being answered.
    seq: u64,
  },
}

impl Reply {
  /// Sequence number this reply answers.
  pub fn seq(&self) -> u64 {
    match self {
      Reply::Emit { seq, .. }
      | Reply::Forward { seq }
      | Reply::Failed { seq, .. }
      | Reply::Done { seq } => *seq,
    }
  }

  /// Renders the reply as one protocol line, without the trailing newline.
  pub fn to_line(&self) -> serde_json::Result<String> {
    Ok(format!("{}{}", REPLY_PREFIX, serde_json::to_string(self)?))
  }

  /// Parses one line of worker output.
  ///
  /// Returns `None` for lines that are not protocol traffic.
  pub fn from_line(line: &str) -> Option<serde_json::Result<Reply>> {
    line
      .strip_prefix(REPLY_PREFIX)
      .map(|payload| serde_json::from_str(payload.trim_end()))
  }
}
