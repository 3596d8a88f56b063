//! # Queues
//!
//! FIFO queues carrying `Arc<Bag>` between execution units.
//!
//! Queues are [`tokio::sync::mpsc`] channels, bounded or unbounded depending
//! on the run's `queue_capacity`. Each consumer node owns one receiving end;
//! every incoming edge holds its own sending handle, so the order of Bags
//! along one edge is preserved while Bags from different edges interleave
//! freely. A queue closes once every sending handle is dropped.
//!
//! Both sides can be driven from blocking worker threads (`*_blocking`) and
//! from async tasks. Sending on a full bounded queue suspends the producer:
//! that is the engine's backpressure point.
//!
//! An [`Outlet`] is where an execution unit puts its outputs: the queues of
//! all its consumers, or the sink for exit nodes.

use crate::bag::Bag;
use crate::sink::SinkHandle;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// The receiving side has gone away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("queue closed")]
pub struct Closed;

/// Creates a queue; `None` means unbounded.
pub fn queue(capacity: Option<usize>) -> (QueueSender, QueueReceiver) {
  match capacity {
    Some(capacity) => {
      let (tx, rx) = mpsc::channel(capacity.max(1));
      (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
    }
    None => {
      let (tx, rx) = mpsc::unbounded_channel();
      (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
    }
  }
}

/// Producer side of a queue.
#[derive(Clone, Debug)]
pub enum QueueSender {
  /// Bounded queue: sending waits for room.
  Bounded(mpsc::Sender<Arc<Bag>>),
  /// Unbounded queue: sending never waits.
  Unbounded(mpsc::UnboundedSender<Arc<Bag>>),
}

impl QueueSender {
  /// Enqueues from a blocking thread, waiting for room if bounded.
  ///
  /// Must not be called from within an async task.
  pub fn send_blocking(&self, bag: Arc<Bag>) -> Result<(), Closed> {
    trace!("QueueSender::send_blocking()");
    match self {
      QueueSender::Bounded(tx) => tx.blocking_send(bag).map_err(|_| Closed),
      QueueSender::Unbounded(tx) => tx.send(bag).map_err(|_| Closed),
    }
  }

  /// Enqueues from an async task, waiting for room if bounded.
  pub async fn send(&self, bag: Arc<Bag>) -> Result<(), Closed> {
    trace!("QueueSender::send()");
    match self {
      QueueSender::Bounded(tx) => tx.send(bag).await.map_err(|_| Closed),
      QueueSender::Unbounded(tx) => tx.send(bag).map_err(|_| Closed),
    }
  }
}

/// Consumer side of a queue.
#[derive(Debug)]
pub enum QueueReceiver {
  /// Bounded queue.
  Bounded(mpsc::Receiver<Arc<Bag>>),
  /// Unbounded queue.
  Unbounded(mpsc::UnboundedReceiver<Arc<Bag>>),
}

impl QueueReceiver {
  /// Dequeues from a blocking thread; `None` once the queue is closed and
  /// drained.
  ///
  /// Must not be called from within an async task.
  pub fn recv_blocking(&mut self) -> Option<Arc<Bag>> {
    match self {
      QueueReceiver::Bounded(rx) => rx.blocking_recv(),
      QueueReceiver::Unbounded(rx) => rx.blocking_recv(),
    }
  }

  /// Dequeues from an async task; `None` once the queue is closed and
  /// drained.
  pub async fn recv(&mut self) -> Option<Arc<Bag>> {
    match self {
      QueueReceiver::Bounded(rx) => rx.recv().await,
      QueueReceiver::Unbounded(rx) => rx.recv().await,
    }
  }

  /// Refuses further Bags; producers see [`Closed`] from now on.
  pub fn close(&mut self) {
    match self {
      QueueReceiver::Bounded(rx) => rx.close(),
      QueueReceiver::Unbounded(rx) => rx.close(),
    }
  }
}

/// Destination of an execution unit's outputs.
#[derive(Clone, Debug)]
pub(crate) enum Outlet {
  /// Inner node: one handle per consumer, in edge order.
  Queues(Vec<QueueSender>),
  /// Exit node: deliveries go to the sink dispatcher.
  Sink {
    /// Emitting node's name.
    node: Arc<str>,
    /// Dispatcher handle.
    handle: SinkHandle,
  },
}

impl Outlet {
  /// Delivers from a blocking thread.
  ///
  /// Fan-out clones the `Arc`. Fails only when every consumer is gone.
  pub(crate) fn send_blocking(&self, bag: Arc<Bag>) -> Result<(), Closed> {
    match self {
      Outlet::Queues(senders) => {
        let mut delivered = senders.is_empty();
        for sender in senders {
          delivered |= sender.send_blocking(Arc::clone(&bag)).is_ok();
        }
        if delivered {
          Ok(())
        } else {
          Err(Closed)
        }
      }
      Outlet::Sink { node, handle } => handle.deliver(node, bag),
    }
  }

  /// Delivers from an async task. Same semantics as [`Outlet::send_blocking`].
  pub(crate) async fn send(&self, bag: Arc<Bag>) -> Result<(), Closed> {
    match self {
      Outlet::Queues(senders) => {
        let mut delivered = senders.is_empty();
        for sender in senders {
          delivered |= sender.send(Arc::clone(&bag)).await.is_ok();
        }
        if delivered {
          Ok(())
        } else {
          Err(Closed)
        }
      }
      Outlet::Sink { node, handle } => handle.deliver(node, bag),
    }
  }
}
