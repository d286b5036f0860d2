//! Reference-counted delivery sink.
//!
//! The broker delivers notification batches on a thread it owns. The sink is
//! the object it delivers into: a cheap `Arc`-counted handle around the
//! sending half of a channel. The broker holds one clone for the lifetime of
//! the subscription, the engine holds another; the sink (and with it the
//! channel) goes away only once both are dropped — so a delivery already in
//! flight when the engine tears down still has a live sink to write into.
//! Teardown races resolve as ordinary channel-close semantics: a send to a
//! closed channel is a logged no-op, never a panic.

use crate::broker::ObjectSnapshot;
use crossbeam::channel::{Receiver, Sender, bounded};
use std::sync::Arc;

/// One ordered delivery from the broker.
pub type NotificationBatch = Vec<ObjectSnapshot>;

/// Callback object the broker delivers notification batches into.
#[derive(Debug)]
pub struct NotificationSink {
    tx: Sender<NotificationBatch>,
}

impl NotificationSink {
    /// Sink plus the receiving half consumed by the engine.
    pub fn channel(capacity: usize) -> (Arc<Self>, Receiver<NotificationBatch>) {
        let (tx, rx) = bounded(capacity);
        (Arc::new(NotificationSink { tx }), rx)
    }

    /// Called by the broker's delivery thread for each batch, in order.
    /// Blocks that thread when the queue is full; never panics, even when
    /// the consuming side is already gone.
    pub fn indicate(&self, batch: NotificationBatch) {
        if self.tx.send(batch).is_err() {
            log::debug!("notification batch dropped: consumer gone");
        }
    }
}
