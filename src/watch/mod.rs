//! Asynchronous notification subscription engine.
//!
//! Owns the subscribe/unsubscribe lifecycle against the broker and fans each
//! delivered batch out to one registered listener. Concurrency is asymmetric:
//! control operations (`start`/`stop`/`reset`) run on the caller's thread,
//! delivery arrives on a thread the broker owns and this engine neither
//! creates nor joins.
//!
//! The broker's thread never runs listener code. It writes batches into the
//! [`NotificationSink`]'s channel; the engine's own consumer thread dequeues
//! and hands each object of a batch, in order, to the listener. Teardown is
//! channel-close cancellation: no timeout is imposed on start or stop, and
//! deliveries in flight when `stop` lands complete through the sink clone the
//! broker's thread already holds.

pub mod sink;

pub use sink::{NotificationBatch, NotificationSink};

use crate::broker::{Broker, BrokerError, ObjectSnapshot, Query, SubscriptionId};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Default capacity of the sink's delivery queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Subscription lifecycle. Exactly one active subscription per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Listening,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is already listening")]
    AlreadyListening,

    #[error("engine is not listening")]
    NotListening,

    /// Teardown refused: the delivery path may still reference engine state.
    #[error("cannot reset while listening")]
    Busy,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Receives each delivered object, in batch order, on the engine's consumer
/// thread. One listener per subscription.
pub trait NotificationListener: Send + Sync {
    fn notify(&self, object: &ObjectSnapshot);
}

/// Subscription engine bound to one broker connection.
pub struct NotificationEngine {
    broker: Arc<dyn Broker>,
    queue_capacity: usize,
    state: SubscriptionState,
    subscription: Option<SubscriptionId>,
    sink: Option<Arc<NotificationSink>>,
    consumer: Option<JoinHandle<()>>,
}

impl NotificationEngine {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_queue_capacity(broker, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(broker: Arc<dyn Broker>, queue_capacity: usize) -> Self {
        NotificationEngine {
            broker,
            queue_capacity,
            state: SubscriptionState::Idle,
            subscription: None,
            sink: None,
            consumer: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == SubscriptionState::Listening
    }

    /// Subscribe to `query`, delivering into `listener`. Fails without state
    /// change when already listening; a failed subscription leaves the engine
    /// idle with nothing running.
    pub fn start(
        &mut self,
        query: &Query,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<(), EngineError> {
        if self.state == SubscriptionState::Listening {
            return Err(EngineError::AlreadyListening);
        }

        let (sink, rx) = NotificationSink::channel(self.queue_capacity);
        let consumer = thread::spawn(move || {
            while let Ok(batch) = rx.recv() {
                log::debug!("delivering batch of {} object(s)", batch.len());
                for object in &batch {
                    log::trace!(
                        "notification object: {}",
                        serde_json::to_string(object).unwrap_or_default()
                    );
                    listener.notify(object);
                }
            }
        });

        match self.broker.subscribe(query, Arc::clone(&sink)) {
            Ok(id) => {
                log::info!("listening: {query}");
                self.subscription = Some(id);
                self.sink = Some(sink);
                // A consumer from a previous stop may still be draining
                // in-flight deliveries; replacing the handle detaches it.
                self.consumer = Some(consumer);
                self.state = SubscriptionState::Listening;
                Ok(())
            }
            Err(err) => {
                // Close the channel so the freshly spawned consumer exits.
                drop(sink);
                let _ = consumer.join();
                Err(err.into())
            }
        }
    }

    /// Unsubscribe. On success the state flips to idle immediately;
    /// deliveries already in flight may still reach the listener afterwards
    /// through the sink reference the broker's thread holds.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let Some(id) = self.subscription else {
            return Err(EngineError::NotListening);
        };
        if self.state != SubscriptionState::Listening {
            return Err(EngineError::NotListening);
        }

        self.broker.cancel(id)?;
        log::info!("subscription cancelled");
        self.state = SubscriptionState::Idle;
        self.subscription = None;
        // Drop our sink reference; the consumer drains whatever the broker
        // side still writes and exits once the last clone goes away.
        self.sink = None;
        Ok(())
    }

    /// Tear down the idle engine, waiting out the draining consumer.
    /// Refused while listening: the delivery path still references the sink.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if self.state == SubscriptionState::Listening {
            return Err(EngineError::Busy);
        }
        self.subscription = None;
        self.sink = None;
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
        Ok(())
    }
}
