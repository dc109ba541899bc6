//! Callback sink abstraction between the session manager and its caller.
//!
//! Every operation reports through a [`Callback`]. Keep-open deliveries
//! (the watch acknowledgment and watch events) borrow the callback;
//! terminal deliveries (success or error) consume it, so an invocation can
//! finish at most once.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{DiscoveryError, ErrorReply};

/// One message to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Non-terminal acknowledgment; the channel stays open
    NoResult,
    /// Non-terminal event on a kept-open channel
    Event(Value),
    /// Terminal success, with an optional payload
    Success(Option<Value>),
    /// Terminal failure
    Error(ErrorReply),
}

impl Delivery {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Delivery::Success(_) | Delivery::Error(_))
    }
}

/// Transport that carries deliveries back to the caller.
pub trait CallbackSink: Send + Sync {
    fn deliver(&self, delivery: Delivery);
}

impl<F> CallbackSink for F
where
    F: Fn(Delivery) + Send + Sync,
{
    fn deliver(&self, delivery: Delivery) {
        self(delivery)
    }
}

/// The reply side of one operation invocation.
pub struct Callback {
    sink: Arc<dyn CallbackSink>,
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}

impl Callback {
    pub fn new(sink: Arc<dyn CallbackSink>) -> Self {
        Self { sink }
    }

    /// Acknowledges without a result and keeps the channel open.
    pub fn ack(&self) {
        self.sink.deliver(Delivery::NoResult);
    }

    /// Sends a keep-open event.
    pub fn event<T: Serialize>(&self, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.sink.deliver(Delivery::Event(value)),
            Err(e) => warn!(error = %e, "Failed to serialize event, skipping"),
        }
    }

    /// Terminal success without payload.
    pub fn success(self) {
        self.sink.deliver(Delivery::Success(None));
    }

    /// Terminal success carrying `payload`.
    pub fn success_with<T: Serialize>(self, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.sink.deliver(Delivery::Success(Some(value))),
            Err(e) => self.sink.deliver(Delivery::Error(ErrorReply {
                code: "serialization_error".to_string(),
                message: e.to_string(),
            })),
        }
    }

    /// Terminal failure.
    pub fn error(self, err: &DiscoveryError) {
        debug!(code = err.code(), error = %err, "Reporting operation failure");
        self.sink.deliver(Delivery::Error(err.into()));
    }

    /// Reports `result` as the terminal outcome.
    pub fn finish<T: Serialize>(self, result: Result<Option<T>, DiscoveryError>) {
        match result {
            Ok(Some(payload)) => self.success_with(&payload),
            Ok(None) => self.success(),
            Err(err) => self.error(&err),
        }
    }
}

/// A sink that forwards deliveries into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: async_channel::Sender<Delivery>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its deliveries arrive on.
    pub fn new() -> (Arc<Self>, async_channel::Receiver<Delivery>) {
        let (tx, rx) = async_channel::unbounded();
        (Arc::new(Self { tx }), rx)
    }

    /// Convenience: a fresh [`Callback`] over a new channel.
    pub fn callback() -> (Callback, async_channel::Receiver<Delivery>) {
        let (sink, rx) = Self::new();
        (Callback::new(sink), rx)
    }
}

impl CallbackSink for ChannelSink {
    fn deliver(&self, delivery: Delivery) {
        if self.tx.try_send(delivery).is_err() {
            debug!("Callback receiver dropped, discarding delivery");
        }
    }
}
