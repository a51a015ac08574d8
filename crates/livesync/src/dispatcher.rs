use crate::cursor::ResumeCursor;
use crate::envelope::Envelope;
use crate::error::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Receives every well-formed inbound envelope.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<()>;
}

/// Result of feeding one raw frame through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not valid JSON; nothing changed.
    Dropped,
    /// Cursor advanced and every subscriber ran.
    Delivered { handlers: usize, failures: usize },
}

/// Decodes frames, advances the resumption cursor and fans envelopes out
/// to subscribers in subscription order.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn EnvelopeHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Subscribing the same `Arc` twice is a no-op;
    /// returns whether it was added.
    pub fn subscribe(&mut self, handler: Arc<dyn EnvelopeHandler>) -> bool {
        if self.handlers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        self.handlers.push(handler);
        true
    }

    /// Remove a handler; returns whether it was subscribed.
    pub fn unsubscribe(&mut self, handler: &Arc<dyn EnvelopeHandler>) -> bool {
        match self.handlers.iter().position(|h| same_handler(h, handler)) {
            Some(idx) => {
                self.handlers.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn dispatch(&self, raw: &str, cursor: &mut ResumeCursor) -> Dispatch {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return Dispatch::Dropped;
            }
        };

        cursor.advance(&envelope);
        trace!(
            "Envelope {} ({}) for {} handlers",
            envelope.id,
            envelope.message_type,
            self.handlers.len()
        );

        let mut failures = 0;
        for handler in &self.handlers {
            match AssertUnwindSafe(handler.handle(&envelope))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(
                        "Handler {} failed on envelope {}: {}",
                        handler.name(),
                        envelope.id,
                        e
                    );
                }
                Err(panic) => {
                    failures += 1;
                    error!(
                        "Handler {} panicked on envelope {}: {}",
                        handler.name(),
                        envelope.id,
                        panic_message(&*panic)
                    );
                }
            }
        }

        Dispatch::Delivered {
            handlers: self.handlers.len(),
            failures,
        }
    }
}

fn same_handler(a: &Arc<dyn EnvelopeHandler>, b: &Arc<dyn EnvelopeHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
