use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use super::{Envelope, MessageHandler};
use crate::core::Disposition;
use crate::stats::WorkerStats;

/// Routes decoded envelopes to the handler registered for their type.
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    stats: Arc<WorkerStats>,
}

impl Dispatcher {
    pub fn new(stats: Arc<WorkerStats>) -> Self {
        Self {
            handlers: HashMap::new(),
            stats,
        }
    }

    pub fn register(mut self, message_type: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(message_type.to_string(), handler);
        self
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub async fn dispatch(&self, body: &[u8]) -> Disposition {
        let envelope = match Envelope::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    "Discarding undecodable message ({} bytes): {}",
                    body.len(),
                    e
                );
                self.stats.record_failure("malformed_message");
                return Disposition::Discard;
            }
        };

        let Some(handler) = self.handlers.get(&envelope.message_type) else {
            warn!(
                "No handler for message type {:?}, acknowledging",
                envelope.message_type
            );
            return Disposition::Ack;
        };

        match handler.handle(&envelope).await {
            Ok(()) => {
                debug!("Handled {} message", envelope.message_type);
                Disposition::Ack
            }
            Err(e) => {
                self.stats.record_failure(e.kind());
                e.disposition()
            }
        }
    }
}
