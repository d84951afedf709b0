use async_trait::async_trait;
use thiserror::Error;

use super::Envelope;

#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(String),
    #[error("Broker channel error: {0}")]
    Channel(String),
    #[error("Broker connection closed")]
    Closed,
    #[error("Failed to serialize message: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Serialization(e.to_string())
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// One message handed out by the broker, pending settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Next delivery, or `None` once the subscription has ended.
    async fn receive(&mut self) -> Option<BrokerResult<Delivery>>;
    async fn ack(&self, tag: u64) -> BrokerResult<()>;
    async fn nack(&self, tag: u64, requeue: bool) -> BrokerResult<()>;
    async fn publish(&self, envelope: &Envelope) -> BrokerResult<()>;
}
