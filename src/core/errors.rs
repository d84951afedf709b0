use crate::queue::BrokerError;
use crate::storage::StoreError;
use thiserror::Error;

/// What the consumer does with a delivery once its handler has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Remove the message from the queue for good.
    Ack,
    /// Negative acknowledgment with requeue: the broker delivers it again later.
    Requeue,
    /// Negative acknowledgment without requeue: the message is dead-lettered or dropped.
    Discard,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid crawl target {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("Upstream returned HTTP {status} for {url}: {snippet}")]
    Upstream {
        url: String,
        status: u16,
        snippet: String,
    },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode {encoding} body from {url}: {source}")]
    Decode {
        url: String,
        encoding: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No product data found on {0}")]
    NotFound(String),

    #[error("Crawl request {0} not found")]
    RequestNotFound(String),

    #[error("Malformed price: {0:?}")]
    MalformedPrice(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    Client(reqwest::Error),
}

impl WorkerError {
    /// Transient failures are worth another delivery; everything else would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::Upstream { .. }
                | WorkerError::Transport { .. }
                | WorkerError::Store(_)
                | WorkerError::Broker(_)
        )
    }

    pub fn disposition(&self) -> Disposition {
        if self.is_retryable() {
            Disposition::Requeue
        } else {
            Disposition::Discard
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::InvalidTarget { .. } => "invalid_target",
            WorkerError::Upstream { .. } => "upstream",
            WorkerError::Transport { .. } => "transport",
            WorkerError::Decode { .. } => "decode",
            WorkerError::NotFound(_) => "not_found",
            WorkerError::RequestNotFound(_) => "request_not_found",
            WorkerError::MalformedPrice(_) => "malformed_price",
            WorkerError::MalformedMessage(_) => "malformed_message",
            WorkerError::Store(_) => "store",
            WorkerError::Broker(_) => "broker",
            WorkerError::Config(_) => "config",
            WorkerError::Client(_) => "client",
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
