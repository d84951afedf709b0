pub mod core;
pub mod http;
pub mod parser;
pub mod queue;
pub mod scrapers;
pub mod stats;
pub mod storage;

pub use crate::core::{
    CrawlClient, Disposition, ResultCommitter, WorkerConfig, WorkerError, WorkerResult,
};
pub use parser::{ProductExtractor, ProductInfo};
pub use queue::{ConsumerLoop, Dispatcher, Envelope, MessageBroker};
pub use scrapers::PageFetcher;
pub use stats::WorkerStats;
pub use storage::ItemStore;
