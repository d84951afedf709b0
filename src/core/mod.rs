pub mod committer;
pub mod config;
pub mod crawler;
mod errors;

pub use committer::{parse_price, CommitOutcome, ResultCommitter};
pub use config::WorkerConfig;
pub use crawler::CrawlClient;
pub use errors::{Disposition, WorkerError, WorkerResult};
