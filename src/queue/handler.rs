use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;

use super::{CrawlProductPayload, Envelope};
use crate::core::{CommitOutcome, CrawlClient, ResultCommitter};
use crate::WorkerResult;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returning `Ok` means the message may be acknowledged.
    async fn handle(&self, envelope: &Envelope) -> WorkerResult<()>;
}

/// Crawls the product named by a `crawl_product` task and commits it.
///
/// Returns only after the commit has been written, so the delivery is never
/// acknowledged ahead of the data it produced.
pub struct CrawlProductHandler {
    crawler: Arc<CrawlClient>,
    committer: Arc<ResultCommitter>,
}

impl CrawlProductHandler {
    pub fn new(crawler: Arc<CrawlClient>, committer: Arc<ResultCommitter>) -> Self {
        Self { crawler, committer }
    }
}

#[async_trait]
impl MessageHandler for CrawlProductHandler {
    async fn handle(&self, envelope: &Envelope) -> WorkerResult<()> {
        let task = CrawlProductPayload::from_envelope(envelope)?;
        info!(
            "Crawling product for request {}: {}",
            task.request_id, task.product_url
        );

        let product = match self.crawler.crawl_product(&task.product_url).await {
            Ok(product) => product,
            Err(e) => {
                warn!(
                    "Crawl failed for request {} ({}) [{}]: {}",
                    task.request_id,
                    task.product_url,
                    e.kind(),
                    e
                );
                return Err(e);
            }
        };

        match self.committer.commit(&task.request_id, &product).await {
            Ok(CommitOutcome::Committed(item)) => {
                info!(
                    "Request {} completed with wish item {}",
                    task.request_id, item.id
                );
                Ok(())
            }
            Ok(CommitOutcome::AlreadyProcessed(status)) => {
                info!(
                    "Request {} was already {}, nothing to do",
                    task.request_id, status
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Commit failed for request {} ({}) [{}]: {}",
                    task.request_id,
                    task.product_url,
                    e.kind(),
                    e
                );
                Err(e)
            }
        }
    }
}

/// Handles informational events that need no work beyond a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoticeHandler;

#[async_trait]
impl MessageHandler for NoticeHandler {
    async fn handle(&self, envelope: &Envelope) -> WorkerResult<()> {
        info!(
            "Received {} event: {}",
            envelope.message_type,
            serde_json::Value::Object(envelope.payload.clone())
        );
        Ok(())
    }
}
