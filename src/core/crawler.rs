use crate::core::config::CrawlerConfig;
use crate::parser::{ProductExtractor, ProductInfo};
use crate::scrapers::{HttpFetcher, PageFetcher};
use crate::stats::WorkerStats;
use crate::{WorkerError, WorkerResult};
use log::{debug, info};
use std::sync::Arc;
use url::Url;

/// Given a product URL, returns the product on that page or a classified failure.
///
/// Failures keep the retryable/terminal classification of whichever step produced them.
pub struct CrawlClient {
    fetcher: Box<dyn PageFetcher>,
    extractor: ProductExtractor,
    stats: Arc<WorkerStats>,
}

impl CrawlClient {
    pub fn new(fetcher: Box<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            extractor: ProductExtractor::new(),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> WorkerResult<Self> {
        Ok(Self::new(Box::new(HttpFetcher::from_config(config)?)))
    }

    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub async fn crawl_product(&self, product_url: &str) -> WorkerResult<ProductInfo> {
        let url = Url::parse(product_url.trim()).map_err(|e| WorkerError::InvalidTarget {
            url: product_url.to_string(),
            reason: e.to_string(),
        })?;

        let page = self.fetcher.fetch(&url).await?;
        self.stats.record_fetch(page.raw_length, page.elapsed);
        debug!(
            "Extracting product from {} ({} bytes)",
            page.final_url,
            page.body.len()
        );

        let product = self.extractor.extract(&page.text(), &url)?;
        info!(
            "Crawled product {:?} (price={:?}) from {}",
            product.title, product.price, url
        );
        Ok(product)
    }
}
