use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

use super::{FetchedPage, PageFetcher};
use crate::{WorkerError, WorkerResult};

#[derive(Debug, Clone)]
pub enum MockResponse {
    /// 200 with this body.
    Page(String),
    /// Non-success status, surfaced as an upstream error.
    Status(u16),
    /// Page body that takes a while to arrive.
    Slow(String, Duration),
}

/// Scripted fetcher: hands out the configured responses in order, cycling when exhausted.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Vec<MockResponse>>,
    current_response: Arc<AtomicUsize>,
    requested: Arc<Mutex<Vec<Url>>>,
}

impl MockFetcher {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Arc::new(responses),
            current_response: Arc::new(AtomicUsize::new(0)),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requested_urls(&self) -> Vec<Url> {
        self.requested.lock().clone()
    }

    fn page(url: &Url, body: &str) -> FetchedPage {
        FetchedPage {
            url: url.clone(),
            final_url: url.clone(),
            status: 200,
            content_encoding: Vec::new(),
            raw_length: body.len(),
            body: body.as_bytes().to_vec(),
            elapsed: Duration::ZERO,
        }
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &Url) -> WorkerResult<FetchedPage> {
        self.requested.lock().push(url.clone());
        if self.responses.is_empty() {
            return Err(WorkerError::Upstream {
                url: url.to_string(),
                status: 599,
                snippet: "no scripted responses".to_string(),
            });
        }

        let index = self.current_response.fetch_add(1, Ordering::SeqCst);
        match &self.responses[index % self.responses.len()] {
            MockResponse::Page(body) => Ok(Self::page(url, body)),
            MockResponse::Status(status) => Err(WorkerError::Upstream {
                url: url.to_string(),
                status: *status,
                snippet: String::new(),
            }),
            MockResponse::Slow(body, delay) => {
                sleep(*delay).await;
                Ok(Self::page(url, body))
            }
        }
    }
}
