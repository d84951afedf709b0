use crate::http::ContentEncoding;
use crate::WorkerResult;
use async_trait::async_trait;
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

/// A successfully fetched and fully decoded page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub final_url: Url,
    pub status: u16,
    pub content_encoding: Vec<ContentEncoding>,
    pub raw_length: usize,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl FetchedPage {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> WorkerResult<FetchedPage>;
}
