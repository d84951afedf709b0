use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(StoreError::InvalidRecord(format!(
                "unknown crawl request status {other:?}"
            ))),
        }
    }
}

/// "Find product data for this URL and attach it to this wishlist."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub id: String,
    pub wishlist_code: String,
    pub owner_id: i64,
    pub product_url: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlRequest {
    pub fn pending(
        id: impl Into<String>,
        wishlist_code: impl Into<String>,
        owner_id: i64,
        product_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            wishlist_code: wishlist_code.into(),
            owner_id,
            product_url: product_url.into(),
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Item status values owned by the item store; crawled items always start out `pending`.
pub const WISH_ITEM_PENDING: &str = "pending";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWishItem {
    pub wishlist_code: String,
    pub owner_id: i64,
    pub title: String,
    pub market_url: String,
    pub image_url: String,
    pub price: f64,
    pub currency: String,
    pub quantity: i32,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishItem {
    pub id: i64,
    pub wishlist_code: String,
    pub owner_id: i64,
    pub name: String,
    pub priority: i32,
    pub status: String,
    pub market_link: String,
    pub market_picture: String,
    pub market_price: f64,
    pub market_currency: String,
    pub market_quantity: i32,
    pub created_at: DateTime<Utc>,
}

/// Result of trying to complete a crawl request with its wish item.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Completed(WishItem),
    /// Someone else already moved the request out of `pending`; nothing was written.
    NotPending(RequestStatus),
}

/// The slice of the wishlist item store the worker depends on.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_crawl_request(&self, id: &str) -> StoreResult<Option<CrawlRequest>>;

    async fn create_wish_item(&self, item: NewWishItem) -> StoreResult<WishItem>;

    async fn update_crawl_request_status(&self, id: &str, status: RequestStatus)
        -> StoreResult<()>;

    /// Creates `item` and marks request `id` completed as one unit, only if the request
    /// is still `pending` at that moment. Either both writes happen or neither does.
    async fn complete_crawl_request(&self, id: &str, item: NewWishItem)
        -> StoreResult<Completion>;
}
