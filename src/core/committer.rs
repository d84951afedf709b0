use crate::parser::{ProductInfo, PRICE_CURRENCY_SYMBOL};
use crate::stats::WorkerStats;
use crate::storage::{Completion, ItemStore, NewWishItem, RequestStatus, StoreError, WishItem};
use crate::{WorkerError, WorkerResult};
use log::{info, warn};
use std::sync::Arc;

pub const DEFAULT_CURRENCY: &str = "RUB";
const ITEM_PRIORITY: i32 = 1;
const ITEM_QUANTITY: i32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(WishItem),
    /// The request already left `pending`; a redelivered message is acknowledged without writing.
    AlreadyProcessed(RequestStatus),
}

/// Turns a crawled product into a wish item and completes the crawl request.
pub struct ResultCommitter {
    store: Arc<dyn ItemStore>,
    currency: String,
    stats: Arc<WorkerStats>,
}

impl ResultCommitter {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self {
            store,
            currency: DEFAULT_CURRENCY.to_string(),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_string();
        self
    }

    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub async fn commit(
        &self,
        request_id: &str,
        product: &ProductInfo,
    ) -> WorkerResult<CommitOutcome> {
        let request = self
            .store
            .find_crawl_request(request_id)
            .await?
            .ok_or_else(|| WorkerError::RequestNotFound(request_id.to_string()))?;

        if request.status != RequestStatus::Pending {
            warn!(
                "Crawl request {} is already {}, skipping duplicate commit",
                request_id, request.status
            );
            self.stats.record_duplicate();
            return Ok(CommitOutcome::AlreadyProcessed(request.status));
        }

        let price_text = product.price.as_deref().unwrap_or_default();
        let price = parse_price(price_text)?;

        let item = NewWishItem {
            wishlist_code: request.wishlist_code.clone(),
            owner_id: request.owner_id,
            title: product.title.clone(),
            market_url: product.canonical_url.to_string(),
            image_url: product.image_url.clone().unwrap_or_default(),
            price,
            currency: self.currency.clone(),
            quantity: ITEM_QUANTITY,
            priority: ITEM_PRIORITY,
        };

        // The pending check above is advisory; the store re-checks it inside the write.
        let completion = match self.store.complete_crawl_request(request_id, item).await {
            Ok(completion) => completion,
            Err(StoreError::NotFound(_)) => {
                return Err(WorkerError::RequestNotFound(request_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        match completion {
            Completion::Completed(item) => {
                info!(
                    "Committed wish item {} ({:?}) to wishlist {} for request {}",
                    item.id, item.name, item.wishlist_code, request_id
                );
                self.stats.record_commit();
                Ok(CommitOutcome::Committed(item))
            }
            Completion::NotPending(status) => {
                warn!(
                    "Crawl request {} became {} while committing, dropping duplicate",
                    request_id, status
                );
                self.stats.record_duplicate();
                Ok(CommitOutcome::AlreadyProcessed(status))
            }
        }
    }
}

/// Parses extracted price text such as `"1 299,50 ₽"` into a number.
pub fn parse_price(text: &str) -> WorkerResult<f64> {
    let malformed = || WorkerError::MalformedPrice(text.to_string());

    let trimmed = text.trim();
    let number = trimmed
        .strip_suffix(PRICE_CURRENCY_SYMBOL)
        .unwrap_or(trimmed);
    let mut number: String = number.chars().filter(|c| !c.is_whitespace()).collect();
    if !number.contains('.') && number.matches(',').count() == 1 {
        number = number.replace(',', ".");
    }

    match number.parse::<f64>() {
        Ok(price) if price.is_finite() && price >= 0.0 => Ok(price),
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CrawlRequest, MemoryItemStore, StoreResult};
    use async_trait::async_trait;
    use url::Url;

    fn product(price: Option<&str>) -> ProductInfo {
        ProductInfo {
            title: "Widget".to_string(),
            price: price.map(str::to_string),
            image_url: Some("https://img/w.jpg".to_string()),
            description: None,
            canonical_url: Url::parse("https://market.example/item/1").unwrap(),
        }
    }

    fn setup() -> (MemoryItemStore, ResultCommitter) {
        let store = MemoryItemStore::new();
        store.insert_crawl_request(CrawlRequest::pending(
            "r1",
            "wl-7",
            42,
            "https://market.example/item/1",
        ));
        let committer = ResultCommitter::new(Arc::new(store.clone()));
        (store, committer)
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("199.99").unwrap(), 199.99);
        assert_eq!(parse_price("199.99 ₽").unwrap(), 199.99);
        assert_eq!(parse_price("1\u{a0}299,50 ₽").unwrap(), 1299.5);
        assert_eq!(parse_price(" 4990 ").unwrap(), 4990.0);
        for bad in ["not-a-number", "", "₽", "-5", "NaN", "inf", "1,2,3"] {
            assert!(
                matches!(parse_price(bad), Err(WorkerError::MalformedPrice(_))),
                "{bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_commit_creates_item_and_completes_request() {
        let (store, committer) = setup();

        let outcome = committer
            .commit("r1", &product(Some("199.99")))
            .await
            .unwrap();

        let items = store.wish_items();
        assert_eq!(items.len(), 1);
        assert_eq!(outcome, CommitOutcome::Committed(items[0].clone()));
        assert_eq!(items[0].wishlist_code, "wl-7");
        assert_eq!(items[0].owner_id, 42);
        assert_eq!(items[0].name, "Widget");
        assert_eq!(items[0].market_price, 199.99);
        assert_eq!(items[0].market_currency, "RUB");
        assert_eq!(items[0].market_quantity, 1);
        assert_eq!(
            store.crawl_request("r1").unwrap().status,
            RequestStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_malformed_price_leaves_request_pending() {
        let (store, committer) = setup();

        let error = committer
            .commit("r1", &product(Some("not-a-number")))
            .await
            .unwrap_err();

        assert!(matches!(error, WorkerError::MalformedPrice(_)));
        assert!(!error.is_retryable());
        assert!(store.wish_items().is_empty());
        assert_eq!(
            store.crawl_request("r1").unwrap().status,
            RequestStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_missing_price_is_malformed() {
        let (store, committer) = setup();
        let error = committer.commit("r1", &product(None)).await.unwrap_err();
        assert!(matches!(error, WorkerError::MalformedPrice(_)));
        assert!(store.wish_items().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_request_is_terminal() {
        let (_, committer) = setup();
        let error = committer
            .commit("missing", &product(Some("10")))
            .await
            .unwrap_err();
        assert!(matches!(error, WorkerError::RequestNotFound(ref id) if id == "missing"));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn test_redelivery_commits_once() {
        let (store, committer) = setup();

        committer.commit("r1", &product(Some("10"))).await.unwrap();
        let second = committer.commit("r1", &product(Some("10"))).await.unwrap();

        assert_eq!(
            second,
            CommitOutcome::AlreadyProcessed(RequestStatus::Completed)
        );
        assert_eq!(store.wish_items().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable_and_writes_nothing() {
        let (store, committer) = setup();
        store.fail_writes(true);

        let error = committer
            .commit("r1", &product(Some("10")))
            .await
            .unwrap_err();

        assert!(matches!(error, WorkerError::Store(_)));
        assert!(error.is_retryable());
        assert!(store.wish_items().is_empty());
        assert_eq!(
            store.crawl_request("r1").unwrap().status,
            RequestStatus::Pending
        );
    }

    /// Hands control back to the runtime before every store call so two commits interleave.
    struct YieldingStore(MemoryItemStore);

    #[async_trait]
    impl ItemStore for YieldingStore {
        async fn find_crawl_request(&self, id: &str) -> StoreResult<Option<CrawlRequest>> {
            tokio::task::yield_now().await;
            self.0.find_crawl_request(id).await
        }

        async fn create_wish_item(&self, item: NewWishItem) -> StoreResult<WishItem> {
            tokio::task::yield_now().await;
            self.0.create_wish_item(item).await
        }

        async fn update_crawl_request_status(
            &self,
            id: &str,
            status: RequestStatus,
        ) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.0.update_crawl_request_status(id, status).await
        }

        async fn complete_crawl_request(
            &self,
            id: &str,
            item: NewWishItem,
        ) -> StoreResult<Completion> {
            tokio::task::yield_now().await;
            self.0.complete_crawl_request(id, item).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_commit_once() {
        let (store, _) = setup();
        let committer = ResultCommitter::new(Arc::new(YieldingStore(store.clone())));
        let product = product(Some("10"));

        let (first, second) = tokio::join!(
            committer.commit("r1", &product),
            committer.commit("r1", &product)
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let committed = outcomes
            .iter()
            .filter(|o| matches!(o, CommitOutcome::Committed(_)))
            .count();
        assert_eq!(committed, 1);
        assert!(outcomes
            .contains(&CommitOutcome::AlreadyProcessed(RequestStatus::Completed)));
        assert_eq!(store.wish_items().len(), 1);
        assert_eq!(
            store.crawl_request("r1").unwrap().status,
            RequestStatus::Completed
        );
        assert_eq!(committer.stats.get_stats().duplicate_deliveries, 1);
    }
}
