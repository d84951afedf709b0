use super::base::{
    Completion, CrawlRequest, ItemStore, NewWishItem, RequestStatus, StoreError, StoreResult,
    WishItem, WISH_ITEM_PENDING,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct MemoryState {
    requests: HashMap<String, CrawlRequest>,
    items: Vec<WishItem>,
    next_item_id: i64,
    fail_writes: bool,
}

impl MemoryState {
    fn push_item(&mut self, item: NewWishItem) -> WishItem {
        self.next_item_id += 1;
        let created = WishItem {
            id: self.next_item_id,
            wishlist_code: item.wishlist_code,
            owner_id: item.owner_id,
            name: item.title,
            priority: item.priority,
            status: WISH_ITEM_PENDING.to_string(),
            market_link: item.market_url,
            market_picture: item.image_url,
            market_price: item.price,
            market_currency: item.currency,
            market_quantity: item.quantity,
            created_at: Utc::now(),
        };
        self.items.push(created.clone());
        created
    }

    fn check_writable(&self, id: &str) -> StoreResult<()> {
        if self.fail_writes {
            return Err(StoreError::Backend(format!(
                "write for crawl request {id} rejected"
            )));
        }
        Ok(())
    }
}

/// Process-local item store. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryItemStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_crawl_request(&self, request: CrawlRequest) {
        self.state
            .write()
            .requests
            .insert(request.id.clone(), request);
    }

    pub fn crawl_request(&self, id: &str) -> Option<CrawlRequest> {
        self.state.read().requests.get(id).cloned()
    }

    pub fn wish_items(&self) -> Vec<WishItem> {
        self.state.read().items.clone()
    }

    /// Makes every subsequent status update and completion fail before writing anything.
    pub fn fail_writes(&self, fail: bool) {
        self.state.write().fail_writes = fail;
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn find_crawl_request(&self, id: &str) -> StoreResult<Option<CrawlRequest>> {
        Ok(self.crawl_request(id))
    }

    async fn create_wish_item(&self, item: NewWishItem) -> StoreResult<WishItem> {
        Ok(self.state.write().push_item(item))
    }

    async fn update_crawl_request_status(
        &self,
        id: &str,
        status: RequestStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        state.check_writable(id)?;

        let request = state
            .requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("crawl request {id}")))?;
        request.status = status;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_crawl_request(
        &self,
        id: &str,
        item: NewWishItem,
    ) -> StoreResult<Completion> {
        let mut state = self.state.write();
        let status = match state.requests.get(id) {
            Some(request) => request.status,
            None => return Err(StoreError::NotFound(format!("crawl request {id}"))),
        };
        state.check_writable(id)?;
        if status != RequestStatus::Pending {
            return Ok(Completion::NotPending(status));
        }

        let created = state.push_item(item);
        if let Some(request) = state.requests.get_mut(id) {
            request.status = RequestStatus::Completed;
            request.updated_at = Utc::now();
        }
        Ok(Completion::Completed(created))
    }
}
