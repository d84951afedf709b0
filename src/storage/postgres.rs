use super::base::{
    Completion, CrawlRequest, ItemStore, NewWishItem, RequestStatus, StoreError, StoreResult, WishItem,
    WISH_ITEM_PENDING,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        info!("Connected to Postgres item store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the two tables the worker touches if they are missing.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wish_item_data_requests (
                id BIGSERIAL PRIMARY KEY,
                request_id VARCHAR NOT NULL UNIQUE,
                wish_list_code VARCHAR NOT NULL,
                owner_id BIGINT NOT NULL,
                product_url TEXT NOT NULL,
                status VARCHAR NOT NULL DEFAULT 'pending',
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wish_items (
                id BIGSERIAL PRIMARY KEY,
                wish_list_code VARCHAR NOT NULL,
                owner_id BIGINT NOT NULL,
                name TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status VARCHAR NOT NULL,
                market_link TEXT NOT NULL,
                market_picture TEXT NOT NULL,
                market_price DOUBLE PRECISION NOT NULL,
                market_currency VARCHAR NOT NULL,
                market_quantity INTEGER NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Item store schema is in place");
        Ok(())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Connection(error.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

fn crawl_request_from_row(row: &PgRow) -> StoreResult<CrawlRequest> {
    let status: String = row.try_get("status")?;
    Ok(CrawlRequest {
        id: row.try_get("request_id")?,
        wishlist_code: row.try_get("wish_list_code")?,
        owner_id: row.try_get("owner_id")?,
        product_url: row.try_get("product_url")?,
        status: status.parse()?,
        created_at: timestamp(row.try_get("created_at")?),
        updated_at: timestamp(row.try_get("updated_at")?),
    })
}

async fn insert_wish_item<'e, E>(executor: E, item: NewWishItem) -> StoreResult<WishItem>
where
    E: PgExecutor<'e>,
{
    let now = Utc::now();
    let row = sqlx::query(
        "INSERT INTO wish_items (wish_list_code, owner_id, name, priority, status, market_link, \
         market_picture, market_price, market_currency, market_quantity, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) RETURNING id",
    )
    .bind(item.wishlist_code.clone())
    .bind(item.owner_id)
    .bind(item.title.clone())
    .bind(item.priority)
    .bind(WISH_ITEM_PENDING)
    .bind(item.market_url.clone())
    .bind(item.image_url.clone())
    .bind(item.price)
    .bind(item.currency.clone())
    .bind(item.quantity)
    .bind(now.timestamp())
    .fetch_one(executor)
    .await?;

    Ok(WishItem {
        id: row.try_get("id")?,
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
        created_at: now,
    })
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn find_crawl_request(&self, id: &str) -> StoreResult<Option<CrawlRequest>> {
        let row = sqlx::query(
            "SELECT request_id, wish_list_code, owner_id, product_url, status, created_at, updated_at \
             FROM wish_item_data_requests WHERE request_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(crawl_request_from_row).transpose()
    }

    async fn create_wish_item(&self, item: NewWishItem) -> StoreResult<WishItem> {
        insert_wish_item(&self.pool, item).await
    }

    async fn update_crawl_request_status(
        &self,
        id: &str,
        status: RequestStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE wish_item_data_requests SET status = $2, updated_at = $3 WHERE request_id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("crawl request {id}")));
        }
        Ok(())
    }

    async fn complete_crawl_request(
        &self,
        id: &str,
        item: NewWishItem,
    ) -> StoreResult<Completion> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent completions of the same request.
        let row = sqlx::query(
            "SELECT status FROM wish_item_data_requests WHERE request_id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("crawl request {id}")))?;
        let status: RequestStatus = row.try_get::<String, _>("status")?.parse()?;
        if status != RequestStatus::Pending {
            tx.rollback().await?;
            return Ok(Completion::NotPending(status));
        }

        let created = insert_wish_item(&mut *tx, item).await?;
        let result = sqlx::query(
            "UPDATE wish_item_data_requests SET status = $2, updated_at = $3 \
             WHERE request_id = $1 AND status = $4",
        )
        .bind(id)
        .bind(RequestStatus::Completed.as_str())
        .bind(Utc::now().timestamp())
        .bind(RequestStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::Backend(format!(
                "crawl request {id} left pending state mid-transaction"
            )));
        }

        tx.commit().await?;
        debug!("Completed crawl request {} with wish item {}", id, created.id);
        Ok(Completion::Completed(created))
    }
}
