use super::{ItemStore, MemoryItemStore};
#[cfg(feature = "postgres")]
use super::PgItemStore;
use crate::WorkerResult;
use std::sync::Arc;

pub enum StoreType {
    Memory,
    #[cfg(feature = "postgres")]
    Postgres { url: String, max_connections: u32 },
}

pub async fn create_store(store_type: StoreType) -> WorkerResult<Arc<dyn ItemStore>> {
    match store_type {
        StoreType::Memory => Ok(Arc::new(MemoryItemStore::new())),
        #[cfg(feature = "postgres")]
        StoreType::Postgres {
            url,
            max_connections,
        } => {
            let store = PgItemStore::connect(&url, max_connections).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}
