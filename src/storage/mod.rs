pub mod base;
pub mod factory;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use base::{
    Completion, CrawlRequest, ItemStore, NewWishItem, RequestStatus, StoreError, StoreResult,
    WishItem,
};
pub use factory::{create_store, StoreType};
pub use memory::MemoryItemStore;
#[cfg(feature = "postgres")]
pub use postgres::PgItemStore;
