#[cfg(feature = "amqp")]
pub mod amqp;
pub mod broker;
pub mod consumer;
pub mod dispatcher;
pub mod envelope;
pub mod handler;
pub mod memory;


#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use broker::{BrokerError, BrokerResult, Delivery, MessageBroker};
pub use consumer::{ConsumerLoop, WorkerState, DEFAULT_SHUTDOWN_GRACE};
pub use dispatcher::Dispatcher;
pub use envelope::{
    CrawlProductPayload, Envelope, ACCOUNT_UPDATED, CRAWL_PRODUCT, WISHITEM_CREATED,
    WISHLIST_CREATED,
};
pub use handler::{CrawlProductHandler, MessageHandler, NoticeHandler};
pub use memory::MemoryBroker;
