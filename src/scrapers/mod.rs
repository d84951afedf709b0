pub mod fetcher;
pub mod http_fetcher;
pub mod mock_fetcher;
pub mod target;

pub use fetcher::{FetchedPage, PageFetcher};
pub use http_fetcher::HttpFetcher;
pub use mock_fetcher::{MockFetcher, MockResponse};
pub use target::TargetPolicy;
