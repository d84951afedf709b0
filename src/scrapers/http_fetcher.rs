use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, ClientBuilder};
use std::error::Error as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use url::Url;

use super::{FetchedPage, PageFetcher, TargetPolicy};
use crate::core::config::CrawlerConfig;
use crate::http::{decode_body, BrowserEvasion, ContentEncoding, EvasionPolicy};
use crate::{WorkerError, WorkerResult};
use thiserror::Error;

const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const ACCEPT_ENCODING: &str = "gzip, deflate, br";
const MAX_REDIRECTS: usize = 10;
const SNIPPET_CHARS: usize = 500;

/// Raised from inside the redirect policy when a hop leaves the allowed targets.
#[derive(Error, Debug)]
#[error("redirect to {url} is not an allowed product catalog")]
struct RejectedRedirect {
    url: String,
}

fn rejected_redirect(error: &reqwest::Error) -> Option<&RejectedRedirect> {
    let mut source = error.source();
    while let Some(inner) = source {
        if let Some(rejected) = inner.downcast_ref::<RejectedRedirect>() {
            return Some(rejected);
        }
        source = inner.source();
    }
    None
}

/// Follows at most `MAX_REDIRECTS` hops, each of which must pass `targets`.
fn redirect_policy(targets: TargetPolicy) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match targets.check(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(_) => {
                let url = attempt.url().to_string();
                attempt.error(RejectedRedirect { url })
            }
        }
    })
}

/// Disguised GET fetcher.
///
/// One instance owns one browsing session: the cookie jar, the connection pool and
/// the referer chain all live as long as the fetcher does. Response bodies are
/// decoded here, from the `Content-Encoding` header, rather than by the HTTP client.
pub struct HttpFetcher {
    client: Client,
    evasion: Arc<dyn EvasionPolicy>,
    targets: TargetPolicy,
    referer: Mutex<Option<Url>>,
}

impl HttpFetcher {
    pub fn new(
        evasion: Arc<dyn EvasionPolicy>,
        targets: TargetPolicy,
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .cookie_store(true)
            .redirect(redirect_policy(targets.clone()))
            .gzip(false)
            .brotli(false)
            .deflate(false)
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(60))
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .map_err(WorkerError::Client)?;

        Ok(Self {
            client,
            evasion,
            targets,
            referer: Mutex::new(None),
        })
    }

    pub fn from_config(config: &CrawlerConfig) -> WorkerResult<Self> {
        Self::new(
            Arc::new(BrowserEvasion::from_config(config)),
            TargetPolicy::new(&config.allowed_targets),
            config.timeout(),
        )
    }

    /// The URL the next request will name as its referer.
    pub fn referer(&self) -> Option<Url> {
        self.referer.lock().clone()
    }

    fn build_headers(&self, referer: Option<&Url>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let user_agent = self.evasion.user_agent();
        match HeaderValue::from_str(&user_agent) {
            Ok(value) => {
                headers.insert(header::USER_AGENT, value);
            }
            Err(e) => warn!("Skipping invalid user agent {:?}: {}", user_agent, e),
        }
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static(ACCEPT_ENCODING),
        );
        if let Ok(value) = HeaderValue::from_str(self.evasion.accept_language()) {
            headers.insert(header::ACCEPT_LANGUAGE, value);
        }
        if let Some(referer) = referer {
            if let Ok(value) = HeaderValue::from_str(referer.as_str()) {
                headers.insert(header::REFERER, value);
            }
        }

        for (name, value) in self.evasion.extra_headers(referer.is_some()) {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid evasion header {}: {:?}", name, value),
            }
        }

        headers
    }

    fn snippet(encodings: &[ContentEncoding], raw: Vec<u8>) -> String {
        let body = decode_body(encodings, raw.clone()).unwrap_or(raw);
        String::from_utf8_lossy(&body)
            .chars()
            .take(SNIPPET_CHARS)
            .collect()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> WorkerResult<FetchedPage> {
        self.targets.check(url)?;

        let delay = self.evasion.pre_request_delay();
        if !delay.is_zero() {
            debug!("Sleeping {:?} before fetching {}", delay, url);
            sleep(delay).await;
        }

        let referer = self.referer();
        let headers = self.build_headers(referer.as_ref());
        info!("Fetching URL: {}", url);

        let started = Instant::now();
        let transport = |source: reqwest::Error| match rejected_redirect(&source) {
            Some(rejected) => WorkerError::InvalidTarget {
                url: rejected.url.clone(),
                reason: format!("redirected from {url} outside the allowed product catalogs"),
            },
            None => WorkerError::Transport {
                url: url.to_string(),
                source,
            },
        };
        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let final_url = response.url().clone();
        let encodings = ContentEncoding::parse_header(
            response
                .headers()
                .get(header::CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );
        let raw = response.bytes().await.map_err(transport)?.to_vec();
        let raw_length = raw.len();

        if !status.is_success() {
            let snippet = Self::snippet(&encodings, raw);
            warn!(
                "Unexpected status {} for URL {}, response: {}",
                status.as_u16(),
                url,
                snippet
            );
            return Err(WorkerError::Upstream {
                url: url.to_string(),
                status: status.as_u16(),
                snippet,
            });
        }

        let body = decode_body(&encodings, raw).map_err(|(encoding, source)| {
            WorkerError::Decode {
                url: url.to_string(),
                encoding: encoding.to_string(),
                source,
            }
        })?;

        *self.referer.lock() = Some(url.clone());

        let elapsed = started.elapsed();
        debug!(
            "Fetched {} (status={}, encoded={} bytes, decoded={} bytes, elapsed={:?})",
            final_url,
            status.as_u16(),
            raw_length,
            body.len(),
            elapsed
        );

        Ok(FetchedPage {
            url: url.clone(),
            final_url,
            status: status.as_u16(),
            content_encoding: encodings,
            raw_length,
            body,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::QuietEvasion;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = "<html><head><title>Виджет</title></head><body>product</body></html>";

    async fn setup() -> (HttpFetcher, MockServer) {
        let server = MockServer::start().await;
        let fetcher = HttpFetcher::new(
            Arc::new(QuietEvasion::new("TestAgent/1.0")),
            TargetPolicy::new(["127.0.0.1"]),
            Duration::from_secs(5),
        )
        .unwrap();
        (fetcher, server)
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&server.uri()).unwrap().join(p).unwrap()
    }

    fn compress(encoding: &str, data: &[u8]) -> Vec<u8> {
        match encoding {
            "gzip" => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
            "deflate" => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
            "br" => {
                let mut out = Vec::new();
                {
                    let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
                    writer.write_all(data).unwrap();
                }
                out
            }
            _ => data.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_every_encoding_decodes_to_original_body() {
        let (fetcher, server) = setup().await;

        for encoding in ["gzip", "br", "deflate", "identity"] {
            let route = format!("/{}", encoding);
            let mut template =
                ResponseTemplate::new(200).set_body_bytes(compress(encoding, PAGE.as_bytes()));
            if encoding != "identity" {
                template = template.insert_header("content-encoding", encoding);
            }
            Mock::given(method("GET"))
                .and(path(route.as_str()))
                .respond_with(template)
                .mount(&server)
                .await;

            let page = fetcher.fetch(&url(&server, &route)).await.unwrap();
            assert_eq!(page.body, PAGE.as_bytes(), "encoding {}", encoding);
            assert_eq!(page.status, 200);
        }
    }

    #[tokio::test]
    async fn test_sends_browser_headers() {
        let (fetcher, server) = setup().await;

        Mock::given(method("GET"))
            .and(path("/item"))
            .and(header("user-agent", "TestAgent/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let page = fetcher.fetch(&url(&server, "/item")).await.unwrap();
        assert_eq!(page.text(), "ok");

        let requests = server.received_requests().await.unwrap();
        let headers = &requests[0].headers;
        assert_eq!(
            headers.get("accept-encoding").unwrap().to_str().unwrap(),
            ACCEPT_ENCODING
        );
        assert!(headers.get("accept").is_some());
        assert!(headers.get("accept-language").is_some());
    }

    #[tokio::test]
    async fn test_referer_chains_across_fetches() {
        let (fetcher, server) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let first = url(&server, "/first");
        let second = url(&server, "/second");
        assert!(fetcher.referer().is_none());

        fetcher.fetch(&first).await.unwrap();
        assert_eq!(fetcher.referer(), Some(first.clone()));
        fetcher.fetch(&second).await.unwrap();
        assert_eq!(fetcher.referer(), Some(second.clone()));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].headers.get("referer").is_none());
        assert_eq!(
            requests[1].headers.get("referer").unwrap().to_str().unwrap(),
            first.as_str()
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_retryable_upstream_error() {
        let (fetcher, server) = setup().await;
        let long_body = "x".repeat(2000);

        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503).set_body_string(long_body))
            .mount(&server)
            .await;

        let error = fetcher.fetch(&url(&server, "/busy")).await.unwrap_err();
        match &error {
            WorkerError::Upstream {
                status, snippet, ..
            } => {
                assert_eq!(*status, 503);
                assert_eq!(snippet.len(), SNIPPET_CHARS);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(error.is_retryable());
        assert!(fetcher.referer().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_body_is_decode_error() {
        let (fetcher, server) = setup().await;

        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"this is not gzip".to_vec())
                    .insert_header("content-encoding", "gzip"),
            )
            .mount(&server)
            .await;

        let error = fetcher.fetch(&url(&server, "/broken")).await.unwrap_err();
        assert!(matches!(error, WorkerError::Decode { ref encoding, .. } if encoding == "gzip"));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn test_disallowed_target_is_never_requested() {
        let server = MockServer::start().await;
        let fetcher = HttpFetcher::new(
            Arc::new(QuietEvasion::default()),
            TargetPolicy::new(["market.yandex.ru"]),
            Duration::from_secs(5),
        )
        .unwrap();

        let error = fetcher.fetch(&url(&server, "/item")).await.unwrap_err();
        assert!(matches!(error, WorkerError::InvalidTarget { .. }));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_follows_redirects_and_keeps_cookies() {
        let (fetcher, server) = setup().await;

        Mock::given(method("GET"))
            .and(path("/short"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "/product")
                    .insert_header("set-cookie", "session=abc123; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/product"))
            .respond_with(ResponseTemplate::new(200).set_body_string("product page"))
            .mount(&server)
            .await;

        let page = fetcher.fetch(&url(&server, "/short")).await.unwrap();
        assert_eq!(page.text(), "product page");
        assert_eq!(page.final_url.path(), "/product");

        fetcher.fetch(&url(&server, "/product")).await.unwrap();
        let requests = server.received_requests().await.unwrap();
        let last = requests.last().unwrap();
        let cookie = last.headers.get("cookie").unwrap().to_str().unwrap();
        assert!(cookie.contains("session=abc123"));
    }

    #[tokio::test]
    async fn test_redirect_off_the_allow_list_is_invalid_target() {
        let (fetcher, server) = setup().await;
        let port = server.address().port();

        Mock::given(method("GET"))
            .and(path("/short"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("http://localhost:{port}/elsewhere")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/elsewhere"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not a catalog"))
            .expect(0)
            .mount(&server)
            .await;

        let error = fetcher.fetch(&url(&server, "/short")).await.unwrap_err();
        match &error {
            WorkerError::InvalidTarget { url, .. } => assert!(url.contains("localhost")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!error.is_retryable());
        assert!(fetcher.referer().is_none());
    }
}
