use crate::{WorkerError, WorkerResult};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TargetPattern {
    host: String,
    path_prefix: Option<String>,
}

impl TargetPattern {
    fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let (host, path) = match pattern.find('/') {
            Some(index) => (&pattern[..index], Some(&pattern[index..])),
            None => (pattern, None),
        };
        if host.is_empty() {
            return None;
        }

        Some(Self {
            host: host.to_ascii_lowercase(),
            path_prefix: path
                .map(|p| p.trim_end_matches('/'))
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        })
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        let host_matches = host == self.host
            || host
                .strip_suffix(self.host.as_str())
                .is_some_and(|rest| rest.ends_with('.'));
        let path_matches = self.path_prefix.as_ref().map_or(true, |prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        });
        host_matches && path_matches
    }
}

/// Allow-list of product catalog locations the fetcher may visit.
///
/// A pattern is a host, optionally followed by a path prefix (`yandex.ru/products`).
/// Subdomains of a listed host match as well.
#[derive(Debug, Clone, Default)]
pub struct TargetPolicy {
    patterns: Vec<TargetPattern>,
}

impl TargetPolicy {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .filter_map(|p| TargetPattern::parse(p.as_ref()))
                .collect(),
        }
    }

    pub fn check(&self, url: &Url) -> WorkerResult<()> {
        let reject = |reason: &str| {
            Err(WorkerError::InvalidTarget {
                url: url.to_string(),
                reason: reason.to_string(),
            })
        };

        if !matches!(url.scheme(), "http" | "https") {
            return reject("only http and https targets are supported");
        }
        let Some(host) = url.host_str() else {
            return reject("target has no host");
        };
        let host = host.to_ascii_lowercase();

        if self
            .patterns
            .iter()
            .any(|pattern| pattern.matches(&host, url.path()))
        {
            Ok(())
        } else {
            reject("host is not an allowed product catalog")
        }
    }
}
