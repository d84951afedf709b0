use crate::core::config::CrawlerConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7";

/// How the fetcher disguises itself: which browser it claims to be, how long it
/// waits before each request and which extra headers it sends.
pub trait EvasionPolicy: Send + Sync {
    fn user_agent(&self) -> String;

    fn accept_language(&self) -> &str {
        DEFAULT_ACCEPT_LANGUAGE
    }

    fn pre_request_delay(&self) -> Duration;

    /// Headers on top of the baseline `User-Agent`/`Accept*`/`Referer` set.
    fn extra_headers(&self, has_referer: bool) -> Vec<(&'static str, String)> {
        let _ = has_referer;
        Vec::new()
    }
}

/// Rotating desktop user agents, a uniformly random pre-request delay and a Chrome-like header set.
#[derive(Debug, Clone)]
pub struct BrowserEvasion {
    user_agents: Vec<String>,
    accept_language: String,
    min_delay: Duration,
    max_delay: Duration,
}

impl BrowserEvasion {
    pub fn new(user_agents: Vec<String>, min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };

        Self {
            user_agents,
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            min_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.user_agents.clone(),
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_accept_language(&config.accept_language)
    }

    pub fn with_accept_language(mut self, accept_language: &str) -> Self {
        self.accept_language = accept_language.to_string();
        self
    }
}

impl EvasionPolicy for BrowserEvasion {
    fn user_agent(&self) -> String {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    fn accept_language(&self) -> &str {
        &self.accept_language
    }

    fn pre_request_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn extra_headers(&self, has_referer: bool) -> Vec<(&'static str, String)> {
        let fetch_site = if has_referer { "same-origin" } else { "none" };
        vec![
            ("Connection", "keep-alive".to_string()),
            ("Upgrade-Insecure-Requests", "1".to_string()),
            ("Sec-Fetch-Dest", "document".to_string()),
            ("Sec-Fetch-Mode", "navigate".to_string()),
            ("Sec-Fetch-Site", fetch_site.to_string()),
            ("Sec-Fetch-User", "?1".to_string()),
            ("Cache-Control", "max-age=0".to_string()),
            ("DNT", "1".to_string()),
            (
                "sec-ch-ua",
                r#""Chromium";v="130", "Google Chrome";v="130", "Not?A_Brand";v="99""#.to_string(),
            ),
            ("sec-ch-ua-mobile", "?0".to_string()),
            ("sec-ch-ua-platform", r#""macOS""#.to_string()),
        ]
    }
}

/// Fixed user agent and no delay. Used in tests and for trusted internal targets.
#[derive(Debug, Clone)]
pub struct QuietEvasion {
    user_agent: String,
}

impl QuietEvasion {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }
}

impl Default for QuietEvasion {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

impl EvasionPolicy for QuietEvasion {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn pre_request_delay(&self) -> Duration {
        Duration::ZERO
    }
}
