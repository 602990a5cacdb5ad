//! Per-registry connection settings.

use std::time::Duration;

use taxa_core::defaults;

/// User agent sent to every registry.
pub const USER_AGENT: &str = concat!("taxa/", env!("CARGO_PKG_VERSION"));

pub const GBIF_URL: &str = "https://api.gbif.org";
pub const INAT_URL: &str = "https://api.inaturalist.org";
pub const ITIS_URL: &str = "https://www.itis.gov";
pub const WIKIDATA_URL: &str = "https://query.wikidata.org";
pub const PLANTBOOK_URL: &str = "https://open.plantbook.io";

/// Connection settings for one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Scheme and host, without a trailing slash. Adapters append their paths.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after the first attempt on 429/5xx and transport errors.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt up to `backoff_cap`.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Concurrent in-flight requests.
    pub concurrency: usize,
    /// Minimum spacing between successive requests (zero disables pacing).
    pub min_interval: Duration,
    pub user_agent: String,
    pub api_key: Option<String>,
}

impl RegistryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(defaults::HTTP_TIMEOUT_SECS),
            max_retries: defaults::MAX_RETRIES,
            backoff_base: Duration::from_millis(defaults::BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(defaults::BACKOFF_CAP_MS),
            concurrency: defaults::HTTP_CONCURRENCY,
            min_interval: Duration::ZERO,
            user_agent: USER_AGENT.to_string(),
            api_key: None,
        }
    }

    pub fn gbif() -> Self {
        Self::new(GBIF_URL)
    }

    pub fn inat() -> Self {
        // iNaturalist asks clients to stay around one request per second
        Self::new(INAT_URL)
            .with_concurrency(2)
            .with_min_interval(Duration::from_millis(500))
    }

    pub fn itis() -> Self {
        Self::new(ITIS_URL).with_concurrency(4)
    }

    pub fn wikidata() -> Self {
        Self::new(WIKIDATA_URL)
            .with_concurrency(1)
            .with_timeout(Duration::from_secs(60))
            .with_min_interval(Duration::from_millis(defaults::WIKIDATA_DELAY_MS))
    }

    pub fn plantbook() -> Self {
        Self::new(PLANTBOOK_URL)
            .with_concurrency(1)
            .with_timeout(Duration::from_secs(20))
            .with_min_interval(Duration::from_millis(defaults::PLANTBOOK_DELAY_MS))
    }

    /// Overlay environment variables named `{PREFIX}_*` on top of `self`.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `{PREFIX}_BASE_URL` | Registry base URL |
    /// | `{PREFIX}_TIMEOUT_SECS` | Per-request timeout |
    /// | `{PREFIX}_MAX_RETRIES` | Retries on 429/5xx/transport errors |
    /// | `{PREFIX}_CONCURRENCY` | Concurrent in-flight requests |
    /// | `{PREFIX}_MIN_INTERVAL_MS` | Minimum delay between requests |
    /// | `{PREFIX}_API_KEY` | API key, when the registry takes one |
    /// | `TAXA_USER_AGENT` | User agent for every registry |
    pub fn overlay_env(self, prefix: &str) -> Self {
        let var = |name: &str| {
            std::env::var(format!("{prefix}_{name}"))
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let num = |name: &str| var(name).and_then(|v| v.parse::<u64>().ok());

        let mut config = self;
        if let Some(url) = var("BASE_URL") {
            config = config.with_base_url(url);
        }
        if let Some(secs) = num("TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(retries) = num("MAX_RETRIES") {
            config.max_retries = retries as u32;
        }
        if let Some(n) = num("CONCURRENCY") {
            config = config.with_concurrency(n as usize);
        }
        if let Some(ms) = num("MIN_INTERVAL_MS") {
            config.min_interval = Duration::from_millis(ms);
        }
        if let Some(key) = var("API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(agent) = std::env::var("TAXA_USER_AGENT") {
            if !agent.trim().is_empty() {
                config.user_agent = agent.trim().to_string();
            }
        }
        config
    }

    pub fn gbif_from_env() -> Self {
        Self::gbif().overlay_env("GBIF")
    }

    pub fn inat_from_env() -> Self {
        Self::inat().overlay_env("INAT")
    }

    pub fn itis_from_env() -> Self {
        Self::itis().overlay_env("ITIS")
    }

    pub fn wikidata_from_env() -> Self {
        Self::wikidata().overlay_env("WIKIDATA")
    }

    pub fn plantbook_from_env() -> Self {
        Self::plantbook().overlay_env("PLANTBOOK")
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Delay before retry `attempt` (1-based), doubling and capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}
