//! Retrying, paced, concurrency-limited HTTP client shared by the adapters.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

use taxa_core::{Error, Result};

use crate::config::RegistryConfig;

/// Calls slower than this are logged at WARN.
const SLOW_CALL: Duration = Duration::from_secs(5);

/// Statuses worth repeating after a pause.
pub fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Direct (unkeyed) limiter spacing calls to one registry.
type CallLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// One call per `interval`, no burst; None when calls need no spacing.
fn call_limiter(interval: Duration) -> Option<CallLimiter> {
    Quota::with_period(interval)
        .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)))
}

/// HTTP client for one registry.
///
/// `get_json` returns `Ok(None)` for a definitive miss (any non-retryable
/// status) and `Err(Error::Transient)` once retries are exhausted.
pub struct HttpClient {
    registry: &'static str,
    client: Client,
    config: RegistryConfig,
    permits: Semaphore,
    limiter: Option<CallLimiter>,
}

impl HttpClient {
    pub fn new(registry: &'static str, config: RegistryConfig) -> Result<Self> {
        Self::with_headers(registry, config, HeaderMap::new())
    }

    /// Client that sends `headers` on every request.
    pub fn with_headers(
        registry: &'static str,
        config: RegistryConfig,
        headers: HeaderMap,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        debug!(
            subsystem = "registry",
            component = registry,
            base_url = %config.base_url,
            concurrency = config.concurrency,
            min_interval_ms = config.min_interval.as_millis() as u64,
            "Registry client ready"
        );

        Ok(Self {
            registry,
            client,
            permits: Semaphore::new(config.concurrency.max(1)),
            limiter: call_limiter(config.min_interval),
            config,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Wait until `min_interval` has passed since the previous request.
    async fn pace(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// GET `path` with query parameters and decode the JSON body.
    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<JsonValue>> {
        let url = self.url(path);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.pace().await;

            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| Error::Internal(format!("{} request limiter closed", self.registry)))?;
            let start = Instant::now();
            let outcome = self.client.get(&url).query(query).send().await;
            let elapsed = start.elapsed();

            let reason = match outcome {
                Ok(response) if response.status().is_success() => {
                    let body = response.json::<JsonValue>().await.map_err(|e| {
                        Error::Registry(format!("{}: undecodable body from {}: {}", self.registry, path, e))
                    })?;
                    drop(permit);
                    if elapsed > SLOW_CALL {
                        warn!(
                            subsystem = "registry",
                            component = self.registry,
                            path,
                            duration_ms = elapsed.as_millis() as u64,
                            "Slow registry call"
                        );
                    } else {
                        trace!(
                            subsystem = "registry",
                            component = self.registry,
                            path,
                            duration_ms = elapsed.as_millis() as u64,
                            "Registry call ok"
                        );
                    }
                    return Ok(Some(body));
                }
                Ok(response) if is_retryable(response.status()) => {
                    format!("HTTP {}", response.status().as_u16())
                }
                Ok(response) => {
                    debug!(
                        subsystem = "registry",
                        component = self.registry,
                        path,
                        status = response.status().as_u16(),
                        "Registry miss"
                    );
                    return Ok(None);
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => e.to_string(),
                Err(e) => return Err(Error::from(e)),
            };
            drop(permit);

            if attempt > self.config.max_retries {
                warn!(
                    subsystem = "registry",
                    component = self.registry,
                    path,
                    attempt,
                    error = %reason,
                    "Registry retries exhausted"
                );
                return Err(Error::Transient(format!(
                    "{} {}: {} after {} attempts",
                    self.registry, path, reason, attempt
                )));
            }

            let delay = self.config.backoff_for(attempt);
            debug!(
                subsystem = "registry",
                component = self.registry,
                path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Retrying registry call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Build a one-entry header map, rejecting values that are not valid header text.
pub fn single_header(name: &'static str, value: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("Invalid {} header: {}", name, e)))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(headers)
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// First non-blank string among `keys`.
pub(crate) fn str_field<'a>(value: &'a JsonValue, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(JsonValue::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// First integer among `keys`, accepting numeric strings.
pub(crate) fn int_field(value: &JsonValue, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| match value.get(*k) {
        Some(JsonValue::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(JsonValue::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Array under `key`, or empty.
pub(crate) fn array_field<'a>(value: &'a JsonValue, keys: &[&str]) -> &'a [JsonValue] {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(JsonValue::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_statuses() {
        for code in [429u16, 500, 502, 503, 504] {
            assert!(is_retryable(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 404, 501] {
            assert!(!is_retryable(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_json_helpers() {
        let v = json!({"a": " ", "b": "Rosa", "n": "42", "m": 7, "list": [1, 2]});
        assert_eq!(str_field(&v, &["a", "b"]), Some("Rosa"));
        assert_eq!(str_field(&v, &["missing"]), None);
        assert_eq!(int_field(&v, &["n"]), Some(42));
        assert_eq!(int_field(&v, &["x", "m"]), Some(7));
        assert_eq!(array_field(&v, &["list"]).len(), 2);
        assert!(array_field(&v, &["a"]).is_empty());
    }

    #[test]
    fn test_call_limiter_only_for_nonzero_interval() {
        assert!(call_limiter(Duration::ZERO).is_none());
        let limiter = call_limiter(Duration::from_secs(60)).unwrap();
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_single_header_rejects_newlines() {
        assert!(single_header("x-api-key", "abc").is_ok());
        assert!(single_header("x-api-key", "a\nb").is_err());
    }
}
