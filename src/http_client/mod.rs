//! HTTP client shared by the capture index and memento fetchers.
//!
//! Transport failures (timeouts, refused connections) and gateway statuses
//! (429, 502, 503, 504) are retried with exponential backoff and full
//! jitter. Any other response is handed back to the caller, which decides
//! whether the status is permanent.

mod response;

pub use response::HttpResponse;

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

/// Default user agent for archive requests.
pub const USER_AGENT: &str = concat!("serpmine/", env!("CARGO_PKG_VERSION"));

/// Retry budget for one logical request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Full-jitter delay before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let cap = exp.min(self.backoff_max);
        let millis = cap.as_millis() as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..=millis))
    }
}

/// HTTP client with retry and backoff.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
    label: String,
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    label: String,
    timeout: Duration,
    user_agent: Option<String>,
    retry: RetryPolicy,
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn build(self) -> Result<HttpClient, reqwest::Error> {
        let client = Client::builder()
            .user_agent(self.user_agent.as_deref().unwrap_or(USER_AGENT))
            .timeout(self.timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(HttpClient {
            client,
            retry: self.retry,
            label: self.label,
        })
    }
}

impl HttpClient {
    /// `label` names the client in log lines.
    pub fn builder(label: &str, timeout: Duration) -> HttpClientBuilder {
        HttpClientBuilder {
            label: label.to_string(),
            timeout,
            user_agent: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// GET with retries. Returns the last response even when its status is
    /// still retryable after the budget is spent.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        let mut attempt = 0;
        loop {
            let result = self.client.get(url).send().await;
            let retryable = match &result {
                Ok(response) => response::is_retryable_status(response.status()),
                Err(e) => e.is_timeout() || e.is_connect(),
            };

            if !retryable || attempt >= self.retry.max_retries {
                return result.map(HttpResponse::from_reqwest);
            }

            let delay = self.retry.delay(attempt);
            match &result {
                Ok(response) => debug!(
                    "[{}] {} returned {}, retrying in {:?}",
                    self.label,
                    url,
                    response.status(),
                    delay
                ),
                Err(e) => warn!("[{}] {} failed: {}, retrying in {:?}", self.label, url, e, delay),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
