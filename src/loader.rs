use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::settings::Settings;

/// A fetched HTML document.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub body: String,
    pub latency_ms: i64,
}

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError>;
}

/// reqwest-backed loader with a shared pacing gate and retry on transient errors.
pub struct HttpLoader {
    client: reqwest::Client,
    delay: Duration,
    max_retries: u32,
    backoff: Duration,
    next_request: Mutex<Instant>,
}

impl HttpLoader {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_str(&settings.accept_language)?);

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .timeout(settings.timeout())
            .build()?;

        Ok(Self {
            client,
            delay: Duration::from_millis(settings.request_delay_ms),
            max_retries: settings.max_retries,
            backoff: Duration::from_millis(settings.backoff_ms),
            next_request: Mutex::new(Instant::now()),
        })
    }

    /// Wait for the gate, then push it forward by one delay.
    async fn pace(&self) {
        let mut next = self.next_request.lock().await;
        tokio::time::sleep_until(*next).await;
        *next = Instant::now() + self.delay;
    }

    async fn fetch_once(&self, url: &str) -> Result<Page, FetchError> {
        self.pace().await;
        let start = std::time::Instant::now();

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.text().await.map_err(|e| request_error(url, e))?;

        Ok(Page {
            url: url.to_string(),
            body,
            latency_ms: start.elapsed().as_millis() as i64,
        })
    }
}

/// `base * 2^attempt`, saturating instead of overflowing on large retry counts.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn request_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl DocumentLoader for HttpLoader {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(page) => {
                    debug!("GET {} ({} bytes, {}ms)", url, page.body.len(), page.latency_ms);
                    return Ok(page);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = backoff_delay(self.backoff, attempt);
                    attempt += 1;
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// In-memory loader for tests: URL to body, or to a fetch error.
#[cfg(test)]
pub struct StaticLoader {
    pub pages: std::collections::HashMap<String, Result<String, FetchError>>,
}

#[cfg(test)]
#[async_trait]
impl DocumentLoader for StaticLoader {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        match self.pages.get(url) {
            Some(Ok(body)) => Ok(Page {
                url: url.to_string(),
                body: body.clone(),
                latency_ms: 0,
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
