use crate::sources::errors::SourceError;
use core::time::Duration;
use log::{debug, warn};
use reqwest::redirect::Policy;
use reqwest::{ClientBuilder, StatusCode, Url, header};
use serde_json::Value;
use tokio::time::sleep;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Timeout for search endpoints, which answer quickly or not at all.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for full-record and listing endpoints.
pub const DETAIL_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for scraped HTML pages, which are large and slow.
pub const SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Why an attempt is being repeated. Each reason has its own backoff curve.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    ServerError,
    Network,
}

/// How long to wait before the attempt after `attempt` (zero-based).
///
/// Rate limits back off exponentially up to 30s, server errors linearly up to 10s and
/// network failures linearly up to 5s.
#[must_use]
#[inline]
pub fn backoff_delay(reason: RetryReason, attempt: u32) -> Duration {
    let linear = u64::from(attempt).saturating_add(1);
    let seconds = match reason {
        RetryReason::RateLimited => 2_u64.saturating_pow(attempt).min(30),
        RetryReason::ServerError => linear.min(10),
        RetryReason::Network => linear.min(5),
    };
    Duration::from_secs(seconds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Success,
    Retry(RetryReason),
    /// Client errors other than 429. The resource is treated as absent.
    NoResult,
}

fn classify(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        StatusClass::Retry(RetryReason::RateLimited)
    } else if status.is_server_error() {
        StatusClass::Retry(RetryReason::ServerError)
    } else {
        StatusClass::NoResult
    }
}

/// Outbound HTTP client shared by every source adapter. Retries rate limits, server
/// errors and network failures with backoff; turns any other client error into "no
/// result".
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// A HTTP client used to execute all GET requests against external sources
    http_client: reqwest::Client,
    max_retries: u32,
}

impl HttpClient {
    /// Create a new HTTP request client, to be used for all subsequent source requests
    /// # Errors
    /// Fails in case any of the reqwest `ClientBuilder` methods fail
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per program run"
    )]
    pub fn new(user_agent: &str, max_retries: u32) -> Result<Self, SourceError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(
                "application/json,text/html,application/xhtml+xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.9"),
        );
        let http_client = ClientBuilder::new()
            .user_agent(user_agent)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            max_retries,
        })
    }

    /// GET `url` with query `params`, retrying transient failures.
    ///
    /// Returns `Ok(None)` when the provider answers with a client error other than 429.
    /// # Errors
    /// Fails when the URL is invalid, or when retries are exhausted. For network
    /// failures the last `reqwest` error is returned.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn request(
        &self,
        url: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Option<reqwest::Response>, SourceError> {
        let parsed = if params.is_empty() {
            Url::parse(url)
        } else {
            Url::parse_with_params(url, params)
        }
        .map_err(|err| SourceError::Parse(format!("invalid URL {url}: {err}")))?;

        let attempts = self.max_retries.max(1);
        let mut attempt: u32 = 0;
        loop {
            let last_attempt = attempt.saturating_add(1) >= attempts;
            let (reason, failure) = match self
                .http_client
                .get(parsed.clone())
                .timeout(timeout)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    match classify(status) {
                        StatusClass::Success => return Ok(Some(response)),
                        StatusClass::NoResult => {
                            debug!("{parsed} answered {status}, treating as no result");
                            return Ok(None);
                        }
                        StatusClass::Retry(reason) => {
                            let failure = if reason == RetryReason::RateLimited {
                                SourceError::RateLimited {
                                    url: parsed.to_string(),
                                }
                            } else {
                                SourceError::Server {
                                    url: parsed.to_string(),
                                    status: status.as_u16(),
                                }
                            };
                            (reason, failure)
                        }
                    }
                }
                Err(error) => (RetryReason::Network, SourceError::Fetch(error)),
            };

            if last_attempt {
                warn!("Giving up on {parsed} after {attempts} attempts: {failure}");
                return Err(failure);
            }

            let delay = backoff_delay(reason, attempt);
            warn!(
                "Attempt {} for {parsed} failed ({failure}), retrying in {}s",
                attempt.saturating_add(1),
                delay.as_secs()
            );
            sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Like [`Self::request`], decoding the body as JSON.
    /// # Errors
    /// Fails like [`Self::request`], or when the body is not valid JSON.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Option<Value>, SourceError> {
        let Some(response) = self.request(url, params, timeout).await? else {
            return Ok(None);
        };
        let body = response.text().await?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// Like [`Self::request`], returning the body as text.
    /// # Errors
    /// Fails like [`Self::request`], or when the body cannot be read.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn get_text(
        &self,
        url: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Option<String>, SourceError> {
        let Some(response) = self.request(url, params, timeout).await? else {
            return Ok(None);
        };
        Ok(Some(response.text().await?))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// Serves one canned status per connection, repeating the last one, and counts the
    /// requests it answered.
    async fn serve(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses
                    .get(index)
                    .or_else(|| statuses.last())
                    .copied()
                    .unwrap_or(500);
                let mut request: Vec<u8> = Vec::new();
                let mut buffer = [0_u8; 1024];
                while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                    match stream.read(&mut buffer).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend(buffer.iter().take(read)),
                    }
                }
                let body = r#"{"ok":true}"#;
                let response = format!(
                    "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                if stream.write_all(response.as_bytes()).await.is_ok() {
                    stream.shutdown().await.ok();
                }
            }
        });
        (format!("http://{address}/works.json"), requests)
    }

    fn seconds(reason: RetryReason) -> Vec<u64> {
        (0..7)
            .map(|attempt| backoff_delay(reason, attempt).as_secs())
            .collect()
    }

    #[test]
    fn rate_limit_backoff_is_exponential_and_capped() {
        assert_eq!(seconds(RetryReason::RateLimited), vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn server_and_network_backoff_are_linear_and_capped() {
        assert_eq!(seconds(RetryReason::ServerError), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(
            backoff_delay(RetryReason::ServerError, 20),
            Duration::from_secs(10)
        );
        assert_eq!(seconds(RetryReason::Network), vec![1, 2, 3, 4, 5, 5, 5]);
    }

    #[test]
    fn statuses_are_classified() {
        assert_eq!(classify(StatusCode::OK), StatusClass::Success);
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::Retry(RetryReason::RateLimited)
        );
        assert_eq!(
            classify(StatusCode::BAD_GATEWAY),
            StatusClass::Retry(RetryReason::ServerError)
        );
        assert_eq!(classify(StatusCode::NOT_FOUND), StatusClass::NoResult);
        assert_eq!(classify(StatusCode::FORBIDDEN), StatusClass::NoResult);
    }

    #[tokio::test]
    async fn network_failure_is_returned_after_last_attempt() {
        let client = HttpClient::new("shelfmark-tests", 1).unwrap();
        let result = client
            .request("http://127.0.0.1:9/", &[], Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(SourceError::Fetch(_))));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_until_success() {
        let (url, requests) = serve(vec![429, 200]).await;
        let client = HttpClient::new("shelfmark-tests", 3).unwrap();
        let body = client.get_json(&url, &[], SEARCH_TIMEOUT).await.unwrap();
        assert_eq!(body, Some(serde_json::json!({"ok": true})));
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_found_is_no_result_without_retry() {
        let (url, requests) = serve(vec![404]).await;
        let client = HttpClient::new("shelfmark-tests", 3).unwrap();
        let result = client.request(&url, &[("q", "dune")], SEARCH_TIMEOUT).await.unwrap();
        assert!(result.is_none());
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_is_returned_after_last_attempt() {
        let (url, requests) = serve(vec![503]).await;
        let client = HttpClient::new("shelfmark-tests", 2).unwrap();
        let result = client.get_text(&url, &[], SEARCH_TIMEOUT).await;
        assert!(matches!(result, Err(SourceError::Server { status: 503, .. })));
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_url_is_a_parse_error() {
        let client = HttpClient::new("shelfmark-tests", 1).unwrap();
        let result = client.request("not a url", &[], SEARCH_TIMEOUT).await;
        assert!(matches!(result, Err(SourceError::Parse(_))));
    }
}
