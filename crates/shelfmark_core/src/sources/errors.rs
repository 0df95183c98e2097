use scraper::error::SelectorErrorKind;

/// Errors raised while talking to, or reading from, an external book source.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The request never produced a response, originating from `reqwest`.
    #[error("request failed: {0}")]
    Fetch(#[from] reqwest::Error),
    /// The provider kept answering 429 until retries ran out.
    #[error("rate limited by {url}")]
    RateLimited { url: String },
    /// The provider kept answering with a server error until retries ran out.
    #[error("server error {status} from {url}")]
    Server { url: String, status: u16 },
    /// A URL or markup selector could not be built.
    #[error("parse error: {0}")]
    Parse(String),
    /// The document was fetched but expected content was missing.
    #[error("scrape error: {0}")]
    Scrape(String),
    /// A response body was not the JSON it claimed to be.
    #[error("invalid JSON: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
impl From<SelectorErrorKind<'static>> for SourceError {
    fn from(error: SelectorErrorKind<'static>) -> Self {
        Self::Parse(error.to_string())
    }
}
