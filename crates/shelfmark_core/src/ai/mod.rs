//! Text completion services
//!
//! The recommendation pipeline and the moderation filter both treat the AI service as
//! a black box: a system instruction and a prompt go in, text comes out. Callers are
//! expected to survive any [`AiError`].
use async_trait::async_trait;

pub mod claude;

/// Failures of a completion call.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("request to the completion service failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion service answered {status}: {body}")]
    Api { status: u16, body: String },
    #[error("completion service returned no text")]
    EmptyResponse,
    #[error("API key is not a valid header value")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// A text-in, text-out completion call.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Completes `prompt` under the `system` instruction.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AiError>;
}

/// Removes a markdown code fence wrapped around a response.
#[must_use]
#[inline]
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn code_fences_are_removed() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  {}  "), "{}");
    }
}
