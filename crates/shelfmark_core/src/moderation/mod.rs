//! Moderation of user-submitted text
//!
//! Two layers run in order. The deterministic layer consults word lists and rejects
//! plain or disguised banned words; an allow-listed phrase approves the text outright.
//! Text that passes is sent to an AI classifier, which fails open.
use crate::ai::{CompletionService, strip_code_blocks};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod filter;
pub mod wordlist;

use filter::{DeterministicFilter, Screening};

pub const INAPPROPRIATE_LANGUAGE: &str = "contains inappropriate language";
const AI_REJECTION: &str = "flagged by content review";

const SYSTEM_INSTRUCTION: &str = "You review short texts that users of a book community \
    want to publish, such as reviews, shelf names and profile descriptions. Reject hate \
    speech, harassment, sexual content and spam. Criticism of books is allowed. Respond \
    with JSON only, exactly in the form {\"approved\": true or false, \"reason\": \"short \
    reason\"}.";

/// The layer that produced a verdict.
#[non_exhaustive]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Nothing to check.
    None,
    Deterministic,
    Ai,
}

/// Outcome of [`Moderator::moderate`].
#[non_exhaustive]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModerationVerdict {
    pub approved: bool,
    pub reason: String,
    pub layer: Layer,
}

impl ModerationVerdict {
    fn approve(layer: Layer, reason: &str) -> Self {
        Self {
            approved: true,
            reason: reason.to_owned(),
            layer,
        }
    }

    fn reject(layer: Layer, reason: &str) -> Self {
        Self {
            approved: false,
            reason: reason.to_owned(),
            layer,
        }
    }
}

#[derive(Deserialize)]
struct AiVerdict {
    approved: bool,
    #[serde(default)]
    reason: String,
}

/// Gatekeeper for user text, run before anything is persisted.
#[derive(Clone)]
pub struct Moderator {
    filter: DeterministicFilter,
    ai: Option<Arc<dyn CompletionService>>,
}

impl core::fmt::Debug for Moderator {
    #[inline]
    fn fmt(&self, formatter: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        formatter
            .debug_struct("Moderator")
            .field("filter", &self.filter)
            .field("ai", &self.ai.is_some())
            .finish()
    }
}

impl Moderator {
    #[must_use]
    #[inline]
    pub fn new(filter: DeterministicFilter, ai: Option<Arc<dyn CompletionService>>) -> Self {
        Self { filter, ai }
    }

    /// Judges `text`. The first rejecting layer decides; AI trouble approves.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn moderate(&self, text: &str) -> ModerationVerdict {
        if text.trim().is_empty() {
            return ModerationVerdict::approve(Layer::None, "");
        }

        match self.filter.screen(text) {
            Screening::Allowed => {
                return ModerationVerdict::approve(Layer::Deterministic, "allow-listed phrase");
            }
            Screening::Rejected => {
                info!("Rejected text at the word-list layer");
                return ModerationVerdict::reject(Layer::Deterministic, INAPPROPRIATE_LANGUAGE);
            }
            Screening::Passed => {}
        }

        let Some(ai) = self.ai.as_ref() else {
            return ModerationVerdict::approve(Layer::Deterministic, "");
        };
        let answer = match ai.complete(SYSTEM_INSTRUCTION, text).await {
            Ok(answer) => answer,
            Err(error) => {
                warn!("Moderation service unavailable, approving: {error}");
                return ModerationVerdict::approve(Layer::Deterministic, "");
            }
        };
        match serde_json::from_str::<AiVerdict>(strip_code_blocks(&answer)) {
            Ok(verdict) if verdict.approved => {
                ModerationVerdict::approve(Layer::Ai, verdict.reason.trim())
            }
            Ok(verdict) => {
                let reason = verdict.reason.trim();
                info!("Rejected text at the AI layer: {reason}");
                ModerationVerdict::reject(
                    Layer::Ai,
                    if reason.is_empty() { AI_REJECTION } else { reason },
                )
            }
            Err(error) => {
                warn!("Unreadable moderation answer, approving: {error}");
                ModerationVerdict::approve(Layer::Deterministic, "")
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::moderation::wordlist::ModerationLists;
    use crate::testing::FakeCompletion;
    use pretty_assertions::assert_eq;

    fn moderator(ai: &Arc<FakeCompletion>) -> Moderator {
        let filter = DeterministicFilter::new(&ModerationLists::default()).unwrap();
        Moderator::new(filter, Some(Arc::clone(ai) as Arc<dyn CompletionService>))
    }

    #[tokio::test]
    async fn blank_text_needs_no_check() {
        let ai = Arc::new(FakeCompletion::replying(["{}"]));
        let verdict = moderator(&ai).moderate(" \n\t").await;
        assert_eq!(verdict, ModerationVerdict::approve(Layer::None, ""));
        assert_eq!(ai.calls(), 0);
    }

    #[tokio::test]
    async fn allow_listed_text_skips_the_ai() {
        let ai = Arc::new(FakeCompletion::replying([r#"{"approved": false}"#]));
        let verdict = moderator(&ai).moderate("Moby Dick is a classic").await;
        assert!(verdict.approved);
        assert_eq!(verdict.layer, Layer::Deterministic);
        assert_eq!(ai.calls(), 0);
    }

    #[tokio::test]
    async fn disguised_profanity_never_reaches_the_ai() {
        let ai = Arc::new(FakeCompletion::replying([r#"{"approved": true}"#]));
        let verdict = moderator(&ai).moderate("f u c k this book").await;
        assert_eq!(
            verdict,
            ModerationVerdict::reject(Layer::Deterministic, INAPPROPRIATE_LANGUAGE)
        );
        assert_eq!(ai.calls(), 0);
    }

    #[tokio::test]
    async fn ai_rejection_carries_its_reason() {
        let ai = Arc::new(FakeCompletion::replying([
            "```json\n{\"approved\": false, \"reason\": \"harassment\"}\n```",
        ]));
        let verdict = moderator(&ai).moderate("You should be ashamed, reader").await;
        assert_eq!(verdict, ModerationVerdict::reject(Layer::Ai, "harassment"));
        assert_eq!(ai.calls(), 1);
    }

    #[tokio::test]
    async fn ai_approval_is_reported_as_ai() {
        let ai = Arc::new(FakeCompletion::replying([
            r#"{"approved": true, "reason": "book criticism"}"#,
        ]));
        let verdict = moderator(&ai).moderate("The middle third drags").await;
        assert_eq!(verdict, ModerationVerdict::approve(Layer::Ai, "book criticism"));
    }

    #[tokio::test]
    async fn ai_failures_fail_open() {
        let garbled = Arc::new(FakeCompletion::replying(["I think this is fine!"]));
        assert!(moderator(&garbled).moderate("Lovely prose").await.approved);

        let down = Arc::new(FakeCompletion::failing());
        let verdict = moderator(&down).moderate("Lovely prose").await;
        assert_eq!(verdict, ModerationVerdict::approve(Layer::Deterministic, ""));
        assert_eq!(down.calls(), 1);
    }

    #[tokio::test]
    async fn without_ai_the_word_lists_decide() {
        let filter = DeterministicFilter::new(&ModerationLists::default()).unwrap();
        let moderator = Moderator::new(filter, None);
        assert!(moderator.moderate("Lovely prose").await.approved);
        assert!(!moderator.moderate("sh1t prose").await.approved);
    }
}
