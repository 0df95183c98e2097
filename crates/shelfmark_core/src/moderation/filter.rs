use crate::moderation::wordlist::ModerationLists;
use regex::Regex;

/// Matches the edges of a disguised word: start or end of text, or any character
/// that is neither letter nor digit.
const EDGE_BEFORE: &str = r"(?:^|[^\p{L}\p{N}])";
const EDGE_AFTER: &str = r"(?:[^\p{L}\p{N}]|$)";
const SEPARATORS: &str = r"[\W_]+";

/// What the word lists say about a text.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screening {
    /// Contains an allow-listed phrase.
    Allowed,
    /// Contains a banned word, plain or disguised.
    Rejected,
    /// Nothing on any list.
    Passed,
}

/// Lower-cases and collapses all whitespace to single spaces.
#[must_use]
#[inline]
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds the pattern for one term: every letter may repeat or be swapped for a
/// look-alike symbol. Separators are only accepted when they split the term into
/// single letters, as in `f u c k`, so words that merely run into each other do not
/// match.
fn disguise_pattern(term: &str, lists: &ModerationLists) -> Option<String> {
    let letters: Vec<String> = term
        .to_lowercase()
        .chars()
        .filter(|character| character.is_alphanumeric())
        .map(|letter| {
            let members = format!("{letter}{}", lists.lookalikes_of(letter));
            format!("[{}]+", regex::escape(&members))
        })
        .collect();
    (!letters.is_empty()).then(|| {
        format!(
            "{EDGE_BEFORE}(?:{}|{}){EDGE_AFTER}",
            letters.concat(),
            letters.join(SEPARATORS)
        )
    })
}

/// The cheap first moderation layer, compiled from [`ModerationLists`].
#[derive(Debug, Clone)]
pub struct DeterministicFilter {
    allowed_phrases: Vec<String>,
    disguised: Vec<Regex>,
    banned_words: Option<Regex>,
}

impl DeterministicFilter {
    /// Compiles the lists into matchers.
    /// # Errors
    /// Fails if a generated pattern exceeds the regex engine's size limits.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per program run")]
    pub fn new(lists: &ModerationLists) -> Result<Self, regex::Error> {
        let allowed_phrases = lists
            .allowed_phrases
            .iter()
            .map(|phrase| normalize_text(phrase))
            .filter(|phrase| !phrase.is_empty())
            .collect();

        let disguised = lists
            .obfuscated_terms
            .iter()
            .filter_map(|term| disguise_pattern(term, lists))
            .map(|pattern| Regex::new(&pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let words: Vec<String> = lists
            .banned_words
            .iter()
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .map(|word| regex::escape(&word))
            .collect();
        let banned_words = if words.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(r"\b(?:{})\b", words.join("|")))?)
        };

        Ok(Self {
            allowed_phrases,
            disguised,
            banned_words,
        })
    }

    /// Screens `text`. Allow-listed phrases win over everything else.
    #[must_use]
    #[inline]
    pub fn screen(&self, text: &str) -> Screening {
        let normalized = normalize_text(text);
        if self
            .allowed_phrases
            .iter()
            .any(|phrase| normalized.contains(phrase.as_str()))
        {
            return Screening::Allowed;
        }
        let disguised = self
            .disguised
            .iter()
            .any(|pattern| pattern.is_match(&normalized));
        let plain = self
            .banned_words
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&normalized));
        if disguised || plain {
            Screening::Rejected
        } else {
            Screening::Passed
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
    use pretty_assertions::assert_eq;

    fn filter() -> DeterministicFilter {
        DeterministicFilter::new(&ModerationLists::default()).unwrap()
    }

    #[test]
    fn disguised_spellings_are_caught() {
        let filter = filter();
        for text in [
            "f u c k this book",
            "F.U.C.K this book",
            "fuuuuck",
            "what a pile of sh!t",
            "$h1t ending",
            "f*ck",
            "total b-i-t-c-h of a plot",
        ] {
            assert_eq!(filter.screen(text), Screening::Rejected, "{text}");
        }
    }

    #[test]
    fn whole_words_only() {
        let filter = filter();
        assert_eq!(filter.screen("This is bullshit"), Screening::Rejected);
        for text in [
            "A peacock on the cover",
            "Charles Dickens at his best",
            "Great cocktail party scenes",
            "Therapist recommended",
            "I loved the class discussion",
            "Assessment: brilliant",
            "It's hit or miss, but mostly hit",
            "Readers who're into fantasy will love it",
            "For people who re-read often",
            "Thanks, hit the spot",
        ] {
            assert_eq!(filter.screen(text), Screening::Passed, "{text}");
        }
    }

    #[test]
    fn allow_list_takes_precedence() {
        let filter = filter();
        assert_eq!(filter.screen("Moby Dick is a classic"), Screening::Allowed);
        assert_eq!(filter.screen("  PHILIP K.   DICK  "), Screening::Allowed);
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_text("  Hello\n\tWorld  "), "hello world");
    }

    #[test]
    fn empty_lists_pass_everything() {
        let lists = ModerationLists {
            allowed_phrases: Vec::new(),
            obfuscated_terms: Vec::new(),
            banned_words: Vec::new(),
            lookalikes: Vec::new(),
        };
        let filter = DeterministicFilter::new(&lists).unwrap();
        assert_eq!(filter.screen("fuck"), Screening::Passed);
    }
}
