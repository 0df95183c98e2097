/// Name tokens too common to count as evidence that two author names match.
pub const IGNORED_NAME_TOKENS: &[&str] = &[
    "jr", "sr", "dr", "mr", "mrs", "ms", "sir", "lady", "lord", "the", "of", "and", "de", "von",
    "van",
];

/// Helper function to determine if two strings match, ignoring upper and lower case as well as
/// interpunctuations in initials.
#[must_use]
#[inline]
pub fn matches(haystack: &str, needle: &str) -> bool {
    let haystack = squash(haystack);
    let needle = squash(needle);
    !needle.is_empty() && haystack.contains(&needle)
}

/// Loose author comparison for scraped listings: true if the names share at least one
/// meaningful token, or if either contains the other once punctuation is ignored.
#[must_use]
#[inline]
pub fn author_matches(found: &str, wanted: &str) -> bool {
    if matches(found, wanted) || matches(wanted, found) {
        return true;
    }
    let found_tokens = name_tokens(found);
    name_tokens(wanted)
        .iter()
        .any(|token| found_tokens.contains(token))
}

fn name_tokens(name: &str) -> Vec<String> {
    name.split(|character: char| !character.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|token| token.chars().count() > 1 && !IGNORED_NAME_TOKENS.contains(&token.as_str()))
        .collect()
}

fn squash(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|character| character.is_alphanumeric())
        .collect()
}

/// Tries and extracts the numeric ebook id out of a catalog link such as
/// `/ebooks/2701` or `https://www.gutenberg.org/ebooks/2701?foo`.
#[must_use]
#[inline]
pub fn extract_ebook_id(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/ebooks/")?;
    let id = rest
        .split(['?', '/', '#'])
        .next()
        .unwrap_or("")
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    let complete = rest
        .get(id.len()..)
        .is_none_or(|tail| !tail.starts_with(char::is_alphanumeric));
    (!id.is_empty() && complete).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn matches_ignores_case_and_initial_punctuation() {
        assert!(matches("J. R. R. Tolkien", "jrr tolkien"));
        assert!(!matches("Tolkien", ""));
    }

    #[test]
    fn author_tokens_overlap() {
        assert!(author_matches("Melville, Herman", "Herman Melville"));
        assert!(author_matches("Austen, Jane, 1775-1817", "Jane Austen"));
        assert!(author_matches("H. G. Wells", "Wells"));
        assert!(!author_matches("Dickens, Charles", "Jane Austen"));
        assert!(!author_matches("Jr., Sammy Davis", "Jr. Harry Connick"));
    }

    #[test]
    fn ebook_ids_are_extracted_from_links() {
        assert_eq!(extract_ebook_id("/ebooks/2701"), Some("2701".to_owned()));
        assert_eq!(
            extract_ebook_id("https://www.gutenberg.org/ebooks/1342?lang=en"),
            Some("1342".to_owned())
        );
        assert_eq!(extract_ebook_id("/ebooks/search/?query=dune"), None);
        assert_eq!(extract_ebook_id("/ebooks/author/9"), None);
        assert_eq!(extract_ebook_id("/about"), None);
    }
}
