/// Title keywords that mark a record as a bundle or placeholder rather than a single book.
pub const REJECTED_TITLE_KEYWORDS: &[&str] = &[
    "collection",
    "boxset",
    "box set",
    "anthology",
    "untitled",
    "complete works",
];

/// Subject tags that describe library logistics, not what the book is about.
pub const GENRE_DENY_LIST: &[&str] = &[
    "accessible book",
    "protected daisy",
    "in library",
    "lending library",
    "large type books",
    "internet archive wishlist",
    "overdrive",
    "open library staff picks",
    "new york times bestseller",
    "nyt:",
    "reading level",
    "long now manual for civilization",
    "translations into",
    "readers",
    "textbooks",
    "etext",
];

/// Tunables of the reconciliation engine, kept as data so lists can be extended
/// without touching the matching code.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Shorter titles (in characters, after trimming) are never inserted.
    pub min_title_len: usize,
    pub rejected_keywords: Vec<String>,
    pub genre_deny_list: Vec<String>,
    pub max_genres: usize,
    pub default_language: String,
}

impl Default for ReconcilePolicy {
    #[inline]
    fn default() -> Self {
        Self {
            min_title_len: 3,
            rejected_keywords: REJECTED_TITLE_KEYWORDS
                .iter()
                .map(|&keyword| keyword.to_owned())
                .collect(),
            genre_deny_list: GENRE_DENY_LIST
                .iter()
                .map(|&tag| tag.to_owned())
                .collect(),
            max_genres: 5,
            default_language: "en".to_owned(),
        }
    }
}

impl ReconcilePolicy {
    /// Adds keywords on top of the defaults, ignoring blanks and duplicates.
    #[must_use]
    #[inline]
    pub fn with_extra_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !self.rejected_keywords.contains(&keyword) {
                self.rejected_keywords.push(keyword);
            }
        }
        self
    }

    /// True if a title with no existing match must not become a new canonical record.
    #[must_use]
    #[inline]
    pub fn rejects_title(&self, title: &str) -> bool {
        let trimmed = title.trim();
        if trimmed.chars().count() < self.min_title_len {
            return true;
        }
        let lowered = trimmed.to_lowercase();
        self.rejected_keywords
            .iter()
            .any(|keyword| lowered.contains(keyword.as_str()))
    }

    #[must_use]
    #[inline]
    pub fn is_denied_genre(&self, genre: &str) -> bool {
        let lowered = genre.to_lowercase();
        self.genre_deny_list
            .iter()
            .any(|tag| lowered.contains(tag.as_str()))
    }

    /// Trims, drops administrative tags and case-insensitive duplicates, and caps the
    /// list. Earlier entries win.
    #[must_use]
    #[inline]
    pub fn filter_genres<'a, I>(&self, genres: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut kept: Vec<String> = Vec::new();
        for genre in genres {
            if kept.len() >= self.max_genres {
                break;
            }
            let genre = genre.trim();
            if genre.is_empty() || self.is_denied_genre(genre) {
                continue;
            }
            if kept
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(genre))
            {
                continue;
            }
            kept.push(genre.to_owned());
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_short_and_bundle_titles() {
        let policy = ReconcilePolicy::default();
        assert!(policy.rejects_title("It"));
        assert!(policy.rejects_title("  Ab "));
        assert!(policy.rejects_title("The Complete Sherlock Holmes Collection"));
        assert!(policy.rejects_title("Untitled Sequel"));
        assert!(policy.rejects_title("Dune Boxset"));
        assert!(!policy.rejects_title("Dune"));
    }

    #[test]
    fn extra_keywords_extend_defaults() {
        let policy = ReconcilePolicy::default().with_extra_keywords(["Omnibus", " ", "anthology"]);
        assert!(policy.rejects_title("The Culture Omnibus"));
        assert_eq!(
            policy
                .rejected_keywords
                .iter()
                .filter(|keyword| keyword.as_str() == "anthology")
                .count(),
            1
        );
    }

    #[test]
    fn genres_are_filtered_deduplicated_and_capped() {
        let policy = ReconcilePolicy::default();
        let genres = policy.filter_genres([
            "Science Fiction",
            "Accessible book",
            "science fiction",
            "nyt:hardcover-fiction=2008-01-01",
            "Ecology",
            "Deserts",
            "Politics",
            "Religion",
            "Messiahs",
        ]);
        assert_eq!(
            genres,
            vec!["Science Fiction", "Ecology", "Deserts", "Politics", "Religion"]
        );
    }
}
