use serde::{Deserialize, Serialize};

/// Where a candidate record came from. Decides which external identifier slot its key
/// fills on the canonical record.
#[non_exhaustive]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    OpenLibrary,
    Gutenberg,
    Local,
}

/// An unreconciled book description as produced by one source adapter.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub source: Source,
    /// Source-specific key, e.g. `OL45804W` or a Gutenberg ebook number.
    pub external_key: Option<String>,
    pub title: String,
    pub author_names: Vec<String>,
    /// Every identifier the source listed, unclassified.
    pub isbns: Vec<String>,
    pub subjects: Vec<String>,
    pub cover_url: Option<String>,
    /// Raw date text as the provider spelled it.
    pub publish_date: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub page_count: Option<i64>,
}

impl CandidateRecord {
    /// A candidate that only knows its title and source. Adapters fill in the rest.
    #[must_use]
    #[inline]
    pub fn new(source: Source, title: impl Into<String>) -> Self {
        Self {
            source,
            external_key: None,
            title: title.into(),
            author_names: Vec::new(),
            isbns: Vec::new(),
            subjects: Vec::new(),
            cover_url: None,
            publish_date: None,
            description: None,
            language: None,
            page_count: None,
        }
    }

    #[must_use]
    #[inline]
    pub fn with_external_key(mut self, key: impl Into<String>) -> Self {
        self.external_key = Some(key.into());
        self
    }

    #[must_use]
    #[inline]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    #[inline]
    pub fn with_isbns<I, S>(mut self, isbns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.isbns = isbns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    #[inline]
    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.author_names = authors.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    #[inline]
    pub fn with_cover(mut self, cover_url: impl Into<String>) -> Self {
        self.cover_url = Some(cover_url.into());
        self
    }
}

/// An unreconciled author description.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorCandidate {
    pub name: String,
    pub birth_year: Option<i64>,
    pub death_year: Option<i64>,
    pub biography: Option<String>,
    pub image_url: Option<String>,
    /// Structured API author key, e.g. `OL23919A`.
    pub external_key: Option<String>,
}

impl AuthorCandidate {
    #[must_use]
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    #[inline]
    pub const fn with_birth_year(mut self, year: i64) -> Self {
        self.birth_year = Some(year);
        self
    }

    #[must_use]
    #[inline]
    pub fn with_external_key(mut self, key: impl Into<String>) -> Self {
        self.external_key = Some(key.into());
        self
    }
}

/// One entry of an author's works listing, enough to decide whether the full record
/// needs fetching.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSummary {
    pub key: String,
    pub title: String,
}

impl WorkSummary {
    #[must_use]
    #[inline]
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
        }
    }
}

/// One page of an author's works listing. `entry_count` counts every entry the
/// provider returned, including those too incomplete to become a [`WorkSummary`];
/// paging advances by it.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorksPage {
    pub works: Vec<WorkSummary>,
    pub entry_count: usize,
}

impl WorksPage {
    #[must_use]
    #[inline]
    pub const fn new(works: Vec<WorkSummary>, entry_count: usize) -> Self {
        Self { works, entry_count }
    }
}

/// One search result: the book plus whatever the source knows about its authors.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub book: CandidateRecord,
    pub authors: Vec<AuthorCandidate>,
}

impl SearchHit {
    #[must_use]
    #[inline]
    pub const fn new(book: CandidateRecord, authors: Vec<AuthorCandidate>) -> Self {
        Self { book, authors }
    }

    /// A hit whose authors are only known by the names listed on the book.
    #[must_use]
    #[inline]
    pub fn from_book(book: CandidateRecord) -> Self {
        let authors = book
            .author_names
            .iter()
            .map(|name| AuthorCandidate::new(name.as_str()))
            .collect();
        Self { book, authors }
    }
}
