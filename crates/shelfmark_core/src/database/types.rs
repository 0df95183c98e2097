use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A canonical book row, the merged result of every source that described it.
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BookRecord {
    pub book_id: i64,
    pub title: String,
    pub normalized_title: String,
    pub open_library_key: Option<String>,
    pub gutenberg_id: Option<String>,
    pub isbn: Option<String>,
    /// Genres joined with `", "`, at most five.
    pub genres: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub language: String,
    pub page_count: Option<i64>,
    pub author_id: Option<i64>,
}

impl BookRecord {
    /// Genres as a list, in stored order.
    #[must_use]
    #[inline]
    pub fn genre_list(&self) -> Vec<String> {
        self.genres
            .as_deref()
            .map(|joined| {
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|genre| !genre.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A canonical author row.
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AuthorRecord {
    pub author_id: i64,
    pub name: String,
    pub biography: Option<String>,
    pub birth_year: Option<i64>,
    pub death_year: Option<i64>,
    /// Only ever set by hand, ingestion leaves it untouched.
    pub nationality: Option<String>,
    pub image_url: Option<String>,
    pub open_library_key: Option<String>,
}

/// Display fields of a book as shown in recommendation lists and cached per user.
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct BookSummary {
    pub book_id: i64,
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub description: Option<String>,
    /// Mean of all user ratings at the time the summary was read.
    pub rating: Option<f64>,
}

impl BookSummary {
    #[must_use]
    #[inline]
    pub const fn new(
        book_id: i64,
        title: String,
        author: Option<String>,
        cover_url: Option<String>,
        description: Option<String>,
        rating: Option<f64>,
    ) -> Self {
        Self {
            book_id,
            title,
            author,
            cover_url,
            description,
            rating,
        }
    }

    #[must_use]
    #[inline]
    pub fn has_cover(&self) -> bool {
        self.cover_url
            .as_deref()
            .is_some_and(|cover| !cover.trim().is_empty())
    }

    #[must_use]
    #[inline]
    pub fn has_description(&self) -> bool {
        self.description
            .as_deref()
            .is_some_and(|description| !description.trim().is_empty())
    }
}

/// Shelf a user has put a book on.
#[non_exhaustive]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShelfStatus {
    WantToRead,
    CurrentlyReading,
    Completed,
}

impl ShelfStatus {
    #[must_use]
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WantToRead => "want_to_read",
            Self::CurrentlyReading => "currently_reading",
            Self::Completed => "completed",
        }
    }
}

/// Raw row of the per-user recommendation cache.
#[non_exhaustive]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CacheRow {
    pub user_id: String,
    /// JSON array of [`BookSummary`].
    pub entries: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn summary_flags_ignore_blank_strings() {
        let summary = BookSummary::new(
            1,
            "Dune".to_owned(),
            None,
            Some("  ".to_owned()),
            Some("A desert planet".to_owned()),
            None,
        );
        assert!(!summary.has_cover());
        assert!(summary.has_description());
    }

    #[test]
    fn status_strings_match_schema() {
        assert_eq!(ShelfStatus::CurrentlyReading.as_str(), "currently_reading");
        assert_eq!(ShelfStatus::Completed.as_str(), "completed");
    }
}
