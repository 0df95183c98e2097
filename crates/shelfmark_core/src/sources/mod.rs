//! External book sources
//!
//! Adapters that turn provider responses into [`candidate::CandidateRecord`]s: a
//! structured bibliographic API and a scraped ebook catalog. Both degrade to empty
//! results on malformed input so that ingestion carries on with partial data.
use async_trait::async_trait;

pub mod candidate;
pub mod client;
pub mod errors;
pub mod gutenberg;
pub mod language;
pub mod matching;
pub mod open_library;

use candidate::{AuthorCandidate, CandidateRecord, SearchHit, WorksPage};
use errors::SourceError;

/// A source that can enumerate an author's catalog and return full work records.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Authors matching `query`, best first. Empty on any failure.
    async fn search_authors(&self, query: &str, limit: usize) -> Vec<AuthorCandidate>;

    /// Full author record for `author_key`, if the source knows it.
    async fn author_detail(&self, author_key: &str) -> Option<AuthorCandidate>;

    /// One page of the author's works listing.
    async fn works_page(
        &self,
        author_key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<WorksPage, SourceError>;

    /// The full record of a work. `Ok(None)` when the work does not exist or its payload
    /// is unusable, `Err` when fetching failed and a later attempt may succeed.
    async fn work_detail(&self, work_key: &str) -> Result<Option<CandidateRecord>, SourceError>;
}

/// A source that answers free-text book searches with complete candidates.
#[async_trait]
pub trait BookSearch: Send + Sync {
    /// Hits for `query`, optionally narrowed to an author. Empty on any failure.
    async fn search(&self, query: &str, author: Option<&str>, limit: usize) -> Vec<SearchHit>;
}
