use crate::reconcile::bulk::{BulkFetchOptions, BulkFetchReport};
use crate::reconcile::engine::Reconciler;
use crate::reconcile::errors::ReconcileError;
use crate::sources::matching::author_matches;
use crate::sources::{BookSearch, CatalogSource};
use log::{info, warn};

/// How many author search results are considered when importing by name.
const AUTHOR_SEARCH_LIMIT: usize = 5;

/// Outcome of [`Reconciler::import_author_catalog`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorImport {
    pub author_id: i64,
    pub report: BulkFetchReport,
}

impl Reconciler {
    /// Finds an author by name, reconciles them and pulls in their whole catalog.
    /// Returns `None` when the source knows no such author.
    /// # Errors
    /// Fails when the canonical store fails or the works listing cannot be started.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn import_author_catalog(
        &self,
        source: &dyn CatalogSource,
        name: &str,
        options: &BulkFetchOptions,
    ) -> Result<Option<AuthorImport>, ReconcileError> {
        let found = source.search_authors(name, AUTHOR_SEARCH_LIMIT).await;
        let Some(best) = found
            .iter()
            .find(|author| author_matches(&author.name, name))
            .or_else(|| found.first())
        else {
            info!("No author found for {name:?}");
            return Ok(None);
        };

        let mut candidate = match best.external_key.as_deref() {
            Some(key) => source.author_detail(key).await.unwrap_or_else(|| best.clone()),
            None => best.clone(),
        };
        candidate.birth_year = candidate.birth_year.or(best.birth_year);
        candidate.death_year = candidate.death_year.or(best.death_year);
        if candidate.external_key.is_none() {
            candidate.external_key.clone_from(&best.external_key);
        }

        let Some(author_id) = self.reconcile_author(&candidate).await? else {
            return Ok(None);
        };
        let report = match candidate.external_key.as_deref() {
            Some(key) => self.fetch_all_works(source, key, author_id, options).await?,
            None => {
                warn!("Author {:?} has no catalog key, works not imported", candidate.name);
                BulkFetchReport::default()
            }
        };

        Ok(Some(AuthorImport { author_id, report }))
    }

    /// Searches `primary` and reconciles every hit with its first author. When `primary`
    /// finds nothing, `fallback` is searched instead. Returns the canonical ids in hit
    /// order, without repeats.
    /// # Errors
    /// Fails when the canonical store cannot be read or written.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn import_search(
        &self,
        primary: &dyn BookSearch,
        fallback: &dyn BookSearch,
        query: &str,
        author: Option<&str>,
        limit: usize,
    ) -> Result<Vec<i64>, ReconcileError> {
        let mut hits = primary.search(query, author, limit).await;
        if hits.is_empty() {
            info!("No primary results for {query:?}, searching the fallback catalog");
            hits = fallback.search(query, author, limit).await;
        }

        let mut book_ids = Vec::new();
        for hit in &hits {
            let author_id = match hit.authors.first() {
                Some(found) => self.reconcile_author(found).await?,
                None => None,
            };
            if let Some(book_id) = self.reconcile(&hit.book, author_id).await? {
                if !book_ids.contains(&book_id) {
                    book_ids.push(book_id);
                }
            }
        }
        Ok(book_ids)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::database::queries::{Db, count_books, fetch_author, fetch_book};
    use crate::reconcile::policy::ReconcilePolicy;
    use crate::sources::candidate::{AuthorCandidate, CandidateRecord, SearchHit, Source};
    use crate::testing::{FakeCatalog, FakeSearch};
    use core::sync::atomic::Ordering;
    use core::time::Duration;
    use pretty_assertions::assert_eq;

    async fn reconciler() -> Reconciler {
        Reconciler::new(
            Db::init_in_memory().await.unwrap(),
            ReconcilePolicy::default(),
        )
    }

    fn quick() -> BulkFetchOptions {
        BulkFetchOptions {
            batch_delay: Duration::ZERO,
            ..BulkFetchOptions::default()
        }
    }

    #[tokio::test]
    async fn author_catalog_import_uses_best_match() {
        let reconciler = reconciler().await;
        let mut catalog = FakeCatalog::with_works(3);
        catalog.authors = vec![
            AuthorCandidate::new("Brian Herbert").with_external_key("OL2A"),
            AuthorCandidate::new("Frank Herbert")
                .with_external_key("OL79034A")
                .with_birth_year(1920),
        ];

        let import = reconciler
            .import_author_catalog(&catalog, "Frank Herbert", &quick())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(import.report.persisted, 3);
        let author = fetch_author(reconciler.db().pool(), import.author_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(author.name, "Frank Herbert");
        assert_eq!(author.birth_year, Some(1920));
        assert_eq!(author.open_library_key.as_deref(), Some("OL79034A"));
    }

    #[tokio::test]
    async fn unknown_author_imports_nothing() {
        let reconciler = reconciler().await;
        let catalog = FakeCatalog::with_works(3);
        let import = reconciler
            .import_author_catalog(&catalog, "Nobody", &quick())
            .await
            .unwrap();
        assert_eq!(import, None);
        assert_eq!(catalog.detail_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn search_falls_back_when_primary_is_empty() {
        let reconciler = reconciler().await;
        let primary = FakeSearch::default();
        let moby = CandidateRecord::new(Source::Gutenberg, "Moby Dick; Or, The Whale")
            .with_external_key("2701")
            .with_authors(["Herman Melville"]);
        let fallback = FakeSearch::new(vec![SearchHit::new(
            moby,
            vec![AuthorCandidate::new("Herman Melville").with_birth_year(1819)],
        )]);

        let ids = reconciler
            .import_search(&primary, &fallback, "moby dick", Some("Melville"), 5)
            .await
            .unwrap();

        assert_eq!(ids.len(), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        let book = fetch_book(reconciler.db().pool(), *ids.first().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(book.gutenberg_id.as_deref(), Some("2701"));
        assert!(book.author_id.is_some());
    }

    #[tokio::test]
    async fn primary_hits_skip_fallback_and_collapse_duplicates() {
        let reconciler = reconciler().await;
        let dune = CandidateRecord::new(Source::OpenLibrary, "Dune")
            .with_external_key("OL893415W")
            .with_authors(["Frank Herbert"]);
        let dune_again = CandidateRecord::new(Source::OpenLibrary, "Dune.")
            .with_authors(["Frank Herbert"])
            .with_description("A desert planet...");
        let primary = FakeSearch::new(vec![
            SearchHit::from_book(dune),
            SearchHit::from_book(dune_again),
        ]);
        let fallback = FakeSearch::default();

        let ids = reconciler
            .import_search(&primary, &fallback, "dune", None, 10)
            .await
            .unwrap();

        assert_eq!(ids.len(), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
        assert_eq!(count_books(reconciler.db().pool()).await.unwrap(), 1);
    }
}
