use crate::database::queries::author_catalog;
use crate::reconcile::engine::Reconciler;
use crate::reconcile::errors::ReconcileError;
use crate::reconcile::normalize::normalize_title;
use crate::sources::CatalogSource;
use crate::sources::candidate::{CandidateRecord, WorkSummary};
use crate::sources::errors::SourceError;
use core::time::Duration;
use futures::stream::{self, StreamExt as _};
use log::{info, warn};
use std::collections::HashSet;
use tokio::time::sleep;

pub const PAGE_SIZE: usize = 50;
pub const MAX_WORKS: usize = 500;
pub const BATCH_DELAY: Duration = Duration::from_millis(500);

/// Knobs of [`Reconciler::fetch_all_works`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFetchOptions {
    /// Works requested per listing page. A shorter page ends the listing.
    pub page_size: usize,
    /// Hard cap on listed works.
    pub max_works: usize,
    /// Pause after each batch is persisted.
    pub batch_delay: Duration,
}

impl Default for BulkFetchOptions {
    #[inline]
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_works: MAX_WORKS,
            batch_delay: BATCH_DELAY,
        }
    }
}

/// Counts of what happened to each listed work.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkFetchReport {
    pub listed: usize,
    /// Already stored for the author by key or normalized title, never fetched.
    pub skipped_existing: usize,
    pub fetched: usize,
    /// Fetches that failed twice or returned nothing, and persistence failures.
    pub failed: usize,
    pub persisted: usize,
    /// Fetched but turned away by the title policy.
    pub rejected: usize,
}

/// Worker count and batch size for a catalog of a given size.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPlan {
    pub workers: usize,
    pub batch_size: usize,
}

impl ConcurrencyPlan {
    /// Larger catalogs get more workers and bigger batches, within provider-friendly
    /// limits.
    #[must_use]
    #[inline]
    pub const fn for_catalog(total: usize) -> Self {
        if total <= 20 {
            Self {
                workers: 3,
                batch_size: 10,
            }
        } else if total <= 100 {
            Self {
                workers: 5,
                batch_size: 20,
            }
        } else {
            Self {
                workers: 8,
                batch_size: 40,
            }
        }
    }

    /// Concurrency of the second pass over failed fetches.
    #[must_use]
    #[inline]
    pub const fn retry_workers(&self) -> usize {
        let halved = self.workers / 2;
        if halved == 0 { 1 } else { halved }
    }
}

type Fetched = (WorkSummary, Result<Option<CandidateRecord>, SourceError>);

/// Fetches every work's detail with at most `workers` requests in flight. Results come
/// back in listing order.
async fn fetch_details(
    source: &dyn CatalogSource,
    works: Vec<WorkSummary>,
    workers: usize,
) -> Vec<Fetched> {
    let mut results: Vec<(usize, Fetched)> = stream::iter(works.into_iter().enumerate().map(
        |(index, work)| async move {
            let detail = source.work_detail(&work.key).await;
            (index, (work, detail))
        },
    ))
    .buffer_unordered(workers.max(1))
    .collect()
    .await;
    results.sort_unstable_by_key(|&(index, _)| index);
    results.into_iter().map(|(_, fetched)| fetched).collect()
}

impl Reconciler {
    /// Walks an author's whole works listing, fetches the works not stored yet and
    /// reconciles them under `author_id`.
    ///
    /// Fetches run concurrently per batch, writes run one at a time after each batch.
    /// Failed fetches get one more try at half concurrency once all batches are done.
    /// Individual failures only show up in the report.
    /// # Errors
    /// Fails when the first listing page cannot be fetched or the stored catalog
    /// cannot be read.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn fetch_all_works(
        &self,
        source: &dyn CatalogSource,
        author_key: &str,
        author_id: i64,
        options: &BulkFetchOptions,
    ) -> Result<BulkFetchReport, ReconcileError> {
        let mut report = BulkFetchReport::default();
        let listing = list_works(source, author_key, options).await?;
        report.listed = listing.len();

        let stored = author_catalog(self.db().pool(), author_id).await?;
        let stored_keys: HashSet<String> = stored.iter().filter_map(|(key, _)| key.clone()).collect();
        let stored_titles: HashSet<&str> = stored.iter().map(|(_, title)| title.as_str()).collect();

        let mut seen_keys = HashSet::new();
        let pending: Vec<WorkSummary> = listing
            .into_iter()
            .filter(|work| {
                let known = stored_keys.contains(&work.key)
                    || stored_titles.contains(normalize_title(&work.title).as_str())
                    || !seen_keys.insert(work.key.clone());
                if known {
                    report.skipped_existing = report.skipped_existing.saturating_add(1);
                }
                !known
            })
            .collect();

        let plan = ConcurrencyPlan::for_catalog(pending.len());
        info!(
            "Fetching {} of {} works for author {author_key} with {} workers",
            pending.len(),
            report.listed,
            plan.workers
        );

        let batch_count = pending.len().div_ceil(plan.batch_size);
        let mut retry = Vec::new();
        for (index, batch) in pending.chunks(plan.batch_size).enumerate() {
            let results = fetch_details(source, batch.to_vec(), plan.workers).await;
            for (work, result) in results {
                match result {
                    Err(error) => {
                        warn!("Fetching work {} failed, will retry: {error}", work.key);
                        retry.push(work);
                    }
                    Ok(detail) => self.persist(&work, detail, author_id, &mut report).await,
                }
            }
            if index.saturating_add(1) < batch_count {
                sleep(options.batch_delay).await;
            }
        }

        if !retry.is_empty() {
            info!("Retrying {} failed works for author {author_key}", retry.len());
            let results = fetch_details(source, retry, plan.retry_workers()).await;
            for (work, result) in results {
                match result {
                    Err(error) => {
                        warn!("Dropping work {} after retry: {error}", work.key);
                        report.failed = report.failed.saturating_add(1);
                    }
                    Ok(detail) => self.persist(&work, detail, author_id, &mut report).await,
                }
            }
        }

        info!("Bulk fetch for author {author_key} finished: {report:?}");
        Ok(report)
    }

    async fn persist(
        &self,
        work: &WorkSummary,
        detail: Option<CandidateRecord>,
        author_id: i64,
        report: &mut BulkFetchReport,
    ) {
        let Some(candidate) = detail else {
            warn!("Work {} has no usable record, dropping", work.key);
            report.failed = report.failed.saturating_add(1);
            return;
        };
        report.fetched = report.fetched.saturating_add(1);
        match self.reconcile(&candidate, Some(author_id)).await {
            Ok(Some(_)) => report.persisted = report.persisted.saturating_add(1),
            Ok(None) => report.rejected = report.rejected.saturating_add(1),
            Err(error) => {
                warn!("Persisting work {} failed: {error}", work.key);
                report.failed = report.failed.saturating_add(1);
            }
        }
    }
}

/// Pages through the listing until a short page or the cap. A failing later page ends
/// the listing with what was gathered so far.
async fn list_works(
    source: &dyn CatalogSource,
    author_key: &str,
    options: &BulkFetchOptions,
) -> Result<Vec<WorkSummary>, ReconcileError> {
    let page_size = options.page_size.max(1);
    let mut works: Vec<WorkSummary> = Vec::new();
    let mut offset = 0;
    while works.len() < options.max_works {
        let page = match source.works_page(author_key, page_size, offset).await {
            Ok(page) => page,
            Err(error) if offset == 0 => return Err(error.into()),
            Err(error) => {
                warn!("Works listing for {author_key} stopped at offset {offset}: {error}");
                break;
            }
        };
        let short = page.entry_count < page_size;
        offset = offset.saturating_add(page.entry_count);
        let room = options.max_works.saturating_sub(works.len());
        works.extend(page.works.into_iter().take(room));
        if short {
            break;
        }
    }
    Ok(works)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::database::queries::{Db, count_books};
    use crate::reconcile::policy::ReconcilePolicy;
    use crate::sources::candidate::{AuthorCandidate, Source};
    use crate::testing::FakeCatalog;
    use core::sync::atomic::Ordering;
    use pretty_assertions::assert_eq;

    fn options(page_size: usize) -> BulkFetchOptions {
        BulkFetchOptions {
            page_size,
            max_works: MAX_WORKS,
            batch_delay: Duration::ZERO,
        }
    }

    #[test]
    fn concurrency_scales_with_catalog_size() {
        let plan = |total| {
            let plan = ConcurrencyPlan::for_catalog(total);
            (plan.workers, plan.batch_size, plan.retry_workers())
        };
        assert_eq!(plan(0), (3, 10, 1));
        assert_eq!(plan(20), (3, 10, 1));
        assert_eq!(plan(21), (5, 20, 2));
        assert_eq!(plan(100), (5, 20, 2));
        assert_eq!(plan(101), (8, 40, 4));
    }

    #[tokio::test]
    async fn listing_stops_at_short_page_and_cap() {
        let catalog = FakeCatalog::with_works(7);
        assert_eq!(
            list_works(&catalog, "OL1A", &options(3)).await.unwrap().len(),
            7
        );
        let capped = BulkFetchOptions {
            max_works: 4,
            ..options(3)
        };
        assert_eq!(list_works(&catalog, "OL1A", &capped).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn incomplete_entries_do_not_end_the_listing() {
        let mut catalog = FakeCatalog::with_works(7);
        catalog.incomplete.insert("OL1W".to_owned());
        let listed = list_works(&catalog, "OL1A", &options(3)).await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|work| work.key.as_str()).collect();
        assert_eq!(keys, vec!["OL0W", "OL2W", "OL3W", "OL4W", "OL5W", "OL6W"]);
    }

    #[tokio::test]
    async fn failing_first_page_is_an_error() {
        let catalog = FakeCatalog::with_works(3);
        catalog.listing_fails.store(true, Ordering::SeqCst);
        let result = list_works(&catalog, "OL1A", &options(3)).await;
        assert!(matches!(result, Err(ReconcileError::Source(_))));
    }

    #[tokio::test]
    async fn bulk_fetch_tolerates_partial_failure() {
        let db = Db::init_in_memory().await.unwrap();
        let reconciler = Reconciler::new(db, ReconcilePolicy::default());
        let author_id = reconciler
            .reconcile_author(&AuthorCandidate::new("Jane Doe"))
            .await
            .unwrap()
            .unwrap();
        let stored = CandidateRecord::new(Source::OpenLibrary, "Work number 0");
        reconciler.reconcile(&stored, Some(author_id)).await.unwrap();

        let mut catalog = FakeCatalog::with_works(8);
        catalog.fail_times("OL3W", 1);
        catalog.fail_times("OL4W", usize::MAX);
        catalog.details.remove("OL5W");
        catalog.rename("OL6W", "The Collection");

        let report = reconciler
            .fetch_all_works(&catalog, "OL1A", author_id, &options(3))
            .await
            .unwrap();

        assert_eq!(
            report,
            BulkFetchReport {
                listed: 8,
                skipped_existing: 1,
                fetched: 5,
                failed: 2,
                persisted: 4,
                rejected: 1,
            }
        );
        assert_eq!(count_books(reconciler.db().pool()).await.unwrap(), 5);
        // Seven pending works fetched once, two retried.
        assert_eq!(catalog.detail_calls.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn second_run_skips_everything_stored() {
        let db = Db::init_in_memory().await.unwrap();
        let reconciler = Reconciler::new(db, ReconcilePolicy::default());
        let author_id = reconciler
            .reconcile_author(&AuthorCandidate::new("Jane Doe"))
            .await
            .unwrap()
            .unwrap();
        let catalog = FakeCatalog::with_works(4);

        let first = reconciler
            .fetch_all_works(&catalog, "OL1A", author_id, &options(50))
            .await
            .unwrap();
        assert_eq!(first.persisted, 4);

        let second = reconciler
            .fetch_all_works(&catalog, "OL1A", author_id, &options(50))
            .await
            .unwrap();
        assert_eq!(second.skipped_existing, 4);
        assert_eq!(second.fetched, 0);
        assert_eq!(catalog.detail_calls.load(Ordering::SeqCst), 4);
    }
}
