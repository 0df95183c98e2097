use crate::database::queries::{
    Db, author_by_key, authors_named, books_with_normalized_title, insert_author, insert_book,
    update_author, update_book,
};
use crate::database::types::AuthorRecord;
use crate::reconcile::errors::ReconcileError;
use crate::reconcile::merge::{AuthorFields, BookFields};
use crate::reconcile::normalize::normalize_title;
use crate::reconcile::policy::ReconcilePolicy;
use crate::sources::candidate::{AuthorCandidate, CandidateRecord};
use log::{debug, info};

/// Decides insert-versus-merge for incoming candidates and writes the outcome to the
/// canonical store.
#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Db,
    policy: ReconcilePolicy,
}

impl Reconciler {
    #[must_use]
    #[inline]
    pub const fn new(db: Db, policy: ReconcilePolicy) -> Self {
        Self { db, policy }
    }

    #[must_use]
    #[inline]
    pub const fn db(&self) -> &Db {
        &self.db
    }

    #[must_use]
    #[inline]
    pub const fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Merges `candidate` into the canonical book it duplicates, or inserts it.
    ///
    /// Matches are books with the same normalized title, restricted to `author_id` when
    /// given. Every match and the candidate are folded into the oldest match, whose id
    /// is returned. Without a match the candidate is inserted unless the policy rejects
    /// its title, in which case `None` is returned.
    /// # Errors
    /// Fails when the canonical store cannot be read or written.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn reconcile(
        &self,
        candidate: &CandidateRecord,
        author_id: Option<i64>,
    ) -> Result<Option<i64>, ReconcileError> {
        let title = candidate.title.trim();
        let normalized = normalize_title(title);
        if normalized.is_empty() {
            info!("Rejected candidate with no usable title: {:?}", candidate.title);
            return Ok(None);
        }
        let incoming = BookFields::from_candidate(candidate, &self.policy);

        let mut tx = self.db.begin().await?;
        let matches = books_with_normalized_title(&mut *tx, &normalized, author_id).await?;

        let book_id = if let Some((first, rest)) = matches.split_first() {
            let mut merged = BookFields::from_record(first);
            for duplicate in rest {
                merged.merge(&BookFields::from_record(duplicate), &self.policy);
            }
            merged.merge(&incoming, &self.policy);
            update_book(&mut *tx, first.book_id, &merged, author_id).await?;
            debug!(
                "Merged {title:?} into book {} ({} existing matches)",
                first.book_id,
                matches.len()
            );
            Some(first.book_id)
        } else if self.policy.rejects_title(title) {
            info!("Rejected candidate {title:?} by title policy");
            None
        } else {
            let book_id = insert_book(
                &mut *tx,
                title,
                &normalized,
                &incoming,
                author_id,
                &self.policy.default_language,
            )
            .await?;
            debug!("Inserted {title:?} as book {book_id}");
            Some(book_id)
        };

        tx.commit().await?;
        Ok(book_id)
    }

    /// Merges `candidate` into the author it describes, or inserts it. Returns `None`
    /// for a blank name.
    ///
    /// An external key match wins. Otherwise namesakes (case-insensitive) are considered,
    /// but a known birth year must agree: two people sharing a name are never merged.
    /// # Errors
    /// Fails when the canonical store cannot be read or written.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn reconcile_author(
        &self,
        candidate: &AuthorCandidate,
    ) -> Result<Option<i64>, ReconcileError> {
        let name = candidate.name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let incoming = AuthorFields::from_candidate(candidate);

        let mut tx = self.db.begin().await?;
        let mut existing = match incoming.open_library_key.as_deref() {
            Some(key) => author_by_key(&mut *tx, key).await?,
            None => None,
        };
        if existing.is_none() {
            let namesakes = authors_named(&mut *tx, name).await?;
            existing = pick_namesake(namesakes, candidate.birth_year);
        }

        let author_id = if let Some(record) = existing {
            let current = AuthorFields::from_record(&record);
            let mut merged = current.clone();
            merged.merge(&incoming);
            if merged != current {
                update_author(&mut *tx, record.author_id, &merged).await?;
                debug!("Updated author {} ({name})", record.author_id);
            }
            record.author_id
        } else {
            let author_id = insert_author(&mut *tx, name, &incoming).await?;
            debug!("Inserted author {name} as {author_id}");
            author_id
        };

        tx.commit().await?;
        Ok(Some(author_id))
    }
}

/// Chooses which of several same-named authors a candidate refers to.
///
/// With a birth year, only an author born that year or one whose year is unknown
/// qualifies. Without one, an author with unknown year is preferred, and otherwise the
/// only namesake. Several namesakes with differing known years are ambiguous.
fn pick_namesake(namesakes: Vec<AuthorRecord>, birth_year: Option<i64>) -> Option<AuthorRecord> {
    if let Some(year) = birth_year {
        let mut undated = None;
        for record in namesakes {
            match record.birth_year {
                Some(known) if known == year => return Some(record),
                None if undated.is_none() => undated = Some(record),
                _ => {}
            }
        }
        return undated;
    }

    if let Some(position) = namesakes
        .iter()
        .position(|record| record.birth_year.is_none())
    {
        return namesakes.into_iter().nth(position);
    }
    match <[AuthorRecord; 1]>::try_from(namesakes) {
        Ok([only]) => Some(only),
        Err(_) => None,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::database::queries::{count_books, fetch_author, fetch_book};
    use crate::sources::candidate::Source;
    use pretty_assertions::assert_eq;

    async fn reconciler() -> Reconciler {
        let db = Db::init_in_memory().await.unwrap();
        Reconciler::new(db, ReconcilePolicy::default())
    }

    #[tokio::test]
    async fn dune_merge_fills_both_sides() {
        let reconciler = reconciler().await;
        let existing = CandidateRecord::new(Source::OpenLibrary, "Dune")
            .with_external_key("OL893415W")
            .with_isbns(["978-0-441-01359-3"]);
        let first = reconciler.reconcile(&existing, None).await.unwrap().unwrap();

        let incoming = CandidateRecord::new(Source::Gutenberg, "DUNE!")
            .with_description("A desert planet...");
        let second = reconciler.reconcile(&incoming, None).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(count_books(reconciler.db().pool()).await.unwrap(), 1);
        let book = fetch_book(reconciler.db().pool(), first).await.unwrap().unwrap();
        assert_eq!(book.title, "Dune");
        assert_eq!(book.isbn.as_deref(), Some("9780441013593"));
        assert_eq!(book.description.as_deref(), Some("A desert planet..."));
        assert_eq!(book.open_library_key.as_deref(), Some("OL893415W"));
        assert_eq!(book.language, "en");
    }

    #[tokio::test]
    async fn same_candidate_twice_converges() {
        let reconciler = reconciler().await;
        let author = reconciler
            .reconcile_author(&AuthorCandidate::new("Ursula K. Le Guin"))
            .await
            .unwrap();
        let candidate = CandidateRecord::new(Source::OpenLibrary, "The Dispossessed")
            .with_cover("https://covers.example/1.jpg");

        let first = reconciler.reconcile(&candidate, author).await.unwrap();
        let second = reconciler.reconcile(&candidate, author).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(count_books(reconciler.db().pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_title_by_different_authors_stays_apart() {
        let reconciler = reconciler().await;
        let herbert = reconciler
            .reconcile_author(&AuthorCandidate::new("Frank Herbert"))
            .await
            .unwrap();
        let other = reconciler
            .reconcile_author(&AuthorCandidate::new("Someone Else"))
            .await
            .unwrap();
        let candidate = CandidateRecord::new(Source::OpenLibrary, "Dune");

        let first = reconciler.reconcile(&candidate, herbert).await.unwrap();
        let second = reconciler.reconcile(&candidate, other).await.unwrap();

        assert!(first != second);
        assert_eq!(count_books(reconciler.db().pool()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bad_titles_are_rejected_only_when_new() {
        let reconciler = reconciler().await;
        for title in ["It", "  ", "The Complete Box Set", "Untitled"] {
            let candidate = CandidateRecord::new(Source::Gutenberg, title);
            assert_eq!(reconciler.reconcile(&candidate, None).await.unwrap(), None);
        }
        assert_eq!(count_books(reconciler.db().pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn namesakes_with_different_birth_years_stay_apart() {
        let reconciler = reconciler().await;
        let elder = reconciler
            .reconcile_author(&AuthorCandidate::new("John Smith").with_birth_year(1580))
            .await
            .unwrap();
        let younger = reconciler
            .reconcile_author(&AuthorCandidate::new("john smith").with_birth_year(1952))
            .await
            .unwrap();
        let elder_again = reconciler
            .reconcile_author(&AuthorCandidate::new("JOHN SMITH").with_birth_year(1580))
            .await
            .unwrap();

        assert!(elder != younger);
        assert_eq!(elder, elder_again);
        // Two dated namesakes leave an undated mention ambiguous.
        let undated = reconciler
            .reconcile_author(&AuthorCandidate::new("John Smith"))
            .await
            .unwrap();
        assert!(undated != elder && undated != younger);
    }

    #[tokio::test]
    async fn author_key_match_wins_and_fills_fields() {
        let reconciler = reconciler().await;
        let first = reconciler
            .reconcile_author(&AuthorCandidate::new("Frank Herbert").with_external_key("OL79034A"))
            .await
            .unwrap()
            .unwrap();
        let mut detail = AuthorCandidate::new("Franklin Patrick Herbert Jr.")
            .with_external_key("OL79034A")
            .with_birth_year(1920);
        detail.biography = Some("American science fiction author.".to_owned());
        let second = reconciler.reconcile_author(&detail).await.unwrap().unwrap();

        assert_eq!(first, second);
        let author = fetch_author(reconciler.db().pool(), first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(author.name, "Frank Herbert");
        assert_eq!(author.birth_year, Some(1920));
        assert_eq!(
            author.biography.as_deref(),
            Some("American science fiction author.")
        );
        assert_eq!(author.nationality, None);
    }

    #[tokio::test]
    async fn dated_candidate_fills_undated_namesake() {
        let reconciler = reconciler().await;
        let undated = reconciler
            .reconcile_author(&AuthorCandidate::new("Herman Melville"))
            .await
            .unwrap();
        let dated = reconciler
            .reconcile_author(&AuthorCandidate::new("Herman Melville").with_birth_year(1819))
            .await
            .unwrap();
        assert_eq!(undated, dated);
    }

    #[tokio::test]
    async fn blank_author_names_are_ignored() {
        let reconciler = reconciler().await;
        assert_eq!(
            reconciler
                .reconcile_author(&AuthorCandidate::new("   "))
                .await
                .unwrap(),
            None
        );
    }
}
