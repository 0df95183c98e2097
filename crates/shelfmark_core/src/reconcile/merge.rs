use crate::database::types::{AuthorRecord, BookRecord};
use crate::reconcile::normalize::{Isbn, parse_release_date};
use crate::reconcile::policy::ReconcilePolicy;
use crate::sources::candidate::{AuthorCandidate, CandidateRecord, Source};
use chrono::NaiveDate;

/// The mergeable part of a book, shared by candidates and canonical rows.
///
/// Merging follows one rule per field: empty slots are filled, populated slots are
/// only replaced by something strictly more complete (a higher ranked ISBN, a longer
/// description), and nothing that is known is ever cleared.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookFields {
    pub open_library_key: Option<String>,
    pub gutenberg_id: Option<String>,
    pub isbn: Option<Isbn>,
    pub genres: Vec<String>,
    pub release_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub language: Option<String>,
    pub page_count: Option<i64>,
}

impl BookFields {
    #[must_use]
    #[inline]
    pub fn from_record(record: &BookRecord) -> Self {
        Self {
            open_library_key: non_blank(record.open_library_key.as_deref()),
            gutenberg_id: non_blank(record.gutenberg_id.as_deref()),
            isbn: record.isbn.as_deref().and_then(Isbn::classify),
            genres: record.genre_list(),
            release_date: record.release_date,
            description: non_blank(record.description.as_deref()),
            cover_url: non_blank(record.cover_url.as_deref()),
            language: non_blank(Some(record.language.as_str())),
            page_count: record.page_count.filter(|&count| count > 0),
        }
    }

    /// Converts a candidate into mergeable fields, routing its key by source and
    /// applying the genre policy.
    #[must_use]
    #[inline]
    pub fn from_candidate(candidate: &CandidateRecord, policy: &ReconcilePolicy) -> Self {
        let key = non_blank(candidate.external_key.as_deref());
        let (open_library_key, gutenberg_id) = match candidate.source {
            Source::OpenLibrary => (key, None),
            Source::Gutenberg => (None, key),
            Source::Local => (None, None),
        };
        Self {
            open_library_key,
            gutenberg_id,
            isbn: Isbn::best(candidate.isbns.iter().map(String::as_str)),
            genres: policy.filter_genres(candidate.subjects.iter().map(String::as_str)),
            release_date: candidate
                .publish_date
                .as_deref()
                .and_then(parse_release_date),
            description: non_blank(candidate.description.as_deref()),
            cover_url: non_blank(candidate.cover_url.as_deref()),
            language: non_blank(candidate.language.as_deref()),
            page_count: candidate.page_count.filter(|&count| count > 0),
        }
    }

    /// Folds `incoming` into `self`.
    #[inline]
    pub fn merge(&mut self, incoming: &Self, policy: &ReconcilePolicy) {
        fill(&mut self.open_library_key, &incoming.open_library_key);
        fill(&mut self.gutenberg_id, &incoming.gutenberg_id);
        fill(&mut self.release_date, &incoming.release_date);
        fill(&mut self.cover_url, &incoming.cover_url);
        fill(&mut self.language, &incoming.language);
        fill(&mut self.page_count, &incoming.page_count);

        if let Some(ref isbn) = incoming.isbn {
            let upgrade = self
                .isbn
                .as_ref()
                .is_none_or(|current| isbn.rank() > current.rank());
            if upgrade {
                self.isbn = Some(isbn.clone());
            }
        }

        keep_longest(&mut self.description, &incoming.description);

        if !incoming.genres.is_empty() {
            self.genres = policy.filter_genres(
                self.genres
                    .iter()
                    .chain(incoming.genres.iter())
                    .map(String::as_str),
            );
        }
    }

    /// Genres in their stored form.
    #[must_use]
    #[inline]
    pub fn joined_genres(&self) -> Option<String> {
        if self.genres.is_empty() {
            None
        } else {
            Some(self.genres.join(", "))
        }
    }
}

/// The mergeable part of an author. Nationality is absent on purpose: ingestion never
/// writes it.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorFields {
    pub biography: Option<String>,
    pub birth_year: Option<i64>,
    pub death_year: Option<i64>,
    pub image_url: Option<String>,
    pub open_library_key: Option<String>,
}

impl AuthorFields {
    #[must_use]
    #[inline]
    pub fn from_record(record: &AuthorRecord) -> Self {
        Self {
            biography: non_blank(record.biography.as_deref()),
            birth_year: record.birth_year,
            death_year: record.death_year,
            image_url: non_blank(record.image_url.as_deref()),
            open_library_key: non_blank(record.open_library_key.as_deref()),
        }
    }

    #[must_use]
    #[inline]
    pub fn from_candidate(candidate: &AuthorCandidate) -> Self {
        Self {
            biography: non_blank(candidate.biography.as_deref()),
            birth_year: candidate.birth_year,
            death_year: candidate.death_year,
            image_url: non_blank(candidate.image_url.as_deref()),
            open_library_key: non_blank(candidate.external_key.as_deref()),
        }
    }

    #[inline]
    pub fn merge(&mut self, incoming: &Self) {
        keep_longest(&mut self.biography, &incoming.biography);
        fill(&mut self.birth_year, &incoming.birth_year);
        fill(&mut self.death_year, &incoming.death_year);
        fill(&mut self.image_url, &incoming.image_url);
        fill(&mut self.open_library_key, &incoming.open_library_key);
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(incoming);
    }
}

fn keep_longest(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(ref text) = *incoming {
        let longer = slot
            .as_ref()
            .is_none_or(|current| text.chars().count() > current.chars().count());
        if longer {
            *slot = Some(text.clone());
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn described() -> BookFields {
        BookFields {
            description: Some("A desert planet and the spice that binds it".to_owned()),
            isbn: Isbn::classify("0441013597"),
            ..BookFields::default()
        }
    }

    fn illustrated() -> BookFields {
        BookFields {
            cover_url: Some("https://covers.openlibrary.org/b/id/1-L.jpg".to_owned()),
            genres: vec!["Science Fiction".to_owned()],
            page_count: Some(604),
            ..BookFields::default()
        }
    }

    #[test]
    fn merge_is_commutative_on_disjoint_fields() {
        let policy = ReconcilePolicy::default();

        let mut forward = described();
        forward.merge(&illustrated(), &policy);

        let mut backward = illustrated();
        backward.merge(&described(), &policy);

        assert_eq!(forward, backward);
    }

    #[test]
    fn merge_never_clears_known_fields() {
        let policy = ReconcilePolicy::default();
        let mut existing = described();
        existing.merge(&illustrated(), &policy);
        let before = existing.clone();

        existing.merge(&BookFields::default(), &policy);
        assert_eq!(existing, before);
        assert!(existing.description.is_some());
        assert!(existing.isbn.is_some());
    }

    #[test]
    fn merge_upgrades_only_when_strictly_better() {
        let policy = ReconcilePolicy::default();
        let mut existing = described();

        let incoming = BookFields {
            isbn: Isbn::classify("978-0441013593"),
            description: Some("Short".to_owned()),
            cover_url: Some("other.jpg".to_owned()),
            ..BookFields::default()
        };
        existing.merge(&incoming, &policy);

        assert_eq!(existing.isbn, Isbn::classify("9780441013593"));
        assert_eq!(
            existing.description.as_deref(),
            Some("A desert planet and the spice that binds it")
        );

        let mut with_cover = illustrated();
        with_cover.merge(&incoming, &policy);
        assert_eq!(
            with_cover.cover_url.as_deref(),
            Some("https://covers.openlibrary.org/b/id/1-L.jpg")
        );
    }

    #[test]
    fn candidate_key_lands_in_source_slot() {
        let policy = ReconcilePolicy::default();
        let candidate = CandidateRecord::new(Source::Gutenberg, "Moby Dick").with_external_key("2701");
        let fields = BookFields::from_candidate(&candidate, &policy);
        assert_eq!(fields.gutenberg_id.as_deref(), Some("2701"));
        assert_eq!(fields.open_library_key, None);
    }

    #[test]
    fn author_merge_keeps_longest_biography() {
        let mut existing = AuthorFields {
            biography: Some("American novelist.".to_owned()),
            birth_year: Some(1819),
            ..AuthorFields::default()
        };
        existing.merge(&AuthorFields {
            biography: Some("American novelist, short story writer and poet.".to_owned()),
            birth_year: Some(1820),
            death_year: Some(1891),
            ..AuthorFields::default()
        });
        assert_eq!(existing.birth_year, Some(1819));
        assert_eq!(existing.death_year, Some(1891));
        assert_eq!(
            existing.biography.as_deref(),
            Some("American novelist, short story writer and poet.")
        );
    }
}
