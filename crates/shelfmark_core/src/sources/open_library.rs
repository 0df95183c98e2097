use crate::reconcile::normalize::parse_release_date;
use crate::sources::candidate::{
    AuthorCandidate, CandidateRecord, SearchHit, Source, WorkSummary, WorksPage,
};
use crate::sources::client::{DETAIL_TIMEOUT, HttpClient, SEARCH_TIMEOUT};
use crate::sources::errors::SourceError;
use crate::sources::language::language_code;
use crate::sources::{BookSearch, CatalogSource};
use async_trait::async_trait;
use chrono::Datelike as _;
use log::{debug, warn};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

pub const DEFAULT_BASE_URL: &str = "https://openlibrary.org";
const COVERS_URL: &str = "https://covers.openlibrary.org";
/// How many editions are scanned to fill fields the work record lacks.
pub const EDITION_LOOKAHEAD: usize = 5;
const SEARCH_FIELDS: &str = "key,title,author_name,isbn,subject,cover_i,first_publish_year,\
    language,number_of_pages_median";

#[allow(clippy::expect_used, reason = "Pattern is a compile-time constant")]
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("Regex must be valid"));

/// Adapter for the Open Library JSON API.
#[derive(Debug, Clone)]
pub struct OpenLibrary {
    client: HttpClient,
    base_url: String,
}

impl OpenLibrary {
    #[must_use]
    #[inline]
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Free-text book search. Returns an empty list on any failure.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn search_books(&self, query: &str, limit: usize) -> Vec<CandidateRecord> {
        let url = format!("{}/search.json", self.base_url);
        let limit = limit.to_string();
        let params = [("q", query), ("limit", limit.as_str()), ("fields", SEARCH_FIELDS)];
        match self.client.get_json(&url, &params, SEARCH_TIMEOUT).await {
            Ok(Some(body)) => parse_search_docs(&body),
            Ok(None) => Vec::new(),
            Err(error) => {
                warn!("Book search for {query:?} failed: {error}");
                Vec::new()
            }
        }
    }

    /// Full work record, backfilled from the first few editions where the work itself
    /// is silent.
    /// # Errors
    /// Fails when the work record cannot be fetched. A failing editions lookup only
    /// loses the backfill.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn get_work(&self, work_key: &str) -> Result<Option<CandidateRecord>, SourceError> {
        let key = bare_key(work_key);
        let url = format!("{}/works/{key}.json", self.base_url);
        let Some(body) = self.client.get_json(&url, &[], DETAIL_TIMEOUT).await? else {
            return Ok(None);
        };
        let Some(mut candidate) = parse_work(&body, key) else {
            warn!("Work {key} has no usable title, skipping");
            return Ok(None);
        };

        if needs_backfill(&candidate) {
            let url = format!("{}/works/{key}/editions.json", self.base_url);
            let limit = EDITION_LOOKAHEAD.to_string();
            match self
                .client
                .get_json(&url, &[("limit", limit.as_str())], DETAIL_TIMEOUT)
                .await
            {
                Ok(Some(editions)) => backfill_from_editions(&mut candidate, &editions),
                Ok(None) => debug!("Work {key} has no editions listing"),
                Err(error) => warn!("Editions lookup for {key} failed: {error}"),
            }
        }

        Ok(Some(candidate))
    }

    /// Author search. Returns an empty list on any failure.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn search_authors(&self, query: &str, limit: usize) -> Vec<AuthorCandidate> {
        let url = format!("{}/search/authors.json", self.base_url);
        let limit = limit.to_string();
        let params = [("q", query), ("limit", limit.as_str())];
        match self.client.get_json(&url, &params, SEARCH_TIMEOUT).await {
            Ok(Some(body)) => parse_author_docs(&body),
            Ok(None) => Vec::new(),
            Err(error) => {
                warn!("Author search for {query:?} failed: {error}");
                Vec::new()
            }
        }
    }

    /// Full author record with biography and photo.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn get_author(&self, author_key: &str) -> Option<AuthorCandidate> {
        let key = bare_key(author_key);
        let url = format!("{}/authors/{key}.json", self.base_url);
        match self.client.get_json(&url, &[], DETAIL_TIMEOUT).await {
            Ok(Some(body)) => parse_author(&body, key),
            Ok(None) => None,
            Err(error) => {
                warn!("Author lookup for {key} failed: {error}");
                None
            }
        }
    }

    /// One page of an author's works.
    /// # Errors
    /// Fails when the listing cannot be fetched.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn author_works(
        &self,
        author_key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<WorksPage, SourceError> {
        let key = bare_key(author_key);
        let url = format!("{}/authors/{key}/works.json", self.base_url);
        let limit = limit.to_string();
        let offset = offset.to_string();
        let params = [("limit", limit.as_str()), ("offset", offset.as_str())];
        Ok(self
            .client
            .get_json(&url, &params, DETAIL_TIMEOUT)
            .await?
            .map(|body| parse_works_entries(&body))
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogSource for OpenLibrary {
    async fn search_authors(&self, query: &str, limit: usize) -> Vec<AuthorCandidate> {
        Self::search_authors(self, query, limit).await
    }

    async fn author_detail(&self, author_key: &str) -> Option<AuthorCandidate> {
        self.get_author(author_key).await
    }

    async fn works_page(
        &self,
        author_key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<WorksPage, SourceError> {
        self.author_works(author_key, limit, offset).await
    }

    async fn work_detail(&self, work_key: &str) -> Result<Option<CandidateRecord>, SourceError> {
        self.get_work(work_key).await
    }
}

#[async_trait]
impl BookSearch for OpenLibrary {
    async fn search(&self, query: &str, author: Option<&str>, limit: usize) -> Vec<SearchHit> {
        let query = match author {
            Some(author) => format!("{query} {author}"),
            None => query.to_owned(),
        };
        self.search_books(&query, limit)
            .await
            .into_iter()
            .map(SearchHit::from_book)
            .collect()
    }
}

/// `/works/OL45804W` and `OL45804W` both become `OL45804W`.
fn bare_key(key: &str) -> &str {
    key.trim()
        .trim_start_matches("/works/")
        .trim_start_matches("/authors/")
        .trim_start_matches("/books/")
}

fn cover_url(cover_id: i64) -> Option<String> {
    (cover_id > 0).then(|| format!("{COVERS_URL}/b/id/{cover_id}-L.jpg"))
}

fn first_cover(value: &Value) -> Option<String> {
    value
        .as_array()?
        .iter()
        .filter_map(Value::as_i64)
        .find_map(cover_url)
}

/// Trimmed, whitespace-collapsed string, `None` when blank or not a string.
fn to_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .map(|text| WHITESPACE.replace_all(text, " ").to_string())
        .filter(|text| !text.is_empty())
}

/// Open Library text fields are either a plain string or `{"type": ..., "value": ...}`.
fn to_text(value: &Value) -> Option<String> {
    to_string(value).or_else(|| to_string(&value["value"]))
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(to_string).collect())
        .unwrap_or_default()
}

fn first_language(value: &Value) -> Option<String> {
    value.as_array()?.iter().find_map(|language| {
        to_string(language)
            .or_else(|| to_string(&language["key"]))
            .and_then(|raw| language_code(&raw))
            .map(ToOwned::to_owned)
    })
}

fn parse_search_docs(body: &Value) -> Vec<CandidateRecord> {
    let Some(docs) = body["docs"].as_array() else {
        warn!("Search response has no docs array");
        return Vec::new();
    };

    docs.iter()
        .filter_map(|doc| {
            let title = to_string(&doc["title"])?;
            let mut candidate = CandidateRecord::new(Source::OpenLibrary, title);
            candidate.external_key = to_string(&doc["key"]).map(|key| bare_key(&key).to_owned());
            candidate.author_names = string_list(&doc["author_name"]);
            candidate.isbns = string_list(&doc["isbn"]);
            candidate.subjects = string_list(&doc["subject"]);
            candidate.cover_url = doc["cover_i"].as_i64().and_then(cover_url);
            candidate.publish_date = doc["first_publish_year"].as_i64().map(|year| year.to_string());
            candidate.language = first_language(&doc["language"]);
            candidate.page_count = doc["number_of_pages_median"].as_i64();
            Some(candidate)
        })
        .collect()
}

fn parse_work(body: &Value, key: &str) -> Option<CandidateRecord> {
    let title = to_string(&body["title"])?;
    let mut candidate = CandidateRecord::new(Source::OpenLibrary, title).with_external_key(key);
    candidate.description = to_text(&body["description"]);
    candidate.subjects = string_list(&body["subjects"]);
    candidate.cover_url = first_cover(&body["covers"]);
    candidate.publish_date = to_string(&body["first_publish_date"]);
    Some(candidate)
}

fn needs_backfill(candidate: &CandidateRecord) -> bool {
    candidate.isbns.is_empty()
        || candidate.page_count.is_none()
        || candidate.publish_date.is_none()
        || candidate.cover_url.is_none()
        || candidate.language.is_none()
}

/// Fills each missing field from the first edition, in listed order, that has it.
fn backfill_from_editions(candidate: &mut CandidateRecord, body: &Value) {
    let Some(entries) = body["entries"].as_array() else {
        warn!("Editions response has no entries array");
        return;
    };

    for edition in entries.iter().take(EDITION_LOOKAHEAD) {
        if candidate.isbns.is_empty() {
            let mut isbns = string_list(&edition["isbn_13"]);
            isbns.extend(string_list(&edition["isbn_10"]));
            candidate.isbns = isbns;
        }
        if candidate.page_count.is_none() {
            candidate.page_count = edition["number_of_pages"]
                .as_i64()
                .filter(|&pages| pages > 0);
        }
        if candidate.publish_date.is_none() {
            candidate.publish_date = to_string(&edition["publish_date"]);
        }
        if candidate.cover_url.is_none() {
            candidate.cover_url = first_cover(&edition["covers"]);
        }
        if candidate.language.is_none() {
            candidate.language = first_language(&edition["languages"]);
        }
    }
}

fn year_of(value: &Value) -> Option<i64> {
    to_string(value)
        .as_deref()
        .and_then(parse_release_date)
        .map(|date| i64::from(date.year()))
}

fn parse_author_docs(body: &Value) -> Vec<AuthorCandidate> {
    let Some(docs) = body["docs"].as_array() else {
        warn!("Author search response has no docs array");
        return Vec::new();
    };

    docs.iter()
        .filter_map(|doc| {
            let mut author = AuthorCandidate::new(to_string(&doc["name"])?);
            author.external_key = to_string(&doc["key"]).map(|key| bare_key(&key).to_owned());
            author.birth_year = year_of(&doc["birth_date"]);
            author.death_year = year_of(&doc["death_date"]);
            author.biography = to_text(&doc["bio"]);
            Some(author)
        })
        .collect()
}

fn parse_author(body: &Value, key: &str) -> Option<AuthorCandidate> {
    let mut author = AuthorCandidate::new(to_string(&body["name"])?).with_external_key(key);
    author.birth_year = year_of(&body["birth_date"]);
    author.death_year = year_of(&body["death_date"]);
    author.biography = to_text(&body["bio"]);
    author.image_url = body["photos"]
        .as_array()
        .and_then(|photos| photos.iter().filter_map(Value::as_i64).find(|&id| id > 0))
        .map(|id| format!("{COVERS_URL}/a/id/{id}-L.jpg"));
    Some(author)
}

fn parse_works_entries(body: &Value) -> WorksPage {
    let Some(entries) = body["entries"].as_array() else {
        warn!("Works listing has no entries array");
        return WorksPage::default();
    };

    let works: Vec<WorkSummary> = entries
        .iter()
        .filter_map(|entry| {
            let key = to_string(&entry["key"])?;
            let title = to_string(&entry["title"])?;
            Some(WorkSummary::new(bare_key(&key), title))
        })
        .collect();
    if works.len() < entries.len() {
        debug!(
            "Skipped {} works listing entries without key or title",
            entries.len().saturating_sub(works.len())
        );
    }
    WorksPage::new(works, entries.len())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn search_docs_become_candidates() {
        let body = json!({
            "numFound": 2,
            "docs": [
                {
                    "key": "/works/OL893415W",
                    "title": "Dune",
                    "author_name": ["Frank Herbert"],
                    "isbn": ["0441013597", "9780441013593"],
                    "subject": ["Science Fiction", "Accessible book"],
                    "cover_i": 11_481_354,
                    "first_publish_year": 1965,
                    "language": ["eng"],
                    "number_of_pages_median": 604
                },
                { "key": "/works/OL1W" },
                "garbage"
            ]
        });

        let candidates = parse_search_docs(&body);
        assert_eq!(candidates.len(), 1);
        let dune = candidates.first().unwrap();
        assert_eq!(dune.external_key.as_deref(), Some("OL893415W"));
        assert_eq!(dune.author_names, vec!["Frank Herbert"]);
        assert_eq!(
            dune.cover_url.as_deref(),
            Some("https://covers.openlibrary.org/b/id/11481354-L.jpg")
        );
        assert_eq!(dune.publish_date.as_deref(), Some("1965"));
        assert_eq!(dune.language.as_deref(), Some("en"));
        assert_eq!(dune.page_count, Some(604));
    }

    #[test]
    fn malformed_search_body_is_empty() {
        assert!(parse_search_docs(&json!({"error": "bad"})).is_empty());
        assert!(parse_search_docs(&json!([1, 2, 3])).is_empty());
    }

    #[test]
    fn work_description_accepts_both_shapes() {
        let plain = json!({"title": "Dune", "description": "  A desert   planet "});
        let typed = json!({
            "title": "Dune",
            "description": {"type": "/type/text", "value": "A desert planet"}
        });
        assert_eq!(
            parse_work(&plain, "OL1W").unwrap().description.as_deref(),
            Some("A desert planet")
        );
        assert_eq!(
            parse_work(&typed, "OL1W").unwrap().description.as_deref(),
            Some("A desert planet")
        );
        assert!(parse_work(&json!({"description": "x"}), "OL1W").is_none());
    }

    #[test]
    fn editions_backfill_first_found_wins() {
        let work = json!({"title": "Dune", "covers": [-1, 42]});
        let mut candidate = parse_work(&work, "OL893415W").unwrap();
        assert_eq!(
            candidate.cover_url.as_deref(),
            Some("https://covers.openlibrary.org/b/id/42-L.jpg")
        );
        assert!(needs_backfill(&candidate));

        let editions = json!({
            "entries": [
                {"publish_date": "August 1990", "languages": [{"key": "/languages/eng"}]},
                {"isbn_10": ["0441172717"], "number_of_pages": 0},
                {"isbn_13": ["9780441013593"], "number_of_pages": 535, "publish_date": "2005"},
                {}, {}, {"number_of_pages": 999}
            ]
        });
        backfill_from_editions(&mut candidate, &editions);

        assert_eq!(candidate.isbns, vec!["0441172717"]);
        assert_eq!(candidate.page_count, Some(535));
        assert_eq!(candidate.publish_date.as_deref(), Some("August 1990"));
        assert_eq!(candidate.language.as_deref(), Some("en"));
        assert_eq!(
            candidate.cover_url.as_deref(),
            Some("https://covers.openlibrary.org/b/id/42-L.jpg")
        );
    }

    #[test]
    fn author_docs_carry_years() {
        let body = json!({
            "docs": [{
                "key": "OL79034A",
                "name": "Frank Herbert",
                "birth_date": "8 October 1920",
                "death_date": "11 February 1986"
            }]
        });
        let authors = parse_author_docs(&body);
        let herbert = authors.first().unwrap();
        assert_eq!(herbert.external_key.as_deref(), Some("OL79034A"));
        assert_eq!(herbert.birth_year, Some(1920));
        assert_eq!(herbert.death_year, Some(1986));
    }

    #[test]
    fn author_record_resolves_photo_and_bio() {
        let body = json!({
            "name": "Frank Herbert",
            "bio": {"type": "/type/text", "value": "American science fiction author."},
            "photos": [-1, 6_257_553]
        });
        let author = parse_author(&body, "OL79034A").unwrap();
        assert_eq!(
            author.image_url.as_deref(),
            Some("https://covers.openlibrary.org/a/id/6257553-L.jpg")
        );
        assert_eq!(
            author.biography.as_deref(),
            Some("American science fiction author.")
        );
    }

    #[test]
    fn works_listing_strips_key_prefix() {
        let body = json!({
            "size": 2,
            "entries": [
                {"key": "/works/OL893415W", "title": "Dune"},
                {"key": "/works/OL893416W"}
            ]
        });
        let page = parse_works_entries(&body);
        assert_eq!(page.works, vec![WorkSummary::new("OL893415W", "Dune")]);
        assert_eq!(page.entry_count, 2);
    }
}
