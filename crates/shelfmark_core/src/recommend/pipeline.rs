use crate::ai::CompletionService;
use crate::database::queries::{Db, candidate_pool};
use crate::database::types::BookSummary;
use crate::recommend::cache::DailyCache;
use crate::recommend::fuzzy::{DEFAULT_CUTOFF, best_match};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

pub const DEFAULT_PLACEHOLDER_COVER: &str = "/static/images/placeholder-cover.png";
pub const DEFAULT_LIMIT: usize = 10;

const SYSTEM_INSTRUCTION: &str = "You recommend books to a reader. Only choose titles \
    from the list you are given. Answer with one title per line, exactly as written in \
    the list, and nothing else.";

#[allow(clippy::expect_used, reason = "Pattern is a compile-time constant")]
static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+\s*[.)]\s*|[-*\u{2022}]\s+)").expect("Regex must be valid")
});

/// Display quality of a pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    CoverAndDescription,
    CoverOnly,
    Bare,
}

/// Reads the AI's free-text answer into titles, dropping list numbering, bullets and
/// quotes.
fn parse_titles(answer: &str) -> Vec<String> {
    answer
        .lines()
        .map(|line| LIST_MARKER.replace(line, ""))
        .map(|line| {
            line.trim()
                .trim_matches(|character| matches!(character, '"' | '*' | '\u{201c}' | '\u{201d}'))
                .trim()
                .to_owned()
        })
        .filter(|title| !title.is_empty())
        .collect()
}

fn build_prompt(favorite_genres: &[&str], pool: &[BookSummary], limit: usize) -> String {
    let mut prompt = format!(
        "The reader's favourite genres are: {}.\nPick up to {limit} books from the list \
         below that this reader is most likely to enjoy, best first.\n\nBooks:\n",
        favorite_genres.join(", ")
    );
    for book in pool {
        prompt.push_str(&book.title);
        prompt.push('\n');
    }
    prompt
}

/// Turns a user's stated genres and the canonical store into an ordered list of
/// suggestions, blending AI picks with a deterministic fallback.
#[derive(Clone)]
pub struct Recommender {
    db: Db,
    cache: DailyCache,
    ai: Option<Arc<dyn CompletionService>>,
    placeholder_cover: String,
    cutoff: f64,
}

impl core::fmt::Debug for Recommender {
    #[inline]
    fn fmt(&self, formatter: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        formatter
            .debug_struct("Recommender")
            .field("cache", &self.cache)
            .field("ai", &self.ai.is_some())
            .field("placeholder_cover", &self.placeholder_cover)
            .field("cutoff", &self.cutoff)
            .finish_non_exhaustive()
    }
}

impl Recommender {
    #[must_use]
    #[inline]
    pub fn new(
        db: Db,
        cache: DailyCache,
        ai: Option<Arc<dyn CompletionService>>,
        placeholder_cover: impl Into<String>,
    ) -> Self {
        Self {
            db,
            cache,
            ai,
            placeholder_cover: placeholder_cover.into(),
            cutoff: DEFAULT_CUTOFF,
        }
    }

    #[must_use]
    #[inline]
    pub const fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    fn tier(&self, book: &BookSummary) -> Tier {
        let has_cover = book.has_cover()
            && book.cover_url.as_deref().map(str::trim) != Some(self.placeholder_cover.as_str());
        match (has_cover, book.has_description()) {
            (true, true) => Tier::CoverAndDescription,
            (true, false) => Tier::CoverOnly,
            (false, _) => Tier::Bare,
        }
    }

    /// Up to `limit` books for the user, served from the daily cache when it is fresh.
    /// # Errors
    /// Fails when the store cannot be read. AI failures only lower the quality.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn recommend(
        &self,
        user_id: &str,
        favorite_genres: &[String],
        limit: usize,
    ) -> Result<Vec<BookSummary>, sqlx::Error> {
        self.recommend_at(user_id, favorite_genres, limit, Utc::now())
            .await
    }

    /// [`Self::recommend`] with an explicit clock.
    /// # Errors
    /// Fails when the store cannot be read.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn recommend_at(
        &self,
        user_id: &str,
        favorite_genres: &[String],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<BookSummary>, sqlx::Error> {
        let genres: Vec<&str> = favorite_genres
            .iter()
            .map(|genre| genre.trim())
            .filter(|genre| !genre.is_empty())
            .collect();
        if genres.is_empty() || limit == 0 {
            debug!("No favourite genres for {user_id}, nothing to recommend");
            return Ok(Vec::new());
        }

        if let Some(mut cached) = self.cache.get_cached(user_id, now).await? {
            cached.sort_by_key(|book| self.tier(book));
            return Ok(cached);
        }

        let pool = candidate_pool(self.db.pool(), user_id).await?;
        if pool.is_empty() {
            info!("Candidate pool for {user_id} is empty");
            return Ok(Vec::new());
        }

        let suggestions = self.ask_ai(&genres, &pool, limit).await;
        let selected = self.select(&pool, &suggestions, limit);
        let picks: Vec<BookSummary> = selected
            .into_iter()
            .filter_map(|index| pool.get(index).cloned())
            .map(|mut book| {
                if !book.has_cover() {
                    book.cover_url = Some(self.placeholder_cover.clone());
                }
                book
            })
            .collect();

        if let Err(error) = self.cache.put(user_id, &picks, now).await {
            warn!("Could not cache recommendations for {user_id}: {error}");
        }
        Ok(picks)
    }

    async fn ask_ai(&self, genres: &[&str], pool: &[BookSummary], limit: usize) -> Vec<String> {
        let Some(ai) = self.ai.as_ref() else {
            return Vec::new();
        };
        match ai
            .complete(SYSTEM_INSTRUCTION, &build_prompt(genres, pool, limit))
            .await
        {
            Ok(answer) => parse_titles(&answer),
            Err(error) => {
                warn!("AI ranking unavailable, using deterministic order: {error}");
                Vec::new()
            }
        }
    }

    /// Pool positions in output order: AI suggestions matched onto the cover and
    /// description tier, then onto the cover-only tier, then every tier in order.
    fn select(&self, pool: &[BookSummary], suggestions: &[String], limit: usize) -> Vec<usize> {
        let mut tiers: [Vec<usize>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for (index, book) in pool.iter().enumerate() {
            if let Some(tier) = tiers.get_mut(self.tier(book) as usize) {
                tier.push(index);
            }
        }
        let [full, cover_only, bare] = &tiers;

        let mut selected = Vec::new();
        let mut taken = HashSet::new();
        let mut unmatched: Vec<&str> = Vec::new();
        for suggestion in suggestions {
            if selected.len() >= limit {
                break;
            }
            match self.match_in(pool, full, &taken, suggestion) {
                Some(index) => {
                    taken.insert(index);
                    selected.push(index);
                }
                None => unmatched.push(suggestion),
            }
        }
        for suggestion in unmatched {
            if selected.len() >= limit {
                break;
            }
            if let Some(index) = self.match_in(pool, cover_only, &taken, suggestion) {
                taken.insert(index);
                selected.push(index);
            }
        }
        if !suggestions.is_empty() {
            debug!("{} of {} AI suggestions matched the pool", selected.len(), suggestions.len());
        }

        for &index in full.iter().chain(cover_only).chain(bare) {
            if selected.len() >= limit {
                break;
            }
            if taken.insert(index) {
                selected.push(index);
            }
        }
        selected
    }

    fn match_in(
        &self,
        pool: &[BookSummary],
        tier: &[usize],
        taken: &HashSet<usize>,
        suggestion: &str,
    ) -> Option<usize> {
        let open: Vec<usize> = tier
            .iter()
            .copied()
            .filter(|index| !taken.contains(index))
            .collect();
        let titles = open
            .iter()
            .filter_map(|&index| pool.get(index))
            .map(|book| book.title.as_str());
        best_match(suggestion, titles, self.cutoff).and_then(|position| open.get(position).copied())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::database::queries::{insert_book, upsert_cache_row};
    use crate::database::types::ShelfStatus;
    use crate::reconcile::merge::BookFields;
    use crate::reconcile::normalize::normalize_title;
    use crate::testing::FakeCompletion;
    use chrono::TimeZone as _;
    use pretty_assertions::assert_eq;

    const UTC: chrono_tz::Tz = chrono_tz::UTC;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).single().unwrap()
    }

    async fn add_book(db: &Db, title: &str, cover: Option<&str>, description: Option<&str>) -> i64 {
        let fields = BookFields {
            cover_url: cover.map(ToOwned::to_owned),
            description: description.map(ToOwned::to_owned),
            ..BookFields::default()
        };
        insert_book(db.pool(), title, &normalize_title(title), &fields, None, "en")
            .await
            .unwrap()
    }

    /// Pool in id order: Emma (bare), Dune (cover), The Hobbit (full), Persuasion
    /// (full), Ulysses (bare, description only).
    async fn library() -> Db {
        let db = Db::init_in_memory().await.unwrap();
        add_book(&db, "Emma", None, None).await;
        add_book(&db, "Dune", Some("dune.jpg"), None).await;
        add_book(&db, "The Hobbit", Some("hobbit.jpg"), Some("A hobbit's tale.")).await;
        add_book(&db, "Persuasion", Some("persuasion.jpg"), Some("Anne Elliot.")).await;
        add_book(&db, "Ulysses", None, Some("A day in Dublin.")).await;
        db
    }

    fn recommender(db: &Db, ai: Option<Arc<dyn CompletionService>>) -> Recommender {
        Recommender::new(
            db.clone(),
            DailyCache::new(db.clone(), UTC, 19),
            ai,
            DEFAULT_PLACEHOLDER_COVER,
        )
    }

    fn titles(books: &[BookSummary]) -> Vec<&str> {
        books.iter().map(|book| book.title.as_str()).collect()
    }

    fn genres() -> Vec<String> {
        vec!["Fantasy".to_owned()]
    }

    #[test]
    fn ai_lines_are_cleaned() {
        assert_eq!(
            parse_titles("1. \"The Hobbit\"\n2) Dune\n\n- **Emma**\n\u{2022} Persuasion\n  "),
            vec!["The Hobbit", "Dune", "Emma", "Persuasion"]
        );
        assert_eq!(parse_titles("1984"), vec!["1984"]);
    }

    #[tokio::test]
    async fn no_genres_means_no_recommendations() {
        let db = library().await;
        let fake = Arc::new(FakeCompletion::replying(["Dune"]));
        let recommender = recommender(&db, Some(fake.clone()));
        let books = recommender
            .recommend_at("reader", &["  ".to_owned()], 5, at(1, 12))
            .await
            .unwrap();
        assert!(books.is_empty());
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn deterministic_fill_follows_tiers() {
        let db = library().await;
        let recommender = recommender(&db, None);

        let first = recommender.recommend_at("reader", &genres(), 4, at(1, 12)).await.unwrap();
        let again = recommender.recommend_at("reader", &genres(), 4, at(2, 12)).await.unwrap();

        assert_eq!(titles(&first), vec!["The Hobbit", "Persuasion", "Dune", "Emma"]);
        assert_eq!(first, again);
        assert_eq!(
            first.last().unwrap().cover_url.as_deref(),
            Some(DEFAULT_PLACEHOLDER_COVER)
        );
    }

    #[tokio::test]
    async fn fuzzy_ai_titles_are_matched_by_tier() {
        let db = library().await;
        let fake = Arc::new(FakeCompletion::replying([
            "1. Dune\n2. The Hobbit: or There and Back Again\n3. Neuromancer\n4. The Hobbit",
        ]));
        let recommender = recommender(&db, Some(fake.clone()));

        let books = recommender.recommend_at("reader", &genres(), 3, at(1, 12)).await.unwrap();

        // The Hobbit matches the full tier first, Dune only the cover tier.
        assert_eq!(titles(&books), vec!["The Hobbit", "Dune", "Persuasion"]);
        assert_eq!(fake.calls(), 1);
        assert!(fake.prompts.lock().unwrap().first().unwrap().contains("Fantasy"));
    }

    #[tokio::test]
    async fn failing_ai_falls_back() {
        let db = library().await;
        let recommender = recommender(&db, Some(Arc::new(FakeCompletion::failing())));
        let books = recommender.recommend_at("reader", &genres(), 2, at(1, 12)).await.unwrap();
        assert_eq!(titles(&books), vec!["The Hobbit", "Persuasion"]);
    }

    #[tokio::test]
    async fn finished_and_current_books_are_excluded() {
        let db = library().await;
        db.set_shelf("reader", 3, ShelfStatus::Completed, Some(5)).await.unwrap();
        db.set_shelf("reader", 4, ShelfStatus::CurrentlyReading, None).await.unwrap();
        db.set_shelf("reader", 2, ShelfStatus::WantToRead, None).await.unwrap();
        let recommender = recommender(&db, None);

        let books = recommender.recommend_at("reader", &genres(), 10, at(1, 12)).await.unwrap();
        assert_eq!(titles(&books), vec!["Dune", "Emma", "Ulysses"]);
    }

    #[tokio::test]
    async fn cache_hit_is_resorted_without_recomputing() {
        let db = library().await;
        let cached = vec![
            BookSummary::new(9, "Bare".to_owned(), None, None, Some("text".to_owned()), None),
            BookSummary::new(
                8,
                "Placeholder".to_owned(),
                None,
                Some(DEFAULT_PLACEHOLDER_COVER.to_owned()),
                Some("text".to_owned()),
                None,
            ),
            BookSummary::new(
                7,
                "Full".to_owned(),
                None,
                Some("x.jpg".to_owned()),
                Some("y".to_owned()),
                Some(4.0),
            ),
        ];
        upsert_cache_row(
            db.pool(),
            "reader",
            &serde_json::to_string(&cached).unwrap(),
            at(1, 20),
        )
        .await
        .unwrap();
        let fake = Arc::new(FakeCompletion::replying(["Dune"]));
        let recommender = recommender(&db, Some(fake.clone()));

        let books = recommender.recommend_at("reader", &genres(), 10, at(1, 22)).await.unwrap();

        assert_eq!(titles(&books), vec!["Full", "Bare", "Placeholder"]);
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn stale_cache_is_recomputed() {
        let db = library().await;
        let recommender = recommender(&db, None);
        upsert_cache_row(db.pool(), "reader", "[]", at(1, 18)).await.unwrap();

        let books = recommender.recommend_at("reader", &genres(), 1, at(1, 19)).await.unwrap();
        assert_eq!(titles(&books), vec!["The Hobbit"]);
    }
}
