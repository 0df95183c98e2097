use crate::database::types::{AuthorRecord, BookRecord, BookSummary, CacheRow, ShelfStatus};
use crate::reconcile::merge::{AuthorFields, BookFields};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};
use std::path::Path;

const BOOK_COLUMNS: &str = "id AS book_id, title, normalized_title, open_library_key, \
    gutenberg_id, isbn, genres, release_date, description, cover_url, language, page_count, \
    author_id";

const AUTHOR_COLUMNS: &str = "id AS author_id, name, biography, birth_year, death_year, \
    nationality, image_url, open_library_key";

/// Handle on the canonical store. Constructed once at start of program and passed to
/// every component that reads or writes books.
#[derive(Clone, Debug)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub async fn init(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .foreign_keys(true)
            .create_if_missing(true)
            .filename(path);
        let pool = SqlitePool::connect_with(options).await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    /// A private in-memory store with the schema applied. A single connection is kept
    /// alive for the lifetime of the pool, otherwise the database would vanish.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per store"
    )]
    pub async fn init_in_memory() -> Result<Self, sqlx::Error> {
        let options = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at end of program"
    )]
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[must_use]
    #[inline]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a unit of work with read-your-writes consistency.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Puts a book on a user's shelf, keeping an earlier rating when none is given.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn set_shelf(
        &self,
        user_id: &str,
        book_id: i64,
        status: ShelfStatus,
        rating: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO user_books (user_id, book_id, status, rating)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (user_id, book_id) DO UPDATE SET
                status = excluded.status,
                rating = COALESCE(excluded.rating, user_books.rating);
            ",
        )
        .bind(user_id)
        .bind(book_id)
        .bind(status.as_str())
        .bind(rating)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Books whose normalized title equals `normalized`, restricted to one author when
/// `author_id` is given. Ordered by id so the oldest record comes first.
#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn books_with_normalized_title<'e, E>(
    executor: E,
    normalized: &str,
    author_id: Option<i64>,
) -> Result<Vec<BookRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, BookRecord>(&format!(
        "SELECT {BOOK_COLUMNS} FROM books \
         WHERE normalized_title = ?1 AND (?2 IS NULL OR author_id = ?2) \
         ORDER BY id ASC;"
    ))
    .bind(normalized)
    .bind(author_id)
    .fetch_all(executor)
    .await
}

#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn fetch_book<'e, E>(executor: E, book_id: i64) -> Result<Option<BookRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, BookRecord>(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1;"))
        .bind(book_id)
        .fetch_optional(executor)
        .await
}

#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn count_books<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM books;")
        .fetch_one(executor)
        .await
}

/// Inserts a new canonical book and returns its id.
#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn insert_book<'e, E>(
    executor: E,
    title: &str,
    normalized_title: &str,
    fields: &BookFields,
    author_id: Option<i64>,
    default_language: &str,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(
        r"
        INSERT INTO books (
            title,
            normalized_title,
            open_library_key,
            gutenberg_id,
            isbn,
            genres,
            release_date,
            description,
            cover_url,
            language,
            page_count,
            author_id
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        RETURNING id;
        ",
    )
    .bind(title.trim())
    .bind(normalized_title)
    .bind(fields.open_library_key.as_deref())
    .bind(fields.gutenberg_id.as_deref())
    .bind(fields.isbn.as_ref().map(|isbn| isbn.as_str()))
    .bind(fields.joined_genres())
    .bind(fields.release_date)
    .bind(fields.description.as_deref())
    .bind(fields.cover_url.as_deref())
    .bind(fields.language.as_deref().unwrap_or(default_language))
    .bind(fields.page_count)
    .bind(author_id)
    .fetch_one(executor)
    .await
}

/// Writes merged fields back onto an existing book. The author reference is only
/// filled, never moved to another author.
#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn update_book<'e, E>(
    executor: E,
    book_id: i64,
    fields: &BookFields,
    author_id: Option<i64>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r"
        UPDATE books SET
            open_library_key = ?2,
            gutenberg_id = ?3,
            isbn = ?4,
            genres = ?5,
            release_date = ?6,
            description = ?7,
            cover_url = ?8,
            language = COALESCE(?9, language),
            page_count = ?10,
            author_id = COALESCE(author_id, ?11)
        WHERE id = ?1;
        ",
    )
    .bind(book_id)
    .bind(fields.open_library_key.as_deref())
    .bind(fields.gutenberg_id.as_deref())
    .bind(fields.isbn.as_ref().map(|isbn| isbn.as_str()))
    .bind(fields.joined_genres())
    .bind(fields.release_date)
    .bind(fields.description.as_deref())
    .bind(fields.cover_url.as_deref())
    .bind(fields.language.as_deref())
    .bind(fields.page_count)
    .bind(author_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// External keys and normalized titles already stored for an author, used to skip
/// works that need no fetching.
#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn author_catalog<'e, E>(
    executor: E,
    author_id: i64,
) -> Result<Vec<(Option<String>, String)>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT open_library_key, normalized_title FROM books WHERE author_id = ?1;")
        .bind(author_id)
        .fetch_all(executor)
        .await
}

#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn author_by_key<'e, E>(
    executor: E,
    open_library_key: &str,
) -> Result<Option<AuthorRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, AuthorRecord>(&format!(
        "SELECT {AUTHOR_COLUMNS} FROM authors WHERE open_library_key = ?1 ORDER BY id LIMIT 1;"
    ))
    .bind(open_library_key)
    .fetch_optional(executor)
    .await
}

/// Authors whose name matches case-insensitively, oldest first.
#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn authors_named<'e, E>(executor: E, name: &str) -> Result<Vec<AuthorRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, AuthorRecord>(&format!(
        "SELECT {AUTHOR_COLUMNS} FROM authors WHERE lower(name) = lower(?1) ORDER BY id ASC;"
    ))
    .bind(name.trim())
    .fetch_all(executor)
    .await
}

#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn fetch_author<'e, E>(
    executor: E,
    author_id: i64,
) -> Result<Option<AuthorRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, AuthorRecord>(&format!(
        "SELECT {AUTHOR_COLUMNS} FROM authors WHERE id = ?1;"
    ))
    .bind(author_id)
    .fetch_optional(executor)
    .await
}

#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn insert_author<'e, E>(
    executor: E,
    name: &str,
    fields: &AuthorFields,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(
        r"
        INSERT INTO authors (name, biography, birth_year, death_year, image_url, open_library_key)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        RETURNING id;
        ",
    )
    .bind(name.trim())
    .bind(fields.biography.as_deref())
    .bind(fields.birth_year)
    .bind(fields.death_year)
    .bind(fields.image_url.as_deref())
    .bind(fields.open_library_key.as_deref())
    .fetch_one(executor)
    .await
}

#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn update_author<'e, E>(
    executor: E,
    author_id: i64,
    fields: &AuthorFields,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r"
        UPDATE authors SET
            biography = ?2,
            birth_year = ?3,
            death_year = ?4,
            image_url = ?5,
            open_library_key = ?6
        WHERE id = ?1;
        ",
    )
    .bind(author_id)
    .bind(fields.biography.as_deref())
    .bind(fields.birth_year)
    .bind(fields.death_year)
    .bind(fields.image_url.as_deref())
    .bind(fields.open_library_key.as_deref())
    .execute(executor)
    .await?;
    Ok(())
}

/// Every canonical book the user has neither finished nor is currently reading, with
/// display fields and the mean rating across all users.
#[allow(
    clippy::missing_inline_in_public_items,
    reason = "Large query, called once per recommendation run"
)]
pub async fn candidate_pool<'e, E>(executor: E, user_id: &str) -> Result<Vec<BookSummary>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, BookSummary>(
        r"
        SELECT
            b.id AS book_id,
            b.title,
            a.name AS author,
            b.cover_url,
            b.description,
            (
                SELECT AVG(r.rating)
                FROM user_books AS r
                WHERE r.book_id = b.id AND r.rating IS NOT NULL
            ) AS rating
        FROM
            books AS b
            LEFT JOIN authors AS a ON a.id = b.author_id
        WHERE
            b.id NOT IN (
                SELECT book_id
                FROM user_books
                WHERE user_id = ?1 AND status IN ('completed', 'currently_reading')
            )
        ORDER BY b.id ASC;
        ",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
}

#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn fetch_cache_row<'e, E>(executor: E, user_id: &str) -> Result<Option<CacheRow>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, CacheRow>(
        "SELECT user_id, entries, created_at FROM recommendation_cache WHERE user_id = ?1;",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Replaces the user's cache row in a single statement, last writer wins.
#[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
pub async fn upsert_cache_row<'e, E>(
    executor: E,
    user_id: &str,
    entries: &str,
    created_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r"
        INSERT INTO recommendation_cache (user_id, entries, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (user_id) DO UPDATE SET
            entries = excluded.entries,
            created_at = excluded.created_at;
        ",
    )
    .bind(user_id)
    .bind(entries)
    .bind(created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::reconcile::normalize::Isbn;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn insert_and_find_by_normalized_title() {
        let db = Db::init_in_memory().await.unwrap();
        let fields = BookFields {
            isbn: Isbn::classify("9780441013593"),
            genres: vec!["Science Fiction".to_owned(), "Ecology".to_owned()],
            ..BookFields::default()
        };
        let id = insert_book(db.pool(), "Dune", "dune", &fields, None, "en")
            .await
            .unwrap();

        let found = books_with_normalized_title(db.pool(), "dune", None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let book = found.first().unwrap();
        assert_eq!(book.book_id, id);
        assert_eq!(book.isbn.as_deref(), Some("9780441013593"));
        assert_eq!(book.language, "en");
        assert_eq!(book.genre_list(), vec!["Science Fiction", "Ecology"]);

        let scoped = books_with_normalized_title(db.pool(), "dune", Some(42))
            .await
            .unwrap();
        assert!(scoped.is_empty());
    }

    #[tokio::test]
    async fn pool_excludes_finished_and_current_books() {
        let db = Db::init_in_memory().await.unwrap();
        let fields = BookFields::default();
        let read = insert_book(db.pool(), "Dune", "dune", &fields, None, "en")
            .await
            .unwrap();
        let reading = insert_book(db.pool(), "Emma", "emma", &fields, None, "en")
            .await
            .unwrap();
        let wanted = insert_book(db.pool(), "Beloved", "beloved", &fields, None, "en")
            .await
            .unwrap();

        db.set_shelf("reader", read, ShelfStatus::Completed, Some(4))
            .await
            .unwrap();
        db.set_shelf("reader", reading, ShelfStatus::CurrentlyReading, None)
            .await
            .unwrap();
        db.set_shelf("reader", wanted, ShelfStatus::WantToRead, None)
            .await
            .unwrap();
        db.set_shelf("other", wanted, ShelfStatus::Completed, Some(5))
            .await
            .unwrap();

        let pool = candidate_pool(db.pool(), "reader").await.unwrap();
        assert_eq!(pool.len(), 1);
        let only = pool.first().unwrap();
        assert_eq!(only.book_id, wanted);
        assert_eq!(only.rating, Some(5.0));
    }

    #[tokio::test]
    async fn cache_upsert_keeps_one_row_per_user() {
        let db = Db::init_in_memory().await.unwrap();
        let first = Utc::now();
        upsert_cache_row(db.pool(), "reader", "[]", first).await.unwrap();
        upsert_cache_row(db.pool(), "reader", "[1]", first).await.unwrap();

        let row = fetch_cache_row(db.pool(), "reader").await.unwrap().unwrap();
        assert_eq!(row.entries, "[1]");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recommendation_cache;")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
