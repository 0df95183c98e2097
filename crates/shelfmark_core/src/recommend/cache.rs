use crate::database::queries::{Db, fetch_cache_row, upsert_cache_row};
use crate::database::types::BookSummary;
use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeDelta, TimeZone as _, Utc};
use chrono_tz::Tz;
use log::{debug, warn};

/// Local hour at which every cached list goes stale.
pub const DEFAULT_REFRESH_HOUR: u32 = 19;

/// The refresh instant on `date` in `timezone`. A refresh hour skipped by a DST jump
/// moves one hour later; a repeated one resolves to its first occurrence.
fn boundary_on(date: NaiveDate, timezone: Tz, hour: u32) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN));
    let resolved = match timezone.from_local_datetime(&local) {
        LocalResult::Single(instant) | LocalResult::Ambiguous(instant, _) => Some(instant),
        LocalResult::None => timezone
            .from_local_datetime(&(local + TimeDelta::hours(1)))
            .earliest(),
    };
    resolved.map_or_else(|| local.and_utc(), |instant| instant.with_timezone(&Utc))
}

/// The most recent refresh instant at or before `now`: today's if the local clock has
/// passed the refresh hour, yesterday's otherwise.
#[must_use]
#[inline]
pub fn last_boundary(now: DateTime<Utc>, timezone: Tz, hour: u32) -> DateTime<Utc> {
    let today = now.with_timezone(&timezone).date_naive();
    let boundary = boundary_on(today, timezone, hour);
    if now >= boundary {
        boundary
    } else {
        let yesterday = today.pred_opt().unwrap_or(today);
        boundary_on(yesterday, timezone, hour)
    }
}

/// Whether an entry written at `created_at` predates the last refresh before `now`.
#[must_use]
#[inline]
pub fn is_stale(created_at: DateTime<Utc>, now: DateTime<Utc>, timezone: Tz, hour: u32) -> bool {
    created_at < last_boundary(now, timezone, hour)
}

/// Per-user recommendation lists that expire daily at a fixed local hour.
#[derive(Debug, Clone)]
pub struct DailyCache {
    db: Db,
    timezone: Tz,
    refresh_hour: u32,
}

impl DailyCache {
    /// Hours past 23 are clamped to 23.
    #[must_use]
    #[inline]
    pub fn new(db: Db, timezone: Tz, refresh_hour: u32) -> Self {
        Self {
            db,
            timezone,
            refresh_hour: refresh_hour.min(23),
        }
    }

    /// The user's cached list, if it was written after the last refresh before `now`.
    /// An unreadable entry counts as a miss.
    /// # Errors
    /// Fails when the store cannot be read.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn get_cached(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<BookSummary>>, sqlx::Error> {
        let Some(row) = fetch_cache_row(self.db.pool(), user_id).await? else {
            debug!("No cached recommendations for {user_id}");
            return Ok(None);
        };
        if is_stale(row.created_at, now, self.timezone, self.refresh_hour) {
            debug!("Cached recommendations for {user_id} from {} are stale", row.created_at);
            return Ok(None);
        }
        match serde_json::from_str(&row.entries) {
            Ok(entries) => {
                debug!("Serving cached recommendations for {user_id}");
                Ok(Some(entries))
            }
            Err(error) => {
                warn!("Cached recommendations for {user_id} are unreadable: {error}");
                Ok(None)
            }
        }
    }

    /// Replaces the user's entry with `entries`, stamped `now`.
    /// # Errors
    /// Fails when the entries cannot be encoded or the store cannot be written.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn put(
        &self,
        user_id: &str,
        entries: &[BookSummary],
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let encoded =
            serde_json::to_string(entries).map_err(|error| sqlx::Error::Encode(Box::new(error)))?;
        upsert_cache_row(self.db.pool(), user_id, &encoded, now).await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NEW_YORK: Tz = chrono_tz::America::New_York;

    fn local(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        NEW_YORK
            .with_ymd_and_hms(2025, 3, day, hour, minute, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn boundary_is_today_after_refresh_hour_and_yesterday_before() {
        assert_eq!(last_boundary(local(5, 19, 1), NEW_YORK, 19), local(5, 19, 0));
        assert_eq!(last_boundary(local(5, 18, 59), NEW_YORK, 19), local(4, 19, 0));
        assert_eq!(last_boundary(local(5, 19, 0), NEW_YORK, 19), local(5, 19, 0));
    }

    #[test]
    fn entries_go_stale_when_the_boundary_passes() {
        assert!(is_stale(local(5, 18, 59), local(5, 19, 1), NEW_YORK, 19));
        assert!(!is_stale(local(5, 19, 1), local(5, 23, 0), NEW_YORK, 19));
        assert!(is_stale(local(5, 19, 1), local(6, 19, 1), NEW_YORK, 19));
        assert!(!is_stale(local(6, 1, 0), local(6, 18, 0), NEW_YORK, 19));
    }

    #[test]
    fn skipped_local_hour_moves_later() {
        // Clocks jump from 02:00 to 03:00 on 2025-03-09 in New York.
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(boundary_on(date, NEW_YORK, 2), local(9, 3, 0));
    }

    #[tokio::test]
    async fn cache_round_trip_and_expiry() {
        let db = Db::init_in_memory().await.unwrap();
        let cache = DailyCache::new(db, NEW_YORK, 19);
        let entries = vec![BookSummary::new(
            1,
            "Dune".to_owned(),
            Some("Frank Herbert".to_owned()),
            None,
            None,
            Some(4.5),
        )];

        cache.put("reader", &entries, local(5, 20, 0)).await.unwrap();
        assert_eq!(
            cache.get_cached("reader", local(5, 23, 0)).await.unwrap(),
            Some(entries)
        );
        assert_eq!(cache.get_cached("reader", local(6, 19, 30)).await.unwrap(), None);
        assert_eq!(cache.get_cached("nobody", local(5, 23, 0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let db = Db::init_in_memory().await.unwrap();
        upsert_cache_row(db.pool(), "reader", "{not json", local(5, 20, 0))
            .await
            .unwrap();
        let cache = DailyCache::new(db, NEW_YORK, 19);
        assert_eq!(cache.get_cached("reader", local(5, 21, 0)).await.unwrap(), None);
    }
}
