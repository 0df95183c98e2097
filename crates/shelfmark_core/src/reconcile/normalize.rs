use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used, reason = "Pattern is a compile-time constant")]
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"(?:^|[^0-9])(1[0-9]{3}|20[0-9]{2})(?:[^0-9]|$)").expect("Regex must be valid")
    });

/// Lower-cases a title and strips everything that is not a letter or digit, so that
/// "The Hobbit!" and "the hobbit" compare equal.
#[must_use]
#[inline]
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|character| character.is_alphanumeric())
        .collect()
}

/// A book identifier, ranked so that longer standard forms beat shorter ones.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Isbn {
    Thirteen(String),
    Ten(String),
    Other(String),
}

impl Isbn {
    /// Strips separators and sorts the identifier into its ISBN form. Returns `None`
    /// for blank input.
    #[must_use]
    #[inline]
    pub fn classify(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|character| !matches!(character, '-' | ' '))
            .collect();
        if cleaned.is_empty() {
            return None;
        }

        let chars: Vec<char> = cleaned.chars().collect();
        if chars.len() == 13 && chars.iter().all(char::is_ascii_digit) {
            return Some(Self::Thirteen(cleaned));
        }
        if chars.len() == 10 {
            let (body, check) = chars.split_at(9);
            let check_ok = check
                .first()
                .is_some_and(|last| last.is_ascii_digit() || matches!(last, 'x' | 'X'));
            if body.iter().all(char::is_ascii_digit) && check_ok {
                return Some(Self::Ten(cleaned.to_uppercase()));
            }
        }
        Some(Self::Other(cleaned))
    }

    /// Picks the highest ranked identifier. On equal rank the first one wins.
    #[must_use]
    #[inline]
    pub fn best<'a, I>(raws: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        raws.into_iter()
            .filter_map(Self::classify)
            .fold(None, |best: Option<Self>, candidate| match best {
                Some(current) if current.rank() >= candidate.rank() => Some(current),
                _ => Some(candidate),
            })
    }

    #[must_use]
    #[inline]
    pub const fn rank(&self) -> u8 {
        match *self {
            Self::Thirteen(_) => 3,
            Self::Ten(_) => 2,
            Self::Other(_) => 1,
        }
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        match *self {
            Self::Thirteen(ref value) | Self::Ten(ref value) | Self::Other(ref value) => value,
        }
    }
}

/// Turns the many date spellings providers use into a date. Anything that only names a
/// year (or a month and a year) lands on the first day of that period.
#[must_use]
#[inline]
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim().trim_end_matches('.');
    if raw.is_empty() {
        return None;
    }

    if raw.len() == 4 && raw.chars().all(|character| character.is_ascii_digit()) {
        return raw
            .parse::<i32>()
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1));
    }

    for format in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    // Month precision: "1965-08", "August 1965", "Aug 1965"
    let first_of_month = [
        (format!("{raw}-01"), "%Y-%m-%d"),
        (format!("1 {raw}"), "%d %B %Y"),
        (format!("1 {raw}"), "%d %b %Y"),
    ];
    for (padded, format) in &first_of_month {
        if let Ok(date) = NaiveDate::parse_from_str(padded, format) {
            return Some(date);
        }
    }

    YEAR.captures(raw)
        .and_then(|captures| captures.get(1))
        .and_then(|year| year.as_str().parse::<i32>().ok())
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_title("The Hobbit!"), "thehobbit");
        assert_eq!(normalize_title("  Dune: Messiah "), "dunemessiah");
        assert_eq!(normalize_title("Ender's Game"), "endersgame");
    }

    #[test]
    fn normalize_is_idempotent() {
        let titles = [
            "The Hobbit: or There and Back Again",
            "İstanbul Hatırası",
            "Straße & Weg",
            "1984",
            "",
            "¡¿!?",
        ];
        for title in titles {
            let once = normalize_title(title);
            assert_eq!(normalize_title(&once), once);
        }
    }

    #[test]
    fn isbn_priority_prefers_thirteen_digits() {
        let best = Isbn::best(["B000FC0SIM", "0-441-01359-7", "978-0441013593"]);
        assert_eq!(best, Some(Isbn::Thirteen("9780441013593".to_owned())));

        let best = Isbn::best(["B000FC0SIM", "044101359x"]);
        assert_eq!(best, Some(Isbn::Ten("044101359X".to_owned())));

        assert_eq!(Isbn::best(["   "]), None);
    }

    #[test]
    fn isbn_ties_keep_first() {
        let best = Isbn::best(["9780441013593", "9780340960196"]).unwrap();
        assert_eq!(best.as_str(), "9780441013593");
    }

    #[test]
    fn release_dates_default_missing_parts_to_one() {
        let expected = NaiveDate::from_ymd_opt(1965, 1, 1);
        assert_eq!(parse_release_date("1965"), expected);
        assert_eq!(parse_release_date("c1965?"), expected);
        assert_eq!(
            parse_release_date("August 1965"),
            NaiveDate::from_ymd_opt(1965, 8, 1)
        );
        assert_eq!(
            parse_release_date("1965-08"),
            NaiveDate::from_ymd_opt(1965, 8, 1)
        );
        assert_eq!(
            parse_release_date("Jun 1, 2001"),
            NaiveDate::from_ymd_opt(2001, 6, 1)
        );
        assert_eq!(
            parse_release_date("12 March 1998"),
            NaiveDate::from_ymd_opt(1998, 3, 12)
        );
        assert_eq!(parse_release_date("unknown"), None);
    }
}
