use crate::recommend::cache::DEFAULT_REFRESH_HOUR;
use crate::recommend::pipeline::{DEFAULT_LIMIT, DEFAULT_PLACEHOLDER_COVER};
use crate::sources::client::DEFAULT_MAX_RETRIES;
use crate::{ai, sources};
use chrono_tz::Tz;
use log::{debug, info};
use std::path::PathBuf;

/// Errors while reading configuration.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Everything the services need at start of program.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub open_library_url: String,
    pub gutenberg_url: String,
    pub user_agent: String,
    pub max_retries: u32,
    /// Zone in which the daily cache refresh hour is read.
    pub cache_timezone: Tz,
    pub cache_refresh_hour: u32,
    pub recommendation_limit: usize,
    pub placeholder_cover: String,
    /// AI layers are disabled without a key.
    pub anthropic_api_key: Option<String>,
    pub ai_model: String,
    /// Title keywords rejected on top of the built-in ones.
    pub extra_rejected_keywords: Vec<String>,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("shelfmark.db"),
            open_library_url: sources::open_library::DEFAULT_BASE_URL.to_owned(),
            gutenberg_url: sources::gutenberg::DEFAULT_BASE_URL.to_owned(),
            user_agent: concat!("shelfmark/", env!("CARGO_PKG_VERSION")).to_owned(),
            max_retries: DEFAULT_MAX_RETRIES,
            cache_timezone: Tz::UTC,
            cache_refresh_hour: DEFAULT_REFRESH_HOUR,
            recommendation_limit: DEFAULT_LIMIT,
            placeholder_cover: DEFAULT_PLACEHOLDER_COVER.to_owned(),
            anthropic_api_key: None,
            ai_model: ai::claude::DEFAULT_MODEL.to_owned(),
            extra_rejected_keywords: Vec::new(),
        }
    }
}

fn parse_number<T: core::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|error: T::Err| ConfigError::Invalid {
        key,
        reason: error.to_string(),
    })
}

impl Config {
    /// Loads a `.env` file if there is one, then reads `SHELFMARK_*` variables and
    /// `ANTHROPIC_API_KEY`. Unset variables keep their defaults.
    /// # Errors
    /// Fails when a variable is set to something unusable.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(error) => debug!("No .env file loaded: {error}"),
        }
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        info!(
            "Config loaded: database {}, cache refresh {}:00 {}, AI {}",
            config.database_path.display(),
            config.cache_refresh_hour,
            config.cache_timezone,
            if config.anthropic_api_key.is_some() { "enabled" } else { "disabled" }
        );
        Ok(config)
    }

    /// Builds a config from any variable source. Blank values count as unset.
    /// # Errors
    /// Fails when a variable is set to something unusable.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get("SHELFMARK_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(url) = get("SHELFMARK_OPEN_LIBRARY_URL") {
            config.open_library_url = url;
        }
        if let Some(url) = get("SHELFMARK_GUTENBERG_URL") {
            config.gutenberg_url = url;
        }
        if let Some(agent) = get("SHELFMARK_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(raw) = get("SHELFMARK_MAX_RETRIES") {
            config.max_retries = parse_number("SHELFMARK_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("SHELFMARK_CACHE_TIMEZONE") {
            config.cache_timezone =
                raw.trim()
                    .parse::<Tz>()
                    .map_err(|error| ConfigError::Invalid {
                        key: "SHELFMARK_CACHE_TIMEZONE",
                        reason: error.to_string(),
                    })?;
        }
        if let Some(raw) = get("SHELFMARK_CACHE_REFRESH_HOUR") {
            let hour: u32 = parse_number("SHELFMARK_CACHE_REFRESH_HOUR", &raw)?;
            if hour > 23 {
                return Err(ConfigError::Invalid {
                    key: "SHELFMARK_CACHE_REFRESH_HOUR",
                    reason: format!("{hour} is not an hour of the day"),
                });
            }
            config.cache_refresh_hour = hour;
        }
        if let Some(raw) = get("SHELFMARK_RECOMMENDATION_LIMIT") {
            config.recommendation_limit = parse_number("SHELFMARK_RECOMMENDATION_LIMIT", &raw)?;
        }
        if let Some(cover) = get("SHELFMARK_PLACEHOLDER_COVER") {
            config.placeholder_cover = cover;
        }
        config.anthropic_api_key = get("ANTHROPIC_API_KEY").map(|key| key.trim().to_owned());
        if let Some(model) = get("SHELFMARK_AI_MODEL") {
            config.ai_model = model;
        }
        if let Some(raw) = get("SHELFMARK_REJECTED_TITLE_KEYWORDS") {
            config.extra_rejected_keywords = raw
                .split(',')
                .map(str::trim)
                .filter(|keyword| !keyword.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }

        Ok(config)
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
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|&(key, value)| (key.to_owned(), value.to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = Config::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "  ")])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cache_refresh_hour, 19);
        assert_eq!(config.cache_timezone, Tz::UTC);
    }

    #[test]
    fn variables_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("SHELFMARK_CACHE_TIMEZONE", "Europe/Zurich"),
            ("SHELFMARK_CACHE_REFRESH_HOUR", "7"),
            ("SHELFMARK_MAX_RETRIES", "2"),
            ("SHELFMARK_REJECTED_TITLE_KEYWORDS", "omnibus, , sampler"),
            ("ANTHROPIC_API_KEY", "sk-test"),
        ]))
        .unwrap();
        assert_eq!(config.cache_timezone, chrono_tz::Europe::Zurich);
        assert_eq!(config.cache_refresh_hour, 7);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.extra_rejected_keywords, vec!["omnibus", "sampler"]);
        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn bad_values_are_rejected() {
        for pairs in [
            [("SHELFMARK_CACHE_TIMEZONE", "Mars/Olympus")],
            [("SHELFMARK_CACHE_REFRESH_HOUR", "24")],
            [("SHELFMARK_RECOMMENDATION_LIMIT", "ten")],
        ] {
            assert!(matches!(
                Config::from_lookup(lookup(&pairs)),
                Err(ConfigError::Invalid { .. })
            ));
        }
    }
}
