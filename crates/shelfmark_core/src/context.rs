use crate::ai::{AiError, CompletionService};
use crate::ai::claude::ClaudeClient;
use crate::config::{Config, ConfigError};
use crate::database::queries::Db;
use crate::database::types::BookSummary;
use crate::moderation::Moderator;
use crate::moderation::filter::DeterministicFilter;
use crate::moderation::wordlist::ModerationLists;
use crate::recommend::cache::DailyCache;
use crate::recommend::pipeline::Recommender;
use crate::reconcile::engine::Reconciler;
use crate::reconcile::policy::ReconcilePolicy;
use crate::sources::client::HttpClient;
use crate::sources::errors::SourceError;
use crate::sources::gutenberg::Gutenberg;
use crate::sources::open_library::OpenLibrary;
use log::info;
use std::sync::Arc;

/// Errors while wiring up the services.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("HTTP client error: {0}")]
    Http(#[from] SourceError),
    #[error("AI client error: {0}")]
    Ai(#[from] AiError),
    #[error("moderation word list does not compile: {0}")]
    WordList(#[from] regex::Error),
}

/// Every long-lived service of the application, built once from a [`Config`] and
/// shared by reference afterwards.
#[derive(Debug, Clone)]
pub struct Services {
    pub config: Config,
    pub db: Db,
    pub open_library: OpenLibrary,
    pub gutenberg: Gutenberg,
    pub reconciler: Reconciler,
    pub recommender: Recommender,
    pub moderator: Moderator,
}

impl Services {
    /// Reads the environment and builds everything from it.
    /// # Errors
    /// Fails when the configuration is invalid or any service cannot be built.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub async fn from_env() -> Result<Self, InitError> {
        let config = Config::from_env()?;
        Self::init(&config).await
    }

    /// Opens the store at the configured path and builds the services on top of it.
    /// # Errors
    /// Fails when the store cannot be opened or migrated, or when a service cannot
    /// be built.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub async fn init(config: &Config) -> Result<Self, InitError> {
        let db = Db::init(&config.database_path).await?;
        Self::with_db(config, db)
    }

    /// Builds the services on an already opened store.
    /// # Errors
    /// Fails when the HTTP client or the moderation filter cannot be built.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub fn with_db(config: &Config, db: Db) -> Result<Self, InitError> {
        let client = HttpClient::new(&config.user_agent, config.max_retries)?;
        let ai: Option<Arc<dyn CompletionService>> = match config.anthropic_api_key.as_deref()
        {
            Some(key) => Some(Arc::new(ClaudeClient::new(
                key,
                config.ai_model.as_str(),
            )?)),
            None => {
                info!("No Anthropic API key configured, AI layers are disabled");
                None
            }
        };

        let policy =
            ReconcilePolicy::default().with_extra_keywords(&config.extra_rejected_keywords);
        let cache = DailyCache::new(
            db.clone(),
            config.cache_timezone,
            config.cache_refresh_hour,
        );
        let filter = DeterministicFilter::new(&ModerationLists::default())?;

        Ok(Self {
            open_library: OpenLibrary::new(client.clone(), config.open_library_url.as_str()),
            gutenberg: Gutenberg::new(client, config.gutenberg_url.as_str()),
            reconciler: Reconciler::new(db.clone(), policy),
            recommender: Recommender::new(
                db.clone(),
                cache,
                ai.clone(),
                config.placeholder_cover.as_str(),
            ),
            moderator: Moderator::new(filter, ai),
            db,
            config: config.clone(),
        })
    }

    /// Recommendations for a user, as many as configured.
    /// # Errors
    /// Fails when the store cannot be read.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn recommendations_for(
        &self,
        user_id: &str,
        favorite_genres: &[String],
    ) -> Result<Vec<BookSummary>, sqlx::Error> {
        self.recommender
            .recommend(user_id, favorite_genres, self.config.recommendation_limit)
            .await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::moderation::Layer;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn services_work_without_ai() {
        let db = Db::init_in_memory().await.unwrap();
        let services = Services::with_db(&Config::default(), db).unwrap();

        let verdict = services.moderator.moderate("A lovely read.").await;
        assert!(verdict.approved);
        assert_eq!(verdict.layer, Layer::Deterministic);

        let none = services
            .recommendations_for("reader", &["fantasy".to_owned()])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn api_key_enables_the_ai_client() {
        let db = Db::init_in_memory().await.unwrap();
        let config = Config::from_lookup(|key| {
            (key == "ANTHROPIC_API_KEY").then(|| "sk-test".to_owned())
        })
        .unwrap();
        let services = Services::with_db(&config, db).unwrap();
        assert!(format!("{:?}", services.moderator).contains("ai: true"));
    }

    #[tokio::test]
    async fn extra_keywords_reach_the_reconciler() {
        let db = Db::init_in_memory().await.unwrap();
        let config = Config::from_lookup(|key| {
            (key == "SHELFMARK_REJECTED_TITLE_KEYWORDS").then(|| "omnibus".to_owned())
        })
        .unwrap();
        let services = Services::with_db(&config, db).unwrap();
        assert!(services.reconciler.policy().rejects_title("The Dune Omnibus"));
    }
}
