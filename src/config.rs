use anyhow::{bail, Context};
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use crate::sentiment::{SentimentClassifier, SentimentPolicy};

/// Runtime settings, taken from flags or their environment variables.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Postgres connection string; required by every database-backed command
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "FEEDBACK_DB_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,

    /// Sentiment rule set applied to new and re-analyzed text
    #[arg(
        long,
        env = "FEEDBACK_SENTIMENT_POLICY",
        value_enum,
        default_value_t = SentimentPolicy::Standard,
        global = true
    )]
    pub policy: SentimentPolicy,

    /// tracing filter directive, e.g. `info` or `feedback_tracker=debug`
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log_filter: String,
}

impl Settings {
    pub fn database_url(&self) -> anyhow::Result<&str> {
        match self.database_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => bail!("DATABASE_URL must be set to a Postgres instance"),
        }
    }

    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        if self.max_connections == 0 {
            bail!("FEEDBACK_DB_MAX_CONNECTIONS must be at least 1");
        }
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(self.database_url()?)
            .await
            .context("failed to connect to Postgres")
    }

    pub fn classifier(&self) -> SentimentClassifier {
        SentimentClassifier::new(self.policy)
    }

    /// Logs go to stderr so stdout stays clean for JSON and CSV output.
    pub fn init_tracing(&self) -> anyhow::Result<()> {
        let filter = EnvFilter::try_new(&self.log_filter)
            .with_context(|| format!("invalid log filter '{}'", self.log_filter))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    }
}
