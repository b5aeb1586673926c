use anyhow::Context;
use tracing::warn;

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub cors_origin: String,
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres connection string")?;

        let port = match std::env::var("PORT") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("invalid PORT value: {value}"))?,
            Err(_) => 4000,
        };

        let cors_origin = std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".to_string());

        let webhook_url = std::env::var("WEBHOOK_URL").ok();
        if webhook_url.is_none() {
            warn!("WEBHOOK_URL not configured; failed check-ins will not notify mentors");
        }

        Ok(Self {
            port,
            database_url,
            cors_origin,
            webhook_url,
        })
    }
}
