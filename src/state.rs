use sqlx::PgPool;

use crate::config::Config;
use crate::notify::Notifier;
use crate::webhook::WebhookClient;

/// Shared handles for request handlers, the socket tasks and the
/// fail-safe sweep.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub notifier: Notifier,
    pub webhook: WebhookClient,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let webhook = WebhookClient::new(config.webhook_url.clone());
        Self {
            pool,
            config,
            notifier: Notifier::new(),
            webhook,
        }
    }
}
