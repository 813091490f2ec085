use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub database: Database,
    pub subscribe_pool: SubscribePoolSettings,
    pub expiry_scheduler: ExpirySchedulerSettings,
    pub bot_api: BotApi,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SubscribePoolSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ExpirySchedulerSettings {
    pub interval: Duration,
    pub notify_horizon_days: i64,
}

#[derive(Clone)]
pub struct BotApi {
    pub base_url: Url,
    pub token: String,
    pub request_timeout: Duration,
}

// Keeps the token out of `{:?}` output.
impl std::fmt::Debug for BotApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApi")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
