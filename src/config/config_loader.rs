use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use super::config_model::{
    BotApi, Database, DotEnvyConfig, ExpirySchedulerSettings, SubscribePoolSettings,
};
use crate::config::stage::Stage;

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

pub fn get_stage() -> Stage {
    dotenvy::dotenv().ok();

    let stage_str = std::env::var("STAGE").unwrap_or("".to_string());
    Stage::try_from(&stage_str).unwrap_or_default()
}

fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<DotEnvyConfig> {
    let database = Database {
        url: required(&lookup, "DATABASE_URL")?,
        max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
    };

    let subscribe_pool = SubscribePoolSettings {
        workers: parse_or(&lookup, "SUBSCRIBE_POOL_WORKERS", 4)?,
        queue_capacity: parse_or(&lookup, "SUBSCRIBE_POOL_QUEUE_CAPACITY", 64)?,
        shutdown_timeout: Duration::from_secs(parse_or(
            &lookup,
            "SUBSCRIBE_POOL_SHUTDOWN_TIMEOUT_SECS",
            10,
        )?),
    };

    let expiry_scheduler = ExpirySchedulerSettings {
        interval: Duration::from_secs(parse_or(&lookup, "EXPIRY_SCHEDULER_INTERVAL_SECS", 3600)?),
        notify_horizon_days: parse_or(&lookup, "EXPIRY_NOTIFY_HORIZON_DAYS", 3_i64)?.max(0),
    };

    let base_url = lookup("BOT_API_URL")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "https://api.telegram.org".to_string());
    let bot_api = BotApi {
        base_url: Url::parse(&base_url).context("BOT_API_URL is invalid")?,
        token: required(&lookup, "BOT_TOKEN")?,
        request_timeout: Duration::from_secs(parse_or(&lookup, "BOT_API_TIMEOUT_SECS", 5)?),
    };

    if subscribe_pool.workers == 0 {
        anyhow::bail!("SUBSCRIBE_POOL_WORKERS must be at least 1");
    }
    if subscribe_pool.queue_capacity == 0 {
        anyhow::bail!("SUBSCRIBE_POOL_QUEUE_CAPACITY must be at least 1");
    }
    if expiry_scheduler.interval.is_zero() {
        anyhow::bail!("EXPIRY_SCHEDULER_INTERVAL_SECS must be at least 1");
    }

    Ok(DotEnvyConfig {
        database,
        subscribe_pool,
        expiry_scheduler,
        bot_api,
    })
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{key} is invalid"))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} is invalid")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load_with(vars: &HashMap<String, String>) -> Result<DotEnvyConfig> {
        load_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let vars = env(&[
            ("DATABASE_URL", "postgres://localhost/bot"),
            ("BOT_TOKEN", "123:abc"),
        ]);

        let config = load_with(&vars).unwrap();

        assert_eq!(config.database.url, "postgres://localhost/bot");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.subscribe_pool.workers, 4);
        assert_eq!(config.subscribe_pool.queue_capacity, 64);
        assert_eq!(config.subscribe_pool.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.expiry_scheduler.interval, Duration::from_secs(3600));
        assert_eq!(config.expiry_scheduler.notify_horizon_days, 3);
        assert_eq!(config.bot_api.base_url.as_str(), "https://api.telegram.org/");
        assert_eq!(config.bot_api.token, "123:abc");
    }

    #[test]
    fn overrides_are_parsed() {
        let vars = env(&[
            ("DATABASE_URL", "postgres://db/bot"),
            ("BOT_TOKEN", "t"),
            ("SUBSCRIBE_POOL_WORKERS", "8"),
            ("SUBSCRIBE_POOL_QUEUE_CAPACITY", " 128 "),
            ("EXPIRY_SCHEDULER_INTERVAL_SECS", "60"),
            ("EXPIRY_NOTIFY_HORIZON_DAYS", "-2"),
            ("BOT_API_URL", "http://localhost:8081"),
        ]);

        let config = load_with(&vars).unwrap();

        assert_eq!(config.subscribe_pool.workers, 8);
        assert_eq!(config.subscribe_pool.queue_capacity, 128);
        assert_eq!(config.expiry_scheduler.interval, Duration::from_secs(60));
        assert_eq!(config.expiry_scheduler.notify_horizon_days, 0);
        assert_eq!(config.bot_api.base_url.as_str(), "http://localhost:8081/");
    }

    #[test]
    fn missing_required_var_names_the_key() {
        let vars = env(&[("BOT_TOKEN", "t")]);
        let err = load_with(&vars).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn malformed_number_names_the_key() {
        let vars = env(&[
            ("DATABASE_URL", "postgres://db/bot"),
            ("BOT_TOKEN", "t"),
            ("SUBSCRIBE_POOL_WORKERS", "many"),
        ]);
        let err = load_with(&vars).unwrap_err();
        assert!(err.to_string().contains("SUBSCRIBE_POOL_WORKERS"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let vars = env(&[
            ("DATABASE_URL", "postgres://db/bot"),
            ("BOT_TOKEN", "t"),
            ("SUBSCRIBE_POOL_WORKERS", "0"),
        ]);
        assert!(load_with(&vars).is_err());
    }

    #[test]
    fn debug_output_hides_the_bot_token() {
        let vars = env(&[
            ("DATABASE_URL", "postgres://db/bot"),
            ("BOT_TOKEN", "super-secret"),
        ]);
        let config = load_with(&vars).unwrap();
        assert!(!format!("{:?}", config).contains("super-secret"));
    }
}
