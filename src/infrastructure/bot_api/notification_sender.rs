use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::domain::repositories::{notifications::NotificationSender, users::UserRepository};

const MESSAGE_LIMIT: usize = 4096;

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Delivers notifications as chat messages through the bot HTTP API.
///
/// Users are addressed by their internal id; the chat id is the user's
/// `external_id`.
pub struct BotApiNotificationSender {
    send_message_url: Url,
    client: Client,
    user_repo: Arc<dyn UserRepository + Send + Sync>,
}

impl BotApiNotificationSender {
    pub fn new(
        api_base_url: &Url,
        bot_token: &str,
        request_timeout: Duration,
        user_repo: Arc<dyn UserRepository + Send + Sync>,
    ) -> Result<Self> {
        let send_message_url = send_message_url(api_base_url, bot_token)?;
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build bot API client")?;

        Ok(Self {
            send_message_url,
            client,
            user_repo,
        })
    }
}

#[async_trait]
impl NotificationSender for BotApiNotificationSender {
    async fn send(&self, user_id: Uuid, message: &str) -> Result<()> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| anyhow!("no user {user_id} to notify"))?;

        let response = self
            .client
            .post(self.send_message_url.clone())
            .json(&json!({
                "chat_id": user.external_id,
                "text": truncate_message(message),
            }))
            .send()
            .await
            .map_err(sanitize_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.map_err(sanitize_reqwest_error)?;
        check_send_response(status, &body)?;

        debug!(%user_id, chat_id = user.external_id, "bot_api: message delivered");
        Ok(())
    }
}

fn check_send_response(status: StatusCode, body: &str) -> Result<()> {
    match serde_json::from_str::<BotApiResponse>(body) {
        Ok(BotApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
        Ok(response) => Err(anyhow!(
            "bot API rejected sendMessage ({}): {}",
            status,
            response
                .description
                .unwrap_or_else(|| "no description".to_string())
        )),
        Err(_) => Err(anyhow!(
            "bot API returned a non-JSON response to sendMessage ({})",
            status
        )),
    }
}

fn send_message_url(api_base_url: &Url, bot_token: &str) -> Result<Url> {
    let token = bot_token.trim();
    if token.is_empty() {
        return Err(anyhow!("bot token is empty"));
    }

    // `join` replaces the last path segment unless the base ends in `/`.
    let mut base = api_base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(&format!("bot{token}/sendMessage"))
        .context("failed to build sendMessage URL")
}

// The request URL embeds the bot token, so reqwest's own error text is never
// forwarded.
fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("bot API request timed out");
    }
    if error.is_connect() {
        return anyhow!("bot API connection failed");
    }
    if error.is_decode() {
        return anyhow!("bot API returned an unreadable response");
    }
    anyhow!("bot API request failed")
}

fn truncate_message(message: &str) -> String {
    const SUFFIX: &str = "…";

    if message.chars().count() <= MESSAGE_LIMIT {
        return message.to_string();
    }

    let allowed = MESSAGE_LIMIT.saturating_sub(SUFFIX.chars().count());
    let mut truncated: String = message.chars().take(allowed).collect();
    truncated.push_str(SUFFIX);
    truncated
}
