use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

/// Delivers a text message to a user over the bot.
#[automock]
#[async_trait]
pub trait NotificationSender {
    async fn send(&self, user_id: Uuid, message: &str) -> Result<()>;
}
