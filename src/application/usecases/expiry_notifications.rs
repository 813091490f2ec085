use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::application::context::TaskContext;
use crate::domain::{
    entities::subscriptions::SubscriptionEntity,
    repositories::{notifications::NotificationSender, subscriptions::SubscriptionRepository},
    value_objects::notifications::NotificationSweepReport,
};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification sweep cancelled")]
    Cancelled,
    #[error("storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Warns users whose active subscription is about to expire.
///
/// Nothing is remembered between sweeps: a subscription that stays inside the
/// horizon is notified again on every run.
pub struct ExpiryNotificationUseCase {
    subscription_repo: Arc<dyn SubscriptionRepository + Send + Sync>,
    sender: Arc<dyn NotificationSender + Send + Sync>,
    horizon_days: i64,
}

impl ExpiryNotificationUseCase {
    pub fn new(
        subscription_repo: Arc<dyn SubscriptionRepository + Send + Sync>,
        sender: Arc<dyn NotificationSender + Send + Sync>,
        horizon_days: i64,
    ) -> Self {
        Self {
            subscription_repo,
            sender,
            horizon_days: horizon_days.max(0),
        }
    }

    pub async fn check_and_notify(
        &self,
        ctx: &TaskContext,
    ) -> Result<NotificationSweepReport, NotificationError> {
        if ctx.is_cancelled() {
            return Err(NotificationError::Cancelled);
        }

        let expiring = self
            .subscription_repo
            .find_expiring(self.horizon_days)
            .await
            .map_err(|err| {
                error!(
                    horizon_days = self.horizon_days,
                    db_error = ?err,
                    "expiry_notifications: failed to load expiring subscriptions"
                );
                NotificationError::Storage {
                    operation: "find_expiring",
                    source: err,
                }
            })?;

        let mut report = NotificationSweepReport {
            scanned: expiring.len(),
            ..Default::default()
        };

        if expiring.is_empty() {
            info!(
                horizon_days = self.horizon_days,
                "expiry_notifications: no subscriptions expiring"
            );
            return Ok(report);
        }

        for subscription in &expiring {
            if ctx.is_cancelled() {
                warn!(
                    sent = report.sent,
                    failed = report.failed,
                    remaining = report.scanned - report.sent - report.failed,
                    "expiry_notifications: sweep cancelled"
                );
                return Err(NotificationError::Cancelled);
            }

            let message = expiry_message(subscription);
            let sent = tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                sent = self.sender.send(subscription.user_id, &message) => Some(sent),
            };

            match sent {
                None => {
                    warn!(
                        user_id = %subscription.user_id,
                        sent = report.sent,
                        failed = report.failed,
                        "expiry_notifications: sweep cancelled during send"
                    );
                    return Err(NotificationError::Cancelled);
                }
                Some(Ok(())) => report.sent += 1,
                Some(Err(err)) => {
                    error!(
                        user_id = %subscription.user_id,
                        subscription_id = %subscription.id,
                        error = %err,
                        "expiry_notifications: failed to notify user"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            sent = report.sent,
            failed = report.failed,
            "expiry_notifications: sweep finished"
        );
        Ok(report)
    }
}

fn expiry_message(subscription: &SubscriptionEntity) -> String {
    format!(
        "Your subscription expires on {} UTC. Remaining credits: {}.",
        subscription.expires_at.format("%Y-%m-%d %H:%M"),
        subscription.remaining_credits
    )
}
