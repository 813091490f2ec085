use std::sync::Arc;

use tracing::{error, info};

use crate::application::usecases::subscriptions::{SubscriptionError, UseCaseResult};
use crate::domain::{
    repositories::subscriptions::SubscriptionRepository,
    value_objects::subscriptions::SubscriptionStats,
};

/// Read-only aggregates for the admin dashboard.
pub struct SubscriptionStatsUseCase {
    subscription_repo: Arc<dyn SubscriptionRepository + Send + Sync>,
}

impl SubscriptionStatsUseCase {
    pub fn new(subscription_repo: Arc<dyn SubscriptionRepository + Send + Sync>) -> Self {
        Self { subscription_repo }
    }

    pub async fn get_stats(&self) -> UseCaseResult<SubscriptionStats> {
        let active_by_plan = self
            .subscription_repo
            .count_active_by_plan()
            .await
            .map_err(|err| {
                error!(db_error = ?err, "subscription_stats: failed to count active subscriptions");
                SubscriptionError::storage("count_active_by_plan", err)
            })?;

        let total_remaining_credits = self
            .subscription_repo
            .sum_active_remaining_credits()
            .await
            .map_err(|err| {
                error!(db_error = ?err, "subscription_stats: failed to sum remaining credits");
                SubscriptionError::storage("sum_active_remaining_credits", err)
            })?;

        let total_active_subscriptions: i64 = active_by_plan
            .iter()
            .map(|count| count.active_subscriptions)
            .sum();

        info!(
            plan_count = active_by_plan.len(),
            total_active_subscriptions,
            total_remaining_credits,
            "subscription_stats: stats loaded"
        );

        Ok(SubscriptionStats {
            active_by_plan,
            total_active_subscriptions,
            total_remaining_credits,
        })
    }
}
