use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscriptions::SubscriptionEntity;
use crate::domain::value_objects::subscriptions::PlanActiveCount;

#[automock]
#[async_trait]
pub trait SubscriptionRepository {
    /// Upsert by id.
    async fn save(&self, subscription: SubscriptionEntity) -> Result<()>;

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    async fn find_active_by_user(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    /// Active subscriptions whose expiry falls within `within_days` from now.
    async fn find_expiring(&self, within_days: i64) -> Result<Vec<SubscriptionEntity>>;

    /// Spends one credit if, and only if, the subscription is active and has
    /// credits left, deactivating it when the balance reaches zero. The check
    /// and the write happen as one step. Returns the updated row, or `None`
    /// when nothing was applied.
    async fn decrement_credit(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    async fn count_active_by_plan(&self) -> Result<Vec<PlanActiveCount>>;

    async fn sum_active_remaining_credits(&self) -> Result<i64>;
}
