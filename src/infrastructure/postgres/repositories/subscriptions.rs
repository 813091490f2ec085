use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use diesel::{
    OptionalExtension, RunQueryDsl,
    dsl::{count_star, sum},
    insert_into,
    prelude::*,
    update,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::SubscriptionEntity,
        repositories::subscriptions::SubscriptionRepository,
        value_objects::subscriptions::PlanActiveCount,
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::subscriptions},
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn save(&self, subscription: SubscriptionEntity) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        insert_into(subscriptions::table)
            .values(&subscription)
            .on_conflict(subscriptions::id)
            .do_update()
            .set(&subscription)
            .execute(&mut conn)?;

        Ok(())
    }

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .find(subscription_id)
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_active_by_user(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .filter(subscriptions::is_active.eq(true))
            .order(subscriptions::created_at.desc())
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_expiring(&self, within_days: i64) -> Result<Vec<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();
        let horizon = now + Duration::days(within_days);

        let rows = subscriptions::table
            .filter(subscriptions::is_active.eq(true))
            .filter(subscriptions::expires_at.gt(now))
            .filter(subscriptions::expires_at.le(horizon))
            .order(subscriptions::expires_at.asc())
            .select(SubscriptionEntity::as_select())
            .load::<SubscriptionEntity>(&mut conn)?;

        Ok(rows)
    }

    async fn decrement_credit(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // SET expressions read the pre-update row, so `remaining_credits > 1`
        // is true exactly when at least one credit is left afterwards.
        let result = update(subscriptions::table)
            .filter(subscriptions::id.eq(subscription_id))
            .filter(subscriptions::is_active.eq(true))
            .filter(subscriptions::remaining_credits.gt(0))
            .set((
                subscriptions::remaining_credits.eq(subscriptions::remaining_credits - 1),
                subscriptions::is_active.eq(subscriptions::remaining_credits.gt(1)),
            ))
            .returning(SubscriptionEntity::as_returning())
            .get_result::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn count_active_by_plan(&self) -> Result<Vec<PlanActiveCount>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = subscriptions::table
            .filter(subscriptions::is_active.eq(true))
            .group_by(subscriptions::plan_id)
            .select((subscriptions::plan_id, count_star()))
            .order(subscriptions::plan_id.asc())
            .load::<(Uuid, i64)>(&mut conn)?;

        Ok(rows
            .into_iter()
            .map(|(plan_id, active_subscriptions)| PlanActiveCount {
                plan_id,
                active_subscriptions,
            })
            .collect())
    }

    async fn sum_active_remaining_credits(&self) -> Result<i64> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let total = subscriptions::table
            .filter(subscriptions::is_active.eq(true))
            .select(sum(subscriptions::remaining_credits))
            .first::<Option<i64>>(&mut conn)?;

        Ok(total.unwrap_or(0))
    }
}
