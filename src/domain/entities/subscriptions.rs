use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::entities::plans::PlanEntity;
use crate::infrastructure::postgres::schema::subscriptions;

/// A user's instantiation of a plan.
///
/// `remaining_credits` never drops below zero and `is_active` turns false
/// either when the last credit is spent or when a newer subscription
/// supersedes this one. Rows are never deleted; expiry is a logical state.
#[derive(
    Debug, Clone, PartialEq, Identifiable, Selectable, Queryable, Insertable, AsChangeset,
)]
#[diesel(table_name = subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_credits: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionEntity {
    /// Starts a fresh, active subscription to `plan` at `now`.
    pub fn start(user_id: Uuid, plan: &PlanEntity, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id: plan.id,
            starts_at: now,
            expires_at: now + Duration::days(i64::from(plan.duration_days)),
            remaining_credits: plan.credits.max(0),
            is_active: true,
            created_at: now,
        }
    }

    pub fn has_credits(&self) -> bool {
        self.is_active && self.remaining_credits > 0
    }

    /// Applies one credit deduction in place.
    ///
    /// Returns `false` and leaves the row untouched when nothing can be spent.
    /// Storage adapters call this while holding exclusive access to the row.
    pub fn consume_credit(&mut self) -> bool {
        if !self.has_credits() {
            return false;
        }
        self.remaining_credits -= 1;
        if self.remaining_credits == 0 {
            self.is_active = false;
        }
        true
    }
}
