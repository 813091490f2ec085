use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    entities::{plans::PlanEntity, subscriptions::SubscriptionEntity, users::UserEntity},
    repositories::{
        plans::PlanRepository, subscriptions::SubscriptionRepository, users::UserRepository,
    },
    value_objects::subscriptions::PlanActiveCount,
};

/// A thread-safe in-memory user store.
///
/// Users are indexed by `external_id`, mirroring the unique constraint of the
/// relational table.
#[derive(Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<i64, UserEntity>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserStore {
    async fn save(&self, user: UserEntity) -> Result<UserEntity> {
        let mut users = self.users.write().await;
        let stored = users
            .entry(user.external_id)
            .and_modify(|existing| {
                existing.full_name = user.full_name.clone();
                existing.phone = user.phone.clone();
            })
            .or_insert(user);
        Ok(stored.clone())
    }

    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<UserEntity>> {
        let users = self.users.read().await;
        Ok(users.get(&external_id).cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>> {
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.id == user_id).cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPlanStore {
    plans: Arc<RwLock<HashMap<Uuid, PlanEntity>>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanStore {
    async fn save(&self, plan: PlanEntity) -> Result<()> {
        let mut plans = self.plans.write().await;
        plans.insert(plan.id, plan);
        Ok(())
    }

    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        let plans = self.plans.read().await;
        Ok(plans.get(&plan_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<PlanEntity>> {
        let plans = self.plans.read().await;
        let mut all: Vec<PlanEntity> = plans.values().cloned().collect();
        all.sort_by_key(|plan| plan.created_at);
        Ok(all)
    }
}

/// A thread-safe in-memory subscription store.
///
/// `decrement_credit` checks and writes under one write-lock acquisition, so
/// concurrent callers can never push a balance below zero.
#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<Uuid, SubscriptionEntity>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionStore {
    async fn save(&self, subscription: SubscriptionEntity) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(&subscription_id).cloned())
    }

    async fn find_active_by_user(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn find_expiring(&self, within_days: i64) -> Result<Vec<SubscriptionEntity>> {
        let now = Utc::now();
        let horizon = now + Duration::days(within_days);
        let subscriptions = self.subscriptions.read().await;
        let mut expiring: Vec<SubscriptionEntity> = subscriptions
            .values()
            .filter(|s| s.is_active && s.expires_at > now && s.expires_at <= horizon)
            .cloned()
            .collect();
        expiring.sort_by_key(|s| s.expires_at);
        Ok(expiring)
    }

    async fn decrement_credit(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut subscriptions = self.subscriptions.write().await;
        let Some(subscription) = subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };

        if subscription.consume_credit() {
            Ok(Some(subscription.clone()))
        } else {
            Ok(None)
        }
    }

    async fn count_active_by_plan(&self) -> Result<Vec<PlanActiveCount>> {
        let subscriptions = self.subscriptions.read().await;
        let mut counts: BTreeMap<Uuid, i64> = BTreeMap::new();
        for subscription in subscriptions.values().filter(|s| s.is_active) {
            *counts.entry(subscription.plan_id).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(plan_id, active_subscriptions)| PlanActiveCount {
                plan_id,
                active_subscriptions,
            })
            .collect())
    }

    async fn sum_active_remaining_credits(&self) -> Result<i64> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .filter(|s| s.is_active)
            .map(|s| i64::from(s.remaining_credits))
            .sum())
    }
}
