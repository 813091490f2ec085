use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mockall::automock;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::context::TaskContext;
use crate::domain::{
    entities::subscriptions::SubscriptionEntity,
    repositories::{
        plans::PlanRepository, subscriptions::SubscriptionRepository, users::UserRepository,
    },
    value_objects::enums::entity_kinds::EntityKind,
};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("{0} not found")]
    NotFound(EntityKind),
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl SubscriptionError {
    pub fn storage(operation: &'static str, source: anyhow::Error) -> Self {
        SubscriptionError::Storage { operation, source }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

pub(crate) fn ensure_not_cancelled(ctx: &TaskContext) -> UseCaseResult<()> {
    if ctx.is_cancelled() {
        return Err(SubscriptionError::Cancelled);
    }
    Ok(())
}

/// The unit of work a subscribe worker runs for each queued task.
#[automock]
#[async_trait]
pub trait SubscribeExecutor {
    async fn subscribe(
        &self,
        ctx: &TaskContext,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> UseCaseResult<SubscriptionEntity>;
}

/// Creates subscriptions and spends their credits.
///
/// `subscribe` runs several persistence steps without a surrounding
/// transaction. If saving the new row fails after the previous subscription
/// was deactivated, the user is left with no active subscription until the
/// operation is resubmitted. Cancellation is honoured up to the first write;
/// once the previous subscription is deactivated the new one is always saved.
/// Two concurrent subscribes for the same user are last-write-wins: either
/// subscription may end up active.
pub struct SubscriptionUseCase {
    user_repo: Arc<dyn UserRepository + Send + Sync>,
    plan_repo: Arc<dyn PlanRepository + Send + Sync>,
    subscription_repo: Arc<dyn SubscriptionRepository + Send + Sync>,
}

impl SubscriptionUseCase {
    pub fn new(
        user_repo: Arc<dyn UserRepository + Send + Sync>,
        plan_repo: Arc<dyn PlanRepository + Send + Sync>,
        subscription_repo: Arc<dyn SubscriptionRepository + Send + Sync>,
    ) -> Self {
        Self {
            user_repo,
            plan_repo,
            subscription_repo,
        }
    }

    pub async fn subscribe(
        &self,
        ctx: &TaskContext,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> UseCaseResult<SubscriptionEntity> {
        info!(%user_id, %plan_id, "subscriptions: subscribe requested");
        ensure_not_cancelled(ctx)?;

        self.user_repo
            .find_by_id(user_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    db_error = ?err,
                    "subscriptions: failed to load user"
                );
                SubscriptionError::storage("find_user", err)
            })?
            .ok_or_else(|| {
                warn!(%user_id, "subscriptions: user not found");
                SubscriptionError::NotFound(EntityKind::User)
            })?;

        let plan = self
            .plan_repo
            .find_by_id(plan_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %plan_id,
                    db_error = ?err,
                    "subscriptions: failed to load plan"
                );
                SubscriptionError::storage("find_plan", err)
            })?
            .ok_or_else(|| {
                warn!(%user_id, %plan_id, "subscriptions: plan not found");
                SubscriptionError::NotFound(EntityKind::Plan)
            })?;

        let current = self
            .subscription_repo
            .find_active_by_user(user_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    db_error = ?err,
                    "subscriptions: failed to load active subscription"
                );
                SubscriptionError::storage("find_active_subscription", err)
            })?;

        // Last point at which cancelling leaves storage untouched.
        ensure_not_cancelled(ctx)?;

        if let Some(mut previous) = current {
            let previous_id = previous.id;
            previous.is_active = false;
            self.subscription_repo.save(previous).await.map_err(|err| {
                error!(
                    %user_id,
                    subscription_id = %previous_id,
                    db_error = ?err,
                    "subscriptions: failed to deactivate previous subscription"
                );
                SubscriptionError::storage("deactivate_subscription", err)
            })?;
            info!(
                %user_id,
                subscription_id = %previous_id,
                "subscriptions: previous subscription deactivated"
            );
        }

        let subscription = SubscriptionEntity::start(user_id, &plan, Utc::now());
        self.subscription_repo
            .save(subscription.clone())
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %plan_id,
                    db_error = ?err,
                    "subscriptions: failed to save new subscription"
                );
                SubscriptionError::storage("save_subscription", err)
            })?;

        info!(
            %user_id,
            %plan_id,
            subscription_id = %subscription.id,
            remaining_credits = subscription.remaining_credits,
            expires_at = %subscription.expires_at,
            "subscriptions: subscription activated"
        );
        Ok(subscription)
    }

    /// Spends one credit of `subscription`.
    ///
    /// The balance check and the write are delegated to the store's atomic
    /// `decrement_credit`, so the passed snapshot only short-circuits calls
    /// that can never succeed.
    pub async fn deduct_credit(
        &self,
        ctx: &TaskContext,
        subscription: &SubscriptionEntity,
    ) -> UseCaseResult<SubscriptionEntity> {
        let subscription_id = subscription.id;
        ensure_not_cancelled(ctx)?;

        if !subscription.has_credits() {
            debug!(
                %subscription_id,
                remaining_credits = subscription.remaining_credits,
                is_active = subscription.is_active,
                "subscriptions: snapshot has no spendable credits"
            );
            return Err(SubscriptionError::InsufficientCredits);
        }

        let updated = self
            .subscription_repo
            .decrement_credit(subscription_id)
            .await
            .map_err(|err| {
                error!(
                    %subscription_id,
                    db_error = ?err,
                    "subscriptions: failed to decrement credit"
                );
                SubscriptionError::storage("decrement_credit", err)
            })?;

        match updated {
            Some(updated) => {
                debug!(
                    %subscription_id,
                    remaining_credits = updated.remaining_credits,
                    is_active = updated.is_active,
                    "subscriptions: credit deducted"
                );
                if !updated.is_active {
                    info!(%subscription_id, "subscriptions: credits exhausted, subscription deactivated");
                }
                Ok(updated)
            }
            None => {
                let exists = self
                    .subscription_repo
                    .find_by_id(subscription_id)
                    .await
                    .map_err(|err| {
                        error!(
                            %subscription_id,
                            db_error = ?err,
                            "subscriptions: failed to reload subscription"
                        );
                        SubscriptionError::storage("find_subscription", err)
                    })?
                    .is_some();

                if exists {
                    Err(SubscriptionError::InsufficientCredits)
                } else {
                    warn!(%subscription_id, "subscriptions: subscription not found");
                    Err(SubscriptionError::NotFound(EntityKind::Subscription))
                }
            }
        }
    }
}

#[async_trait]
impl SubscribeExecutor for SubscriptionUseCase {
    async fn subscribe(
        &self,
        ctx: &TaskContext,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> UseCaseResult<SubscriptionEntity> {
        SubscriptionUseCase::subscribe(self, ctx, user_id, plan_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        entities::{plans::PlanEntity, users::UserEntity},
        repositories::{
            plans::MockPlanRepository, subscriptions::MockSubscriptionRepository,
            users::MockUserRepository,
        },
    };
    use crate::infrastructure::in_memory::{
        InMemoryPlanStore, InMemorySubscriptionStore, InMemoryUserStore,
    };
    use chrono::Duration;
    use mockall::predicate::eq;

    fn sample_plan(duration_days: i32, credits: i32) -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            name: "Weekly".to_string(),
            duration_days,
            credits,
            created_at: Utc::now(),
        }
    }

    fn sample_user(user_id: Uuid) -> UserEntity {
        UserEntity {
            id: user_id,
            ..UserEntity::new(1001, "Test User", "0800000000")
        }
    }

    fn known_user_repo(user_id: Uuid) -> MockUserRepository {
        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_find_by_id()
            .with(eq(user_id))
            .returning(move |id| Ok(Some(sample_user(id))));
        user_repo
    }

    struct InMemoryFixture {
        usecase: SubscriptionUseCase,
        subscriptions: InMemorySubscriptionStore,
        users: InMemoryUserStore,
    }

    impl InMemoryFixture {
        async fn new(plan: &PlanEntity) -> Self {
            let plans = InMemoryPlanStore::new();
            plans.save(plan.clone()).await.unwrap();
            let subscriptions = InMemorySubscriptionStore::new();
            let users = InMemoryUserStore::new();
            let usecase = SubscriptionUseCase::new(
                Arc::new(users.clone()),
                Arc::new(plans),
                Arc::new(subscriptions.clone()),
            );
            Self {
                usecase,
                subscriptions,
                users,
            }
        }

        async fn register_user(&self, external_id: i64) -> Uuid {
            self.users
                .save(UserEntity::new(external_id, "Test User", "0800000000"))
                .await
                .unwrap()
                .id
        }
    }

    #[tokio::test]
    async fn subscribe_then_spend_every_credit() {
        let plan = sample_plan(7, 3);
        let fixture = InMemoryFixture::new(&plan).await;
        let usecase = &fixture.usecase;
        let ctx = TaskContext::new();
        let user_id = fixture.register_user(1).await;

        let before = Utc::now();
        let subscription = usecase.subscribe(&ctx, user_id, plan.id).await.unwrap();

        assert_eq!(subscription.remaining_credits, 3);
        assert!(subscription.is_active);
        let expected_expiry = before + Duration::days(7);
        assert!((subscription.expires_at - expected_expiry).num_seconds().abs() < 5);

        let mut current = subscription;
        for expected_left in [2, 1, 0] {
            current = usecase.deduct_credit(&ctx, &current).await.unwrap();
            assert_eq!(current.remaining_credits, expected_left);
        }
        assert!(!current.is_active);

        let stored = fixture
            .subscriptions
            .find_by_id(current.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.remaining_credits, 0);
        assert!(!stored.is_active);

        let err = usecase.deduct_credit(&ctx, &current).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::InsufficientCredits));
    }

    #[tokio::test]
    async fn subscribe_deactivates_previous_subscription() {
        let plan = sample_plan(30, 10);
        let fixture = InMemoryFixture::new(&plan).await;
        let ctx = TaskContext::new();
        let user_id = fixture.register_user(2).await;

        let first = fixture.usecase.subscribe(&ctx, user_id, plan.id).await.unwrap();
        let second = fixture.usecase.subscribe(&ctx, user_id, plan.id).await.unwrap();

        let first_stored = fixture.subscriptions.find_by_id(first.id).await.unwrap().unwrap();
        assert!(!first_stored.is_active);
        assert_eq!(first_stored.remaining_credits, 10);

        let active = fixture
            .subscriptions
            .find_active_by_user(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
    }

    #[tokio::test]
    async fn subscribe_fails_for_unknown_plan() {
        let fixture = InMemoryFixture::new(&sample_plan(7, 3)).await;
        let user_id = fixture.register_user(3).await;

        let err = fixture
            .usecase
            .subscribe(&TaskContext::new(), user_id, Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::NotFound(EntityKind::Plan)));
    }

    #[tokio::test]
    async fn subscribe_fails_for_unknown_user() {
        let plan = sample_plan(7, 3);
        let fixture = InMemoryFixture::new(&plan).await;
        let unknown_user = Uuid::new_v4();

        let err = fixture
            .usecase
            .subscribe(&TaskContext::new(), unknown_user, plan.id)
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::NotFound(EntityKind::User)));
        assert!(
            fixture
                .subscriptions
                .find_active_by_user(unknown_user)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn cancelled_subscribe_never_touches_storage() {
        // Mocks without expectations panic if any method is called.
        let usecase = SubscriptionUseCase::new(
            Arc::new(MockUserRepository::new()),
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockSubscriptionRepository::new()),
        );
        let ctx = TaskContext::new();
        ctx.cancel();

        let err = usecase
            .subscribe(&ctx, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_after_deactivation_still_saves_new_subscription() {
        let plan = sample_plan(30, 5);
        let user_id = Uuid::new_v4();
        let previous = SubscriptionEntity::start(user_id, &plan, Utc::now());
        let ctx = TaskContext::new();

        let mut plan_repo = MockPlanRepository::new();
        let plan_clone = plan.clone();
        plan_repo
            .expect_find_by_id()
            .with(eq(plan.id))
            .returning(move |_| Ok(Some(plan_clone.clone())));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_active_by_user()
            .with(eq(user_id))
            .returning(move |_| Ok(Some(previous.clone())));
        let cancel_handle = ctx.clone();
        let mut saves = 0;
        subscription_repo
            .expect_save()
            .times(2)
            .returning(move |saved| {
                saves += 1;
                if saves == 1 {
                    assert!(!saved.is_active);
                    // The caller gives up right after the deactivation is written.
                    cancel_handle.cancel();
                } else {
                    assert!(saved.is_active);
                }
                Ok(())
            });

        let usecase = SubscriptionUseCase::new(
            Arc::new(known_user_repo(user_id)),
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
        );

        let subscription = usecase.subscribe(&ctx, user_id, plan.id).await.unwrap();

        assert!(ctx.is_cancelled());
        assert!(subscription.is_active);
        assert_eq!(subscription.remaining_credits, 5);
    }

    #[tokio::test]
    async fn cancel_before_deactivation_leaves_previous_active() {
        let plan = sample_plan(30, 5);
        let user_id = Uuid::new_v4();
        let previous = SubscriptionEntity::start(user_id, &plan, Utc::now());
        let ctx = TaskContext::new();

        let mut plan_repo = MockPlanRepository::new();
        let plan_clone = plan.clone();
        plan_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(plan_clone.clone())));

        let cancel_handle = ctx.clone();
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_active_by_user()
            .returning(move |_| {
                cancel_handle.cancel();
                Ok(Some(previous.clone()))
            });
        subscription_repo.expect_save().never();

        let usecase = SubscriptionUseCase::new(
            Arc::new(known_user_repo(user_id)),
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
        );

        let err = usecase.subscribe(&ctx, user_id, plan.id).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::Cancelled));
    }

    #[tokio::test]
    async fn failed_save_after_deactivation_surfaces_storage_error() {
        let plan = sample_plan(30, 5);
        let user_id = Uuid::new_v4();
        let previous = SubscriptionEntity::start(user_id, &plan, Utc::now());

        let mut plan_repo = MockPlanRepository::new();
        let plan_clone = plan.clone();
        plan_repo
            .expect_find_by_id()
            .with(eq(plan.id))
            .returning(move |_| Ok(Some(plan_clone.clone())));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_active_by_user()
            .with(eq(user_id))
            .returning(move |_| Ok(Some(previous.clone())));
        let mut saves = 0;
        subscription_repo.expect_save().times(2).returning(move |saved| {
            saves += 1;
            if saves == 1 {
                assert!(!saved.is_active);
                Ok(())
            } else {
                Err(anyhow::anyhow!("connection reset"))
            }
        });

        let usecase = SubscriptionUseCase::new(
            Arc::new(known_user_repo(user_id)),
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
        );

        let err = usecase
            .subscribe(&TaskContext::new(), user_id, plan.id)
            .await
            .unwrap_err();

        match err {
            SubscriptionError::Storage { operation, .. } => {
                assert_eq!(operation, "save_subscription")
            }
            other => panic!("expected storage failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn user_lookup_failure_is_a_storage_error() {
        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_find_by_id()
            .returning(|_| Err(anyhow::anyhow!("pool timed out")));

        let usecase = SubscriptionUseCase::new(
            Arc::new(user_repo),
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockSubscriptionRepository::new()),
        );

        let err = usecase
            .subscribe(&TaskContext::new(), Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SubscriptionError::Storage {
                operation: "find_user",
                ..
            }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deductions_never_overspend() {
        let plan = sample_plan(30, 5);
        let fixture = InMemoryFixture::new(&plan).await;
        let user_id = fixture.register_user(4).await;
        let InMemoryFixture {
            usecase,
            subscriptions: store,
            ..
        } = fixture;
        let usecase = Arc::new(usecase);
        let ctx = TaskContext::new();
        let subscription = usecase.subscribe(&ctx, user_id, plan.id).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let usecase = Arc::clone(&usecase);
            let ctx = ctx.clone();
            let snapshot = subscription.clone();
            handles.push(tokio::spawn(async move {
                usecase.deduct_credit(&ctx, &snapshot).await
            }));
        }

        let mut successes = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(updated) => {
                    assert!(updated.remaining_credits >= 0);
                    successes += 1;
                }
                Err(SubscriptionError::InsufficientCredits) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(successes, 5);
        assert_eq!(insufficient, 3);

        let stored = store.find_by_id(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.remaining_credits, 0);
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn deduct_credit_propagates_storage_failure() {
        let plan = sample_plan(30, 5);
        let subscription = SubscriptionEntity::start(Uuid::new_v4(), &plan, Utc::now());

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_decrement_credit()
            .with(eq(subscription.id))
            .returning(|_| Err(anyhow::anyhow!("deadlock detected")));

        let usecase = SubscriptionUseCase::new(
            Arc::new(MockUserRepository::new()),
            Arc::new(MockPlanRepository::new()),
            Arc::new(subscription_repo),
        );

        let err = usecase
            .deduct_credit(&TaskContext::new(), &subscription)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SubscriptionError::Storage {
                operation: "decrement_credit",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn deduct_credit_reports_missing_subscription() {
        let plan = sample_plan(30, 5);
        let fixture = InMemoryFixture::new(&plan).await;
        let never_saved = SubscriptionEntity::start(Uuid::new_v4(), &plan, Utc::now());

        let err = fixture
            .usecase
            .deduct_credit(&TaskContext::new(), &never_saved)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SubscriptionError::NotFound(EntityKind::Subscription)
        ));
    }

    #[tokio::test]
    async fn deduct_credit_refuses_inactive_snapshot() {
        let plan = sample_plan(30, 5);
        let mut subscription = SubscriptionEntity::start(Uuid::new_v4(), &plan, Utc::now());
        subscription.is_active = false;

        let usecase = SubscriptionUseCase::new(
            Arc::new(MockUserRepository::new()),
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockSubscriptionRepository::new()),
        );

        let err = usecase
            .deduct_credit(&TaskContext::new(), &subscription)
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::InsufficientCredits));
    }
}
