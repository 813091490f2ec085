use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::usecases::subscriptions::{SubscriptionError, UseCaseResult};
use crate::domain::{
    entities::plans::PlanEntity, repositories::plans::PlanRepository,
    value_objects::plans::NewPlan,
};

pub struct PlanUseCase {
    plan_repo: Arc<dyn PlanRepository + Send + Sync>,
}

impl PlanUseCase {
    pub fn new(plan_repo: Arc<dyn PlanRepository + Send + Sync>) -> Self {
        Self { plan_repo }
    }

    pub async fn create_plan(&self, new_plan: NewPlan) -> UseCaseResult<PlanEntity> {
        let name = new_plan.name.trim();
        if name.is_empty() {
            return Err(SubscriptionError::InvalidPlan(
                "name must not be empty".to_string(),
            ));
        }
        if new_plan.duration_days <= 0 {
            return Err(SubscriptionError::InvalidPlan(format!(
                "duration_days must be positive, got {}",
                new_plan.duration_days
            )));
        }
        if new_plan.credits <= 0 {
            return Err(SubscriptionError::InvalidPlan(format!(
                "credits must be positive, got {}",
                new_plan.credits
            )));
        }

        let plan = PlanEntity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            duration_days: new_plan.duration_days,
            credits: new_plan.credits,
            created_at: Utc::now(),
        };

        self.plan_repo.save(plan.clone()).await.map_err(|err| {
            error!(
                plan_name = %plan.name,
                db_error = ?err,
                "plans: failed to save plan"
            );
            SubscriptionError::storage("save_plan", err)
        })?;

        info!(
            plan_id = %plan.id,
            plan_name = %plan.name,
            duration_days = plan.duration_days,
            credits = plan.credits,
            "plans: plan created"
        );
        Ok(plan)
    }

    pub async fn list_plans(&self) -> UseCaseResult<Vec<PlanEntity>> {
        let plans = self.plan_repo.list_all().await.map_err(|err| {
            error!(db_error = ?err, "plans: failed to list plans");
            SubscriptionError::storage("list_plans", err)
        })?;
        if plans.is_empty() {
            warn!("plans: no plans configured");
        }
        Ok(plans)
    }
}
