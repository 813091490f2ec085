use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of active subscriptions currently held on one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanActiveCount {
    pub plan_id: Uuid,
    pub active_subscriptions: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub active_by_plan: Vec<PlanActiveCount>,
    pub total_active_subscriptions: i64,
    pub total_remaining_credits: i64,
}
