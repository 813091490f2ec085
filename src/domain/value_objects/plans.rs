use serde::{Deserialize, Serialize};

/// Administrative input for a new plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub duration_days: i32,
    pub credits: i32,
}
