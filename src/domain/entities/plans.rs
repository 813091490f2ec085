use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::plans;

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = plans)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PlanEntity {
    pub id: Uuid,
    pub name: String,
    pub duration_days: i32,
    pub credits: i32,
    pub created_at: DateTime<Utc>,
}
