use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::users;

/// A bot user, keyed by the messaging platform's own identifier.
#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserEntity {
    pub id: Uuid,
    pub external_id: i64,
    pub full_name: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

impl UserEntity {
    pub fn new(external_id: i64, full_name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id,
            full_name: full_name.into(),
            phone: phone.into(),
            created_at: Utc::now(),
        }
    }
}
