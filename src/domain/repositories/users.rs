use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::users::UserEntity;

#[automock]
#[async_trait]
pub trait UserRepository {
    /// Upserts on `external_id`; an existing row keeps its id but takes the
    /// supplied name and phone. Returns the stored row.
    async fn save(&self, user: UserEntity) -> Result<UserEntity>;
    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<UserEntity>>;
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>>;
}
