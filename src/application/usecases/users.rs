use std::sync::Arc;

use tracing::{error, info};

use crate::application::usecases::subscriptions::{SubscriptionError, UseCaseResult};
use crate::domain::{entities::users::UserEntity, repositories::users::UserRepository};

pub struct UserUseCase {
    user_repo: Arc<dyn UserRepository + Send + Sync>,
}

impl UserUseCase {
    pub fn new(user_repo: Arc<dyn UserRepository + Send + Sync>) -> Self {
        Self { user_repo }
    }

    /// Returns the user registered under `external_id`, creating it on first
    /// contact. An existing record is returned as stored: the supplied name
    /// and phone are discarded rather than merged.
    pub async fn register_or_fetch(
        &self,
        external_id: i64,
        full_name: &str,
        phone: &str,
    ) -> UseCaseResult<UserEntity> {
        let existing = self
            .user_repo
            .find_by_external_id(external_id)
            .await
            .map_err(|err| {
                error!(
                    external_id,
                    db_error = ?err,
                    "users: failed to look up user"
                );
                SubscriptionError::storage("find_user", err)
            })?;

        if let Some(user) = existing {
            info!(external_id, user_id = %user.id, "users: existing user returned");
            return Ok(user);
        }

        let user = self
            .user_repo
            .save(UserEntity::new(external_id, full_name, phone))
            .await
            .map_err(|err| {
                error!(
                    external_id,
                    db_error = ?err,
                    "users: failed to register user"
                );
                SubscriptionError::storage("save_user", err)
            })?;

        info!(external_id, user_id = %user.id, "users: user registered");
        Ok(user)
    }
}
