pub mod expiry_notifications;
pub mod plans;
pub mod subscription_stats;
pub mod subscriptions;
pub mod users;
