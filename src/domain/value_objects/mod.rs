pub mod enums;
pub mod notifications;
pub mod plans;
pub mod subscriptions;
