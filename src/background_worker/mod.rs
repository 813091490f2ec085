pub mod expiry_scheduler;
pub mod subscribe_pool;
