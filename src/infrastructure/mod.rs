pub mod bot_api;
pub mod in_memory;
pub mod postgres;
