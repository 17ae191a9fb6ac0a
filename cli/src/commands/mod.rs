pub mod config;
pub mod entry;
pub mod export;
pub mod health;
pub mod log;
pub mod parameter;
