pub mod configurations;
pub mod health;
pub mod logs;
pub mod parameters;
