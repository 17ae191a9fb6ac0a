//! Domain core shared by the qclog service and CLI.

pub mod configurations;
pub mod error;
pub mod export;
pub mod logs;
pub mod parameters;
pub mod session;
pub mod store;
pub mod validation;
