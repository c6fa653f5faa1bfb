pub mod audit;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod source;
pub mod ui;
pub mod warehouse;

pub use error::{DeployError, Result};
