pub mod animal;
pub mod auth_cmd;
pub mod care;
pub mod common;
pub mod completions;
pub mod config;
pub mod sync;
