pub mod config;
pub mod error;
pub mod pipeline_log;
pub mod store;
pub mod text;
pub mod types;
