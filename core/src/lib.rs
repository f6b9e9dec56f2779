pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod session_log;
pub mod stream;
