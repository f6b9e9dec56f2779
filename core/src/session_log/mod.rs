pub mod helpers;
pub mod writer;

pub use helpers::{log_file_name, write_event, write_summary};
pub use writer::{start_session_log, SessionLogSet, SessionLogTx};
