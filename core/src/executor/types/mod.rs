pub mod config;
pub mod result;
pub mod state;
pub mod task;

pub use config::*;
pub use result::*;
pub use state::*;
pub use task::*;
