pub mod opencode;

pub use opencode::{compose_prompt, OpencodeBackend};
