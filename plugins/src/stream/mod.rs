pub mod opencode;
pub mod sse;

pub use opencode::{extract_session_id, OpencodeEventParser};
pub use sse::{SseDecoder, SseEventFeed};
