pub mod backend;
pub mod expansion;
pub mod factory;
pub mod http_client;
pub mod plan;
pub mod stream;
