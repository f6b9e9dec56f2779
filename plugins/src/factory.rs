use std::sync::Arc;

use anyhow::Result;

use taskmesh_core::api::{
    AppConfig, EventFeed, ExecutionBackend, ExpansionConfig, ExpansionLookup,
};

use crate::backend::OpencodeBackend;
use crate::expansion::{FileExpansionLookup, HttpExpansionLookup};
use crate::stream::SseEventFeed;

pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn ExecutionBackend>> {
    match cfg.backend.kind.trim() {
        "" | "opencode" => Ok(Arc::new(OpencodeBackend::new(
            cfg.backend.base_url.clone(),
            cfg.backend.request_timeout_ms,
        )?)),
        other => anyhow::bail!("unsupported backend kind: {}", other),
    }
}

/// Event subscription matching the configured backend.
pub fn build_event_feed(cfg: &AppConfig) -> Result<Box<dyn EventFeed>> {
    match cfg.backend.kind.trim() {
        "" | "opencode" => Ok(Box::new(SseEventFeed::new(&cfg.backend.base_url)?)),
        other => anyhow::bail!("unsupported backend kind: {}", other),
    }
}

pub fn build_expansion_lookup(cfg: &AppConfig) -> Result<Option<Arc<dyn ExpansionLookup>>> {
    match &cfg.expansion {
        ExpansionConfig::None => Ok(None),
        ExpansionConfig::Http(http) => Ok(Some(Arc::new(HttpExpansionLookup::new(
            http.url.clone(),
            http.api_key.clone(),
            http.timeout_ms,
        )?))),
        ExpansionConfig::File(file) => Ok(Some(Arc::new(FileExpansionLookup::new(&file.path)))),
    }
}
