use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use taskmesh_core::api::{ExpansionLookup, ExpansionRequirement, RunParameters};

use super::requirements_from_value;

/// Expansion lookup backed by a JSON file mapping template names to
/// requirement lists. The file is re-read on every lookup.
pub struct FileExpansionLookup {
    path: PathBuf,
}

impl FileExpansionLookup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ExpansionLookup for FileExpansionLookup {
    fn name(&self) -> &str {
        "file"
    }

    async fn lookup(
        &self,
        template: &str,
        _params: &RunParameters,
    ) -> anyhow::Result<Vec<ExpansionRequirement>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| anyhow::anyhow!("read {}: {}", self.path.display(), e))?;
        let mut table: BTreeMap<String, Value> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parse {}: {}", self.path.display(), e))?;

        match table.remove(template) {
            Some(value) => requirements_from_value(value),
            None => Ok(Vec::new()),
        }
    }
}
