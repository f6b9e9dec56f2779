use async_trait::async_trait;

use taskmesh_core::api::{ExpansionLookup, ExpansionRequirement, RunParameters};

use crate::http_client::{build_client, parse_json_response, send};

use super::requirements_from_value;

/// Expansion lookup served by an HTTP endpoint.
///
/// Issues `GET {url}?template=<name>&<run params...>`.
pub struct HttpExpansionLookup {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpExpansionLookup {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_ms: u64,
    ) -> anyhow::Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            anyhow::bail!("http expansion lookup requires a url");
        }
        Ok(Self {
            http: build_client(timeout_ms)?,
            url,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ExpansionLookup for HttpExpansionLookup {
    fn name(&self) -> &str {
        "http"
    }

    async fn lookup(
        &self,
        template: &str,
        params: &RunParameters,
    ) -> anyhow::Result<Vec<ExpansionRequirement>> {
        let mut query: Vec<(&str, &str)> = vec![("template", template)];
        query.extend(
            params
                .iter()
                .filter(|(k, _)| k.as_str() != "template")
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        let mut req = self.http.get(&self.url).query(&query);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = send(req, &self.url).await?;
        let value = parse_json_response(resp).await?;
        let requirements = requirements_from_value(value)?;

        tracing::debug!(template, count = requirements.len(), "expansion lookup answered");
        Ok(requirements)
    }
}
