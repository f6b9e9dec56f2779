use async_trait::async_trait;
use serde_json::{json, Value};

use taskmesh_core::api::{ExecutionBackend, ExecutionHandle, WorkRequest};

use crate::http_client::{build_client, ensure_success, parse_json_response, send};

/// Starts work on an opencode server.
///
/// Each task gets its own session; the session id is the correlation id the
/// server stamps on every event about that work.
pub struct OpencodeBackend {
    http: reqwest::Client,
    base_url: String,
}

impl OpencodeBackend {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            anyhow::bail!("opencode backend requires a base url");
        }
        Ok(Self {
            http: build_client(timeout_ms)?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_directory(
        req: reqwest::RequestBuilder,
        request: &WorkRequest,
    ) -> reqwest::RequestBuilder {
        match request.working_context.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => req.query(&[("directory", dir)]),
            None => req,
        }
    }

    async fn create_session(&self, request: &WorkRequest) -> anyhow::Result<Value> {
        let url = format!("{}/session", self.base_url);
        let req = self
            .http
            .post(&url)
            .json(&json!({ "title": request.task_id }));
        let resp = send(Self::with_directory(req, request), &url).await?;
        parse_json_response(resp).await
    }

    async fn send_prompt(&self, session_id: &str, request: &WorkRequest) -> anyhow::Result<()> {
        let url = format!("{}/session/{}/prompt_async", self.base_url, session_id);
        let body = json!({
            "parts": [{ "type": "text", "text": compose_prompt(request) }]
        });
        let req = self.http.post(&url).json(&body);
        let resp = send(Self::with_directory(req, request), &url).await?;
        ensure_success(resp).await
    }
}

#[async_trait]
impl ExecutionBackend for OpencodeBackend {
    fn name(&self) -> &str {
        "opencode"
    }

    async fn prepare(&self, request: &WorkRequest) -> anyhow::Result<ExecutionHandle> {
        let session = self.create_session(request).await?;
        let session_id = session
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("session response carries no id: {}", session))?
            .to_string();

        tracing::debug!(
            task_id = %request.task_id,
            session_id = %session_id,
            "opencode session created"
        );

        Ok(ExecutionHandle::new(session_id, request.task_id.clone())
            .with_metadata(json!({ "backend": "opencode", "session": session })))
    }

    async fn dispatch(
        &self,
        handle: &ExecutionHandle,
        request: &WorkRequest,
    ) -> anyhow::Result<()> {
        self.send_prompt(&handle.correlation_id, request).await
    }
}

/// Prompt text for one task; an expansion requirement is appended as JSON.
pub fn compose_prompt(request: &WorkRequest) -> String {
    let Some(requirement) = &request.requirement else {
        return request.instructions.clone();
    };

    let detail =
        serde_json::to_string_pretty(requirement).unwrap_or_else(|_| requirement.id.clone());
    if request.instructions.trim().is_empty() {
        return format!("Requirement:\n```json\n{}\n```", detail);
    }
    format!(
        "{}\n\nRequirement:\n```json\n{}\n```",
        request.instructions.trim_end(),
        detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use taskmesh_core::api::ExpansionRequirement;

    fn request() -> WorkRequest {
        WorkRequest {
            task_id: "docs#r1".to_string(),
            working_context: Some("/srv/project".to_string()),
            instructions: "Extract the document".to_string(),
            requirement: Some(ExpansionRequirement::new("r1").with_parameter("page", 3)),
        }
    }

    #[test]
    fn prompt_appends_requirement() {
        let prompt = compose_prompt(&request());
        assert!(prompt.starts_with("Extract the document\n\nRequirement:"));
        assert!(prompt.contains("\"id\": \"r1\""));
        assert!(prompt.contains("\"page\": 3"));
    }

    #[test]
    fn prompt_without_requirement_is_instructions() {
        let mut req = request();
        req.requirement = None;
        assert_eq!(compose_prompt(&req), "Extract the document");
    }

    #[tokio::test]
    async fn start_work_creates_session_then_prompts() {
        let mut server = Server::new_async().await;
        let session = server
            .mock("POST", "/session")
            .match_query(Matcher::UrlEncoded(
                "directory".into(),
                "/srv/project".into(),
            ))
            .match_body(Matcher::PartialJson(json!({ "title": "docs#r1" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"ses_abc","title":"docs#r1"}"#)
            .create_async()
            .await;
        let prompt = server
            .mock("POST", "/session/ses_abc/prompt_async")
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex("Extract the document".into()))
            .with_status(204)
            .create_async()
            .await;

        let backend = OpencodeBackend::new(server.url(), 1_000).unwrap();
        let handle = backend.start_work(&request()).await.unwrap();

        assert_eq!(handle.correlation_id, "ses_abc");
        assert_eq!(handle.task_id, "docs#r1");
        assert_eq!(handle.metadata["session"]["id"], "ses_abc");
        session.assert_async().await;
        prompt.assert_async().await;
    }

    #[tokio::test]
    async fn prepare_creates_session_without_prompting() {
        let mut server = Server::new_async().await;
        let _session = server
            .mock("POST", "/session")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"ses_early","title":"docs#r1"}"#)
            .create_async()
            .await;
        let prompt = server
            .mock("POST", "/session/ses_early/prompt_async")
            .match_query(Matcher::Any)
            .with_status(204)
            .expect(0)
            .create_async()
            .await;

        let backend = OpencodeBackend::new(server.url(), 1_000).unwrap();
        let handle = backend.prepare(&request()).await.unwrap();

        assert_eq!(handle.correlation_id, "ses_early");
        assert_eq!(handle.metadata["backend"], "opencode");
        prompt.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_prompt_fails_dispatch() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/session/ses_abc/prompt_async")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("unknown model")
            .create_async()
            .await;

        let backend = OpencodeBackend::new(server.url(), 1_000).unwrap();
        let handle = ExecutionHandle::new("ses_abc", "docs#r1");
        let err = backend.dispatch(&handle, &request()).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("status=400"));
        assert!(msg.contains("unknown model"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/session")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("internal failure")
            .create_async()
            .await;

        let backend = OpencodeBackend::new(server.url(), 1_000).unwrap();
        let err = backend.start_work(&request()).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("status=500"));
        assert!(msg.contains("internal failure"));
    }

    #[tokio::test]
    async fn session_without_id_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/session")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"title":"x"}"#)
            .create_async()
            .await;

        let backend = OpencodeBackend::new(server.url(), 1_000).unwrap();
        let err = backend.start_work(&request()).await.unwrap_err();
        assert!(err.to_string().contains("no id"));
    }
}
