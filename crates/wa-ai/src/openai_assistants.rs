use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    retry::{is_retryable_http_error, parse_retry_after_ms, retry_delay_ms, should_retry_status},
    thread_cache::{ThreadCache, ThreadKey},
    AssistantBinding, AssistantDirectory, AssistantGateway, AssistantReply, WaAiError,
};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const OPENAI_BETA_HEADER: &str = "openai-beta";
const OPENAI_BETA_ASSISTANTS_V2: &str = "assistants=v2";
const RETRY_ATTEMPT_HEADER: &str = "x-wa-retry-attempt";
const PENDING_RUN_STATUSES: &[&str] = &["queued", "in_progress", "cancelling"];

#[derive(Debug, Clone)]
/// Public struct `OpenAiAssistantConfig` used by the bridge runtime.
pub struct OpenAiAssistantConfig {
    pub api_base: String,
    pub default_api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_jitter: bool,
    pub run_poll_interval_ms: u64,
    pub run_max_polls: usize,
    /// Cached threads unused for this long are dropped.
    pub thread_idle_ttl_ms: u64,
    pub max_cached_threads: usize,
}

impl Default for OpenAiAssistantConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            default_api_key: None,
            request_timeout_ms: 60_000,
            max_retries: 2,
            retry_jitter: true,
            run_poll_interval_ms: 1_000,
            run_max_polls: 30,
            thread_idle_ttl_ms: 24 * 60 * 60 * 1_000,
            max_cached_threads: 10_000,
        }
    }
}

/// Assistants v2 client that keeps one thread per `(tenant, sender)` pair.
pub struct OpenAiAssistantClient {
    client: reqwest::Client,
    config: OpenAiAssistantConfig,
    directory: AssistantDirectory,
    threads: Mutex<ThreadCache>,
}

impl OpenAiAssistantClient {
    pub fn new(
        config: OpenAiAssistantConfig,
        directory: AssistantDirectory,
    ) -> Result<Self, WaAiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            OPENAI_BETA_HEADER,
            HeaderValue::from_static(OPENAI_BETA_ASSISTANTS_V2),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        let threads = ThreadCache::new(
            Duration::from_millis(config.thread_idle_ttl_ms.max(1)),
            config.max_cached_threads,
        );
        Ok(Self {
            client,
            config,
            directory,
            threads: Mutex::new(threads),
        })
    }

    pub fn cached_thread_count(&self) -> usize {
        self.lock_threads().len()
    }

    /// Drops every cached thread of `tenant_id`.
    pub fn forget_tenant_threads(&self, tenant_id: &str) -> usize {
        let forgotten = self.lock_threads().forget_tenant(tenant_id);
        if forgotten > 0 {
            debug!(tenant_id, forgotten, "dropped cached assistant threads");
        }
        forgotten
    }

    fn lock_threads(&self) -> std::sync::MutexGuard<'_, ThreadCache> {
        match self.threads.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn resolve_binding(&self, tenant_id: &str) -> Result<(AssistantBinding, String), WaAiError> {
        let binding = self
            .directory
            .get(tenant_id)
            .ok_or_else(|| WaAiError::UnboundTenant(tenant_id.to_string()))?;
        let api_key = binding
            .api_key
            .clone()
            .or_else(|| self.config.default_api_key.clone())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| WaAiError::MissingApiKey {
                tenant_id: tenant_id.to_string(),
            })?;
        Ok((binding, api_key))
    }

    async fn request_json(
        &self,
        api_key: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, WaAiError> {
        let url = self.endpoint(path);
        let max_retries = self.config.max_retries;
        for attempt in 0..=max_retries {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(api_key.trim())
                .header(RETRY_ATTEMPT_HEADER, attempt.to_string());
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return Ok(serde_json::from_str(&raw)?);
                    }
                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let delay_ms =
                            retry_delay_ms(attempt, self.config.retry_jitter, retry_after_ms);
                        debug!(%url, status = status.as_u16(), delay_ms, "retrying assistant request");
                        sleep(Duration::from_millis(delay_ms)).await;
                        continue;
                    }
                    return Err(WaAiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let delay_ms = retry_delay_ms(attempt, self.config.retry_jitter, None);
                        debug!(%url, error = %error, delay_ms, "retrying assistant request");
                        sleep(Duration::from_millis(delay_ms)).await;
                        continue;
                    }
                    return Err(WaAiError::Http(error));
                }
            }
        }

        Err(WaAiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }

    async fn create_thread(&self, api_key: &str) -> Result<String, WaAiError> {
        let created = self
            .request_json(api_key, Method::POST, "threads", Some(&json!({})))
            .await?;
        required_str(&created, "id", "thread")
    }

    async fn thread_for(
        &self,
        api_key: &str,
        key: &ThreadKey,
    ) -> Result<(String, bool), WaAiError> {
        let cached = self.lock_threads().get(key, Instant::now());
        if let Some(thread_id) = cached {
            return Ok((thread_id, true));
        }
        let thread_id = self.create_thread(api_key).await?;
        self.lock_threads()
            .insert(key.clone(), thread_id.clone(), Instant::now());
        Ok((thread_id, false))
    }

    async fn post_user_message(
        &self,
        api_key: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<(), WaAiError> {
        let body = json!({ "role": "user", "content": text });
        self.request_json(
            api_key,
            Method::POST,
            &format!("threads/{thread_id}/messages"),
            Some(&body),
        )
        .await
        .map(|_| ())
    }

    async fn run_to_completion(
        &self,
        api_key: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<(), WaAiError> {
        let body = json!({ "assistant_id": assistant_id });
        let mut run = self
            .request_json(
                api_key,
                Method::POST,
                &format!("threads/{thread_id}/runs"),
                Some(&body),
            )
            .await?;
        let run_id = required_str(&run, "id", "run")?;

        let mut polls = 0_usize;
        loop {
            let status = run
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("queued")
                .to_string();
            if !PENDING_RUN_STATUSES.contains(&status.as_str()) {
                if status == "completed" {
                    return Ok(());
                }
                let detail = run
                    .pointer("/last_error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("no error detail provided")
                    .to_string();
                return Err(WaAiError::RunFailed {
                    run_id,
                    status,
                    detail,
                });
            }
            if polls >= self.config.run_max_polls {
                return Err(WaAiError::RunTimedOut { run_id, polls });
            }
            sleep(Duration::from_millis(self.config.run_poll_interval_ms)).await;
            polls += 1;
            run = self
                .request_json(
                    api_key,
                    Method::GET,
                    &format!("threads/{thread_id}/runs/{run_id}"),
                    None,
                )
                .await?;
        }
    }

    async fn latest_assistant_text(
        &self,
        api_key: &str,
        thread_id: &str,
    ) -> Result<AssistantReply, WaAiError> {
        let listing = self
            .request_json(
                api_key,
                Method::GET,
                &format!("threads/{thread_id}/messages?order=desc&limit=1"),
                None,
            )
            .await?;
        let Some(latest) = listing
            .get("data")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
        else {
            return Ok(None);
        };
        if latest.get("role").and_then(Value::as_str) != Some("assistant") {
            return Ok(None);
        }
        Ok(extract_message_text(latest))
    }
}

#[async_trait]
impl AssistantGateway for OpenAiAssistantClient {
    async fn send_to_assistant(
        &self,
        tenant_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<AssistantReply, WaAiError> {
        let (binding, api_key) = self.resolve_binding(tenant_id)?;
        let key = (tenant_id.to_string(), sender_id.to_string());
        let (mut thread_id, cached) = self.thread_for(&api_key, &key).await?;

        match self.post_user_message(&api_key, &thread_id, text).await {
            Err(WaAiError::HttpStatus { status: 404, .. }) if cached => {
                warn!(
                    tenant_id,
                    thread_id = %thread_id,
                    "cached assistant thread is gone; starting a new one"
                );
                self.lock_threads().remove(&key);
                thread_id = self.thread_for(&api_key, &key).await?.0;
                self.post_user_message(&api_key, &thread_id, text).await?;
            }
            other => other?,
        }

        self.run_to_completion(&api_key, &thread_id, &binding.assistant_id)
            .await?;
        self.latest_assistant_text(&api_key, &thread_id).await
    }

    fn forget_tenant(&self, tenant_id: &str) -> usize {
        self.forget_tenant_threads(tenant_id)
    }
}

fn required_str(value: &Value, field: &str, kind: &str) -> Result<String, WaAiError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WaAiError::InvalidResponse(format!("{kind} response is missing '{field}'")))
}

fn extract_message_text(message: &Value) -> Option<String> {
    let parts = message.get("content")?.as_array()?;
    let text = parts
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|part| part.pointer("/text/value").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use httpmock::prelude::*;
    use serde_json::json;

    use super::{extract_message_text, OpenAiAssistantClient, OpenAiAssistantConfig};
    use crate::{AssistantBinding, AssistantDirectory, AssistantGateway, WaAiError};

    fn test_client(base_url: String, default_api_key: Option<&str>) -> OpenAiAssistantClient {
        let directory = AssistantDirectory::new();
        directory.bind(
            "acme",
            AssistantBinding::new("asst_acme").with_api_key("sk-acme"),
        );
        directory.bind("globex", AssistantBinding::new("asst_globex"));
        OpenAiAssistantClient::new(
            OpenAiAssistantConfig {
                api_base: base_url,
                default_api_key: default_api_key.map(str::to_string),
                request_timeout_ms: 5_000,
                max_retries: 1,
                retry_jitter: false,
                run_poll_interval_ms: 1,
                run_max_polls: 3,
                thread_idle_ttl_ms: 60_000,
                max_cached_threads: 100,
            },
            directory,
        )
        .expect("client")
    }

    fn mock_message_listing(server: &MockServer, thread_id: &str, text: &str) {
        server.mock(|when, then| {
            when.method(GET)
                .path(format!("/threads/{thread_id}/messages"))
                .query_param("order", "desc")
                .query_param("limit", "1");
            then.status(200).json_body(json!({
                "data": [{
                    "id": "msg_2",
                    "role": "assistant",
                    "content": [{"type": "text", "text": {"value": text, "annotations": []}}]
                }]
            }));
        });
    }

    #[test]
    fn unit_extract_message_text_joins_text_parts_and_skips_others() {
        let message = json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": {"value": "Hola"}},
                {"type": "image_file", "image_file": {"file_id": "file_1"}},
                {"type": "text", "text": {"value": "¿Cómo estás?"}}
            ]
        });
        assert_eq!(
            extract_message_text(&message).as_deref(),
            Some("Hola\n¿Cómo estás?")
        );
        assert_eq!(extract_message_text(&json!({"content": []})), None);
    }

    #[tokio::test]
    async fn integration_send_to_assistant_runs_thread_flow_and_reuses_thread() {
        let server = MockServer::start();
        let create_thread = server.mock(|when, then| {
            when.method(POST)
                .path("/threads")
                .header("authorization", "Bearer sk-acme")
                .header("openai-beta", "assistants=v2");
            then.status(200).json_body(json!({"id": "thread_1"}));
        });
        let add_message = server.mock(|when, then| {
            when.method(POST)
                .path("/threads/thread_1/messages")
                .json_body_includes(r#"{"role":"user"}"#);
            then.status(200).json_body(json!({"id": "msg_1"}));
        });
        let create_run = server.mock(|when, then| {
            when.method(POST)
                .path("/threads/thread_1/runs")
                .json_body(json!({"assistant_id": "asst_acme"}));
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "queued"}));
        });
        let poll_run = server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/runs/run_1");
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "completed"}));
        });
        mock_message_listing(&server, "thread_1", "Hola, ¿en qué te ayudo?");

        let client = test_client(server.base_url(), None);
        let reply = client
            .send_to_assistant("acme", "5215512345678@c.us", "hola")
            .await
            .expect("reply");
        assert_eq!(reply.as_deref(), Some("Hola, ¿en qué te ayudo?"));

        client
            .send_to_assistant("acme", "5215512345678@c.us", "otra pregunta")
            .await
            .expect("second reply");

        assert_eq!(create_thread.calls(), 1);
        assert_eq!(add_message.calls(), 2);
        assert_eq!(create_run.calls(), 2);
        assert_eq!(poll_run.calls(), 2);
        assert_eq!(client.cached_thread_count(), 1);
    }

    #[tokio::test]
    async fn functional_unbound_tenant_and_missing_key_are_reported() {
        let server = MockServer::start();
        let client = test_client(server.base_url(), None);

        let unbound = client
            .send_to_assistant("initech", "1@c.us", "hola")
            .await
            .expect_err("unbound tenant");
        assert!(matches!(unbound, WaAiError::UnboundTenant(ref id) if id == "initech"));

        let missing_key = client
            .send_to_assistant("globex", "1@c.us", "hola")
            .await
            .expect_err("missing key");
        assert!(matches!(missing_key, WaAiError::MissingApiKey { ref tenant_id } if tenant_id == "globex"));
    }

    #[tokio::test]
    async fn functional_default_api_key_covers_tenants_without_their_own() {
        let server = MockServer::start();
        let create_thread = server.mock(|when, then| {
            when.method(POST)
                .path("/threads")
                .header("authorization", "Bearer sk-default");
            then.status(200).json_body(json!({"id": "thread_g"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_g/messages");
            then.status(200).json_body(json!({"id": "msg_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_g/runs");
            then.status(200)
                .json_body(json!({"id": "run_g", "status": "completed"}));
        });
        mock_message_listing(&server, "thread_g", "ok");

        let client = test_client(server.base_url(), Some("sk-default"));
        let reply = client
            .send_to_assistant("globex", "1@c.us", "hola")
            .await
            .expect("reply");
        assert_eq!(reply.as_deref(), Some("ok"));
        assert_eq!(create_thread.calls(), 1);
    }

    #[tokio::test]
    async fn integration_failed_run_surfaces_last_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({"id": "thread_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({"id": "msg_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/runs");
            then.status(200).json_body(json!({
                "id": "run_1",
                "status": "failed",
                "last_error": {"code": "rate_limit_exceeded", "message": "quota exhausted"}
            }));
        });

        let client = test_client(server.base_url(), None);
        let error = client
            .send_to_assistant("acme", "1@c.us", "hola")
            .await
            .expect_err("failed run");
        match error {
            WaAiError::RunFailed { status, detail, .. } => {
                assert_eq!(status, "failed");
                assert_eq!(detail, "quota exhausted");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn regression_run_polling_is_bounded() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({"id": "thread_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({"id": "msg_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/runs");
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "queued"}));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/runs/run_1");
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "in_progress"}));
        });

        let client = test_client(server.base_url(), None);
        let error = client
            .send_to_assistant("acme", "1@c.us", "hola")
            .await
            .expect_err("timed out run");
        assert!(matches!(error, WaAiError::RunTimedOut { polls: 3, .. }));
        assert_eq!(poll.calls(), 3);
    }

    #[tokio::test]
    async fn integration_rate_limited_thread_creation_is_retried() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(POST)
                .path("/threads")
                .header("x-wa-retry-attempt", "0");
            then.status(429).header("retry-after", "0").body("slow down");
        });
        let second = server.mock(|when, then| {
            when.method(POST)
                .path("/threads")
                .header("x-wa-retry-attempt", "1");
            then.status(200).json_body(json!({"id": "thread_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({"id": "msg_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/runs");
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "completed"}));
        });
        mock_message_listing(&server, "thread_1", "listo");

        let client = test_client(server.base_url(), None);
        let reply = client
            .send_to_assistant("acme", "1@c.us", "hola")
            .await
            .expect("reply after retry");
        assert_eq!(reply.as_deref(), Some("listo"));
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn regression_expired_cached_thread_is_replaced() {
        let server = MockServer::start();
        let stale = server.mock(|when, then| {
            when.method(POST).path("/threads/thread_old/messages");
            then.status(404).body("no thread");
        });
        let create_thread = server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({"id": "thread_new"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_new/messages");
            then.status(200).json_body(json!({"id": "msg_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_new/runs");
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "completed"}));
        });
        mock_message_listing(&server, "thread_new", "de nuevo");

        let client = test_client(server.base_url(), None);
        client.lock_threads().insert(
            ("acme".to_string(), "1@c.us".to_string()),
            "thread_old".to_string(),
            Instant::now(),
        );
        let reply = client
            .send_to_assistant("acme", "1@c.us", "hola")
            .await
            .expect("reply on fresh thread");
        assert_eq!(reply.as_deref(), Some("de nuevo"));
        assert_eq!(stale.calls(), 1);
        assert_eq!(create_thread.calls(), 1);
        assert_eq!(client.cached_thread_count(), 1);
    }

    #[tokio::test]
    async fn functional_forget_tenant_drops_only_that_tenants_threads() {
        let server = MockServer::start();
        let client = test_client(server.base_url(), None);
        let now = Instant::now();
        for (tenant, sender) in [("acme", "1@c.us"), ("acme", "2@c.us"), ("globex", "1@c.us")] {
            client.lock_threads().insert(
                (tenant.to_string(), sender.to_string()),
                format!("thread_{tenant}_{sender}"),
                now,
            );
        }

        assert_eq!(client.forget_tenant("acme"), 2);
        assert_eq!(client.cached_thread_count(), 1);
        assert_eq!(client.forget_tenant("acme"), 0);
    }

    #[tokio::test]
    async fn regression_idle_cached_thread_is_not_reused() {
        let server = MockServer::start();
        let create_thread = server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({"id": "thread_fresh"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_fresh/messages");
            then.status(200).json_body(json!({"id": "msg_1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_fresh/runs");
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "completed"}));
        });
        mock_message_listing(&server, "thread_fresh", "hola otra vez");

        let client = test_client(server.base_url(), None);
        let Some(long_ago) = Instant::now().checked_sub(Duration::from_secs(120)) else {
            return;
        };
        client.lock_threads().insert(
            ("acme".to_string(), "1@c.us".to_string()),
            "thread_idle".to_string(),
            long_ago,
        );

        let reply = client
            .send_to_assistant("acme", "1@c.us", "hola")
            .await
            .expect("reply on fresh thread");
        assert_eq!(reply.as_deref(), Some("hola otra vez"));
        assert_eq!(create_thread.calls(), 1);
        assert_eq!(client.cached_thread_count(), 1);
    }
}
