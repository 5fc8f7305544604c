//! Remote agent calls.
//!
//! The agent service is asynchronous: [`AgentClient::submit`] posts an
//! instruction tagged with a [`CorrelationToken`], and the agent later
//! writes a [`LogRecord`] with the same `thread_id` into the log
//! collection. [`LogPoller`] waits for that record with a bounded timeout.
//!
//! ## Wire contract
//!
//! ```text
//! POST {endpoint}
//! {"message": "...", "user_id": "...", "thread_id": "<token>", "ai_role": "..."?}
//! ```
//!
//! Log record:
//!
//! ```text
//! {"thread_id": "<token>", "ai_response": "...",
//!  "token_usage": {"total_tokens": n, "prompt_tokens": n, "completion_tokens": n},
//!  "log": "..."?, "tool_call": "..."?}
//! ```

pub mod prompts;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::AgentError;
use crate::query::FilterExpression;
use crate::store::DocumentStore;

/// Message shown when no log record arrived in time.
pub const TIMEOUT_MESSAGE: &str = "Failed to retrieve the log entry within the timeout period.";

/// Unique id linking one agent request to its log record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Body of `POST /agent-call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub message: String,
    pub user_id: String,
    pub thread_id: CorrelationToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_role: Option<String>,
}

impl AgentRequest {
    /// New request with a freshly minted correlation token.
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            thread_id: CorrelationToken::new(),
            ai_role: None,
        }
    }

    pub fn with_thread(mut self, thread_id: CorrelationToken) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.ai_role = Some(role.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Result record written by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub thread_id: String,
    #[serde(default)]
    pub ai_response: String,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default, deserialize_with = "lenient_text")]
    pub log: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub tool_call: Option<String>,
}

/// Diagnostic fields are free-form; non-string JSON is kept as its text.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

impl LogRecord {
    pub fn from_document(doc: Value, thread_id: &str) -> Result<Self, AgentError> {
        serde_json::from_value(doc).map_err(|source| AgentError::MalformedLog {
            thread_id: thread_id.to_string(),
            source,
        })
    }
}

/// Outcome of a submit-then-wait cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Completed(LogRecord),
    TimedOut,
}

impl AgentOutcome {
    pub fn record(&self) -> Option<&LogRecord> {
        match self {
            AgentOutcome::Completed(r) => Some(r),
            AgentOutcome::TimedOut => None,
        }
    }

    /// User-facing summary.
    pub fn message(&self) -> String {
        match self {
            AgentOutcome::Completed(r) => r.ai_response.clone(),
            AgentOutcome::TimedOut => TIMEOUT_MESSAGE.to_string(),
        }
    }
}

/// HTTP client for the agent endpoint. Stateless; cheap to clone.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    endpoint: String,
}

impl AgentClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post `request`. Not retried. Returns the response body when it is
    /// JSON; the real result arrives through the log collection.
    pub async fn submit(&self, request: &AgentRequest) -> Result<Option<Value>, AgentError> {
        tracing::info!(
            thread_id = %request.thread_id,
            user_id = %request.user_id,
            endpoint = %self.endpoint,
            "submitting agent request"
        );
        let resp = self.http.post(&self.endpoint).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(thread_id = %request.thread_id, status = status.as_u16(), "agent request rejected");
            return Err(AgentError::Status {
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body).ok())
    }
}

/// Waits for log records by correlation token.
#[derive(Clone)]
pub struct LogPoller {
    log: Arc<dyn DocumentStore>,
    poll_interval: Duration,
    cancel: Option<CancellationToken>,
}

impl LogPoller {
    pub fn new(log: Arc<dyn DocumentStore>, poll_interval: Duration) -> Self {
        Self {
            log,
            poll_interval,
            cancel: None,
        }
    }

    /// Abort waits when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Poll every `poll_interval` until the record appears or `timeout`
    /// elapses. `Ok(None)` on timeout; no partial results.
    pub async fn await_result(
        &self,
        token: &CorrelationToken,
        timeout: Duration,
    ) -> Result<Option<LogRecord>, AgentError> {
        let filter = FilterExpression::eq("thread_id", token.as_str());
        let deadline = instant_after(timeout);
        let mut attempts = 0u32;

        while Instant::now() < deadline {
            attempts += 1;
            if let Some(doc) = self.log.find_one(&filter).await? {
                tracing::info!(thread_id = %token, attempts, "agent log record found");
                return LogRecord::from_document(doc, token.as_str()).map(Some);
            }
            tracing::debug!(thread_id = %token, attempts, "agent log record not ready");

            let wake = instant_after(self.poll_interval).min(deadline);
            match &self.cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        _ = tokio::time::sleep_until(wake) => {}
                    }
                }
                None => tokio::time::sleep_until(wake).await,
            }
        }

        tracing::warn!(thread_id = %token, ?timeout, attempts, "timed out waiting for agent log record");
        Ok(None)
    }
}

/// `now + wait`, saturating at roughly thirty years out.
fn instant_after(wait: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    let now = Instant::now();
    now.checked_add(wait.min(FAR_FUTURE))
        .or_else(|| now.checked_add(Duration::from_secs(86_400)))
        .unwrap_or(now)
}

/// Submit `request` and wait for its log record.
pub async fn ask(
    client: &AgentClient,
    poller: &LogPoller,
    request: &AgentRequest,
    timeout: Duration,
) -> Result<AgentOutcome, AgentError> {
    client.submit(request).await?;
    Ok(match poller.await_result(&request.thread_id, timeout).await? {
        Some(record) => AgentOutcome::Completed(record),
        None => AgentOutcome::TimedOut,
    })
}

/// Client, poller and caller identity bundled for dashboard operations.
#[derive(Clone)]
pub struct AgentHandle {
    pub client: AgentClient,
    pub poller: LogPoller,
    pub user_id: String,
}

impl AgentHandle {
    pub fn new(client: AgentClient, poller: LogPoller, user_id: impl Into<String>) -> Self {
        Self {
            client,
            poller,
            user_id: user_id.into(),
        }
    }

    /// Send `message` as this handle's user and wait up to `timeout`.
    pub async fn ask(
        &self,
        message: impl Into<String>,
        ai_role: Option<&str>,
        timeout: Duration,
    ) -> Result<AgentOutcome, AgentError> {
        let mut request = AgentRequest::new(message, self.user_id.clone());
        if let Some(role) = ai_role {
            request = request.with_role(role);
        }
        ask(&self.client, &self.poller, &request, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use serde_json::json;
    use tokio::sync::Mutex;

    fn poller(store: &MemoryStore) -> LogPoller {
        LogPoller::new(Arc::new(store.clone()), Duration::from_secs(2))
    }

    fn log_doc(thread_id: &str) -> Value {
        json!({
            "thread_id": thread_id,
            "ai_response": "Document validated",
            "token_usage": {"total_tokens": 1500, "prompt_tokens": 1200, "completion_tokens": 300},
            "tool_call": {"name": "kyc"}
        })
    }

    #[test]
    fn test_request_serialization_omits_missing_role() {
        let req = AgentRequest::new("hello", "admin-001").with_thread("t-1".into());
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"message": "hello", "user_id": "admin-001", "thread_id": "t-1"})
        );
        let req = req.with_role("You are a supplier search assistant.");
        assert_eq!(
            serde_json::to_value(&req).unwrap()["ai_role"],
            "You are a supplier search assistant."
        );
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(CorrelationToken::new(), CorrelationToken::new());
    }

    #[test]
    fn test_log_record_parsing_is_lenient() {
        let record = LogRecord::from_document(log_doc("t-1"), "t-1").unwrap();
        assert_eq!(record.ai_response, "Document validated");
        assert_eq!(record.token_usage.total_tokens, 1500);
        assert_eq!(record.tool_call.as_deref(), Some(r#"{"name":"kyc"}"#));
        assert_eq!(record.log, None);
    }

    #[test]
    fn test_log_record_without_thread_is_malformed() {
        let err = LogRecord::from_document(json!({"ai_response": "x"}), "t-1").unwrap_err();
        assert!(matches!(err, AgentError::MalformedLog { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_result_times_out_after_full_timeout() {
        let store = MemoryStore::new();
        let start = Instant::now();
        let result = poller(&store)
            .await_result(&"missing".into(), Duration::from_secs(10))
            .await
            .unwrap();
        let waited = start.elapsed();
        assert!(result.is_none());
        assert!(waited >= Duration::from_secs(8), "returned early: {:?}", waited);
        assert!(waited <= Duration::from_secs(12), "returned late: {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_result_finds_late_record() {
        let store = MemoryStore::new();
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            writer.insert_one(log_doc("t-late")).await.unwrap();
        });

        let start = Instant::now();
        let record = poller(&store)
            .await_result(&"t-late".into(), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.thread_id, "t-late");
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited <= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_result_ignores_other_threads() {
        let store = MemoryStore::with_documents(vec![log_doc("someone-else")]);
        let result = poller(&store)
            .await_result(&"mine".into(), Duration::from_secs(4))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_result_can_be_cancelled() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let poller = poller(&store).with_cancel(cancel.clone());
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            canceller.cancel();
        });
        let start = Instant::now();
        let err = poller
            .await_result(&"t".into(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_result_accepts_unbounded_timeout() {
        let store = MemoryStore::with_documents(vec![log_doc("t-max")]);
        let record = poller(&store)
            .await_result(&"t-max".into(), Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(record.unwrap().thread_id, "t-max");
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_poll_interval_still_honours_timeout() {
        let store = MemoryStore::new();
        let poller = LogPoller::new(Arc::new(store), Duration::MAX);
        let start = Instant::now();
        let result = poller
            .await_result(&"t".into(), Duration::from_secs(3))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() <= Duration::from_secs(4));
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(AgentOutcome::TimedOut.message(), TIMEOUT_MESSAGE);
        let record = LogRecord::from_document(log_doc("t"), "t").unwrap();
        assert_eq!(AgentOutcome::Completed(record).message(), "Document validated");
    }

    type Captured = Arc<Mutex<Vec<AgentRequest>>>;

    async fn capture(
        State(seen): State<Captured>,
        Json(req): Json<AgentRequest>,
    ) -> Json<Value> {
        let reply = json!({"ai_response": format!("echo: {}", req.message)});
        seen.lock().await.push(req);
        Json(reply)
    }

    /// Serve a capturing agent endpoint on an ephemeral port. `None` when
    /// the sandbox forbids binding.
    async fn spawn_agent(router: Router) -> Option<String> {
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Skipping agent HTTP test (sandbox): {}", e);
                return None;
            }
        };
        let addr = listener.local_addr().ok()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Some(format!("http://{}/agent-call", addr))
    }

    #[tokio::test]
    async fn test_submit_posts_request_body() {
        let seen: Captured = Arc::default();
        let router = Router::new()
            .route("/agent-call", post(capture))
            .with_state(seen.clone());
        let Some(url) = spawn_agent(router).await else {
            return;
        };

        let client = AgentClient::new(url);
        let req = AgentRequest::new("validate T1", "admin-001");
        let echo = client.submit(&req).await.unwrap();
        assert_eq!(echo.unwrap()["ai_response"], "echo: validate T1");

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], req);
    }

    #[tokio::test]
    async fn test_submit_surfaces_error_status() {
        let router = Router::new().route(
            "/agent-call",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let Some(url) = spawn_agent(router).await else {
            return;
        };
        let err = AgentClient::new(url)
            .submit(&AgentRequest::new("x", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_ask_submits_then_reads_log() {
        let store = MemoryStore::new();
        let router = {
            let store = store.clone();
            Router::new().route(
                "/agent-call",
                post(move |Json(req): Json<AgentRequest>| {
                    let store = store.clone();
                    async move {
                        store.insert_one(log_doc(req.thread_id.as_str())).await.unwrap();
                        StatusCode::OK
                    }
                }),
            )
        };
        let Some(url) = spawn_agent(router).await else {
            return;
        };

        let outcome = ask(
            &AgentClient::new(url),
            &LogPoller::new(Arc::new(store), Duration::from_millis(50)),
            &AgentRequest::new("check", "admin-001"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(outcome.record().unwrap().ai_response, "Document validated");
    }
}
