//! Per-session chat context.
//!
//! Each dashboard session owns one [`SessionContext`]: the chat role in use,
//! the caller's contact id, and a separate history per role. Nothing here is
//! shared between sessions.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::agent::{AgentClient, AgentRequest, CorrelationToken};
use crate::config::DashboardConfig;
use crate::errors::AgentError;

/// Idle time after which a chat session is dropped.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Reply text used when the agent answers without one.
pub const NO_RESPONSE: &str = "No response";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Full access to tools and records.
    #[default]
    Admin,
    /// Restricted to the caller's own records.
    Client,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::Admin => "admin",
            ChatRole::Client => "client",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Speaker,
    pub content: String,
}

/// Synchronous answer carried in the agent's response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub ai_response: String,
    pub log: Option<String>,
    pub tool_call: Option<String>,
}

impl ChatReply {
    fn from_body(body: Option<&Value>) -> Self {
        let text = |name: &str| {
            body.and_then(|b| b.get(name)).and_then(|v| match v {
                Value::Null => None,
                Value::String(s) if s.is_empty() => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        };
        Self {
            ai_response: text("ai_response").unwrap_or_else(|| NO_RESPONSE.to_string()),
            log: text("log"),
            tool_call: text("tool_call"),
        }
    }
}

/// Contact id for a client: the country's phone code followed by the number.
pub fn contact_id(config: &DashboardConfig, country: &str, phone: &str) -> Option<String> {
    config
        .phone_code(country)
        .map(|code| format!("{}{}", code, phone.trim()))
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    role: ChatRole,
    admin_id: String,
    contact: String,
    started: NaiveDate,
    admin_history: Vec<ChatMessage>,
    client_history: Vec<ChatMessage>,
}

impl SessionContext {
    pub fn new(role: ChatRole, admin_id: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            role,
            admin_id: admin_id.into(),
            contact: contact.into(),
            started: Local::now().date_naive(),
            admin_history: Vec::new(),
            client_history: Vec::new(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.started = date;
        self
    }

    pub fn role(&self) -> ChatRole {
        self.role
    }

    /// Switch role; each role keeps its own history.
    pub fn set_role(&mut self, role: ChatRole) {
        self.role = role;
    }

    pub fn set_contact(&mut self, contact: impl Into<String>) {
        self.contact = contact.into();
    }

    /// Identity the agent sees for the current role.
    pub fn user_id(&self) -> &str {
        match self.role {
            ChatRole::Admin => &self.admin_id,
            ChatRole::Client => &self.contact,
        }
    }

    /// Conversation thread: stable per role, contact and day.
    pub fn thread_id(&self) -> CorrelationToken {
        CorrelationToken::from(
            format!(
                "thread_id_{}_{}_{}",
                self.role.as_str(),
                self.contact,
                self.started.format("%d-%m-%Y")
            )
            .as_str(),
        )
    }

    pub fn history(&self) -> &[ChatMessage] {
        match self.role {
            ChatRole::Admin => &self.admin_history,
            ChatRole::Client => &self.client_history,
        }
    }

    fn history_mut(&mut self) -> &mut Vec<ChatMessage> {
        match self.role {
            ChatRole::Admin => &mut self.admin_history,
            ChatRole::Client => &mut self.client_history,
        }
    }

    /// Send one chat turn and record both sides in the current history.
    /// A failed call leaves only the user's message recorded.
    pub async fn send(&mut self, client: &AgentClient, message: &str) -> Result<ChatReply, AgentError> {
        self.history_mut().push(ChatMessage {
            role: Speaker::User,
            content: message.to_string(),
        });
        let request = AgentRequest::new(message, self.user_id()).with_thread(self.thread_id());
        let body = client.submit(&request).await?;
        let reply = ChatReply::from_body(body.as_ref());
        self.history_mut().push(ChatMessage {
            role: Speaker::Assistant,
            content: reply.ai_response.clone(),
        });
        Ok(reply)
    }
}

/// Live sessions by session id. Idle ones are evicted whenever the
/// registry is touched.
pub struct SessionRegistry {
    idle_ttl: Duration,
    sessions: Mutex<HashMap<String, (SessionContext, Instant)>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SESSION_IDLE_TTL)
    }
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            idle_ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn evict_idle(&self, sessions: &mut HashMap<String, (SessionContext, Instant)>) {
        let before = sessions.len();
        sessions.retain(|_, (_, used)| used.elapsed() < self.idle_ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, "dropped idle chat sessions");
        }
    }

    /// Remove and return a session for exclusive use; hand it back with
    /// [`put`](Self::put).
    pub async fn take(&self, id: &str) -> Option<SessionContext> {
        let mut sessions = self.sessions.lock().await;
        self.evict_idle(&mut sessions);
        sessions.remove(id).map(|(ctx, _)| ctx)
    }

    pub async fn put(&self, id: impl Into<String>, context: SessionContext) {
        let mut sessions = self.sessions.lock().await;
        self.evict_idle(&mut sessions);
        sessions.insert(id.into(), (context, Instant::now()));
    }

    /// End a session. `false` when no such session is live.
    pub async fn end(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        self.evict_idle(&mut sessions);
        sessions.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.evict_idle(&mut sessions);
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
