//! Conversation sessions.
//!
//! A session is an ordered list of user and assistant messages. Only the
//! most recent `max_history` exchanges are retained, and only those are
//! ever serialized into a model prompt. Sessions idle for longer than
//! `max_age_hours` are dropped on access and by [`SessionStore::cleanup_expired`].

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<SessionMessage>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            last_active_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub sessions: usize,
    pub messages: usize,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    max_history: usize,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history: config.max_history,
            // Unrepresentable ages are rejected by config validation.
            max_age: config.max_age().unwrap_or(Duration::MAX),
        }
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_active_at > self.max_age
    }

    pub async fn create_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Session::new(id.clone()));
        info!(session_id = %id, "created session");
        id
    }

    /// Append one message, creating the session if it does not exist.
    ///
    /// The oldest messages are dropped once more than `max_history`
    /// exchanges are stored.
    pub async fn append(&self, id: &str, role: Role, content: &str) {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        let expired = sessions
            .get(id)
            .is_some_and(|s| self.is_expired(s, now));
        if expired {
            warn!(session_id = %id, "session expired, starting fresh");
            sessions.remove(id);
        }

        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string()));
        session.messages.push(SessionMessage {
            role,
            content: content.to_string(),
        });
        session.last_active_at = now;

        let cap = self.max_history * 2;
        if session.messages.len() > cap {
            let excess = session.messages.len() - cap;
            session.messages.drain(..excess);
        }
        debug!(session_id = %id, %role, "appended message");
    }

    pub async fn add_exchange(&self, id: &str, user: &str, assistant: &str) {
        self.append(id, Role::User, user).await;
        self.append(id, Role::Assistant, assistant).await;
    }

    /// Recent history as `User: …` / `Assistant: …` lines.
    ///
    /// `limit` counts exchanges and is capped at `max_history`. Returns
    /// `None` for unknown, expired or empty sessions.
    pub async fn get_history(&self, id: &str, limit: Option<usize>) -> Option<String> {
        let session = self.get_session(id).await?;
        let exchanges = limit.unwrap_or(self.max_history).min(self.max_history);
        let take = exchanges * 2;
        let start = session.messages.len().saturating_sub(take);
        let recent = &session.messages[start..];
        if recent.is_empty() {
            return None;
        }
        Some(
            recent
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Snapshot of a live session; expired sessions are removed.
    pub async fn get_session(&self, id: &str) -> Option<Session> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            let session = sessions.get(id)?;
            if !self.is_expired(session, now) {
                return Some(session.clone());
            }
        }
        warn!(session_id = %id, "session expired, removing");
        self.sessions.write().await.remove(id);
        None
    }

    pub async fn delete_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(session_id = %id, "deleted session");
        }
        removed
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove every expired session. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, "cleaned up expired sessions");
        }
        removed
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        SessionStats {
            sessions: sessions.len(),
            messages: sessions.values().map(|s| s.messages.len()).sum(),
        }
    }
}
