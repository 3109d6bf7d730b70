//! Chat-platform identity → durable session mapping.
//!
//! One session per external identity, reused across messages, is what gives
//! chat platforms conversational continuity. The map is persisted as a single
//! JSON object keyed by `"<platform>:<user_id>"`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::HistoryError;
use crate::history::HistoryStore;

/// Session an identity is currently bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBinding {
    pub session_id: String,
    pub agent_id: String,
}

/// Persistent identity → session map.
pub struct SessionMap {
    path: PathBuf,
    history: Arc<HistoryStore>,
    default_agent: String,
    entries: Mutex<HashMap<String, SessionBinding>>,
}

impl SessionMap {
    /// Load the map from `path`. A missing or unreadable file starts empty.
    pub async fn open(
        path: impl Into<PathBuf>,
        history: Arc<HistoryStore>,
        default_agent: impl Into<String>,
    ) -> Result<Self, HistoryError> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "Ignoring unreadable session map: {}", e);
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            history,
            default_agent: default_agent.into(),
            entries: Mutex::new(entries),
        })
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Current binding, without creating one.
    pub async fn get(&self, key: &str) -> Option<SessionBinding> {
        self.entries.lock().await.get(key).cloned()
    }

    /// Binding for `key`, creating a session for the default agent on first sight.
    pub async fn resolve(&self, key: &str) -> Result<SessionBinding, HistoryError> {
        let mut entries = self.entries.lock().await;
        if let Some(binding) = entries.get(key) {
            return Ok(binding.clone());
        }

        let binding = self.fresh_binding(&self.default_agent).await?;
        tracing::info!(
            identity = %key,
            session = %binding.session_id,
            agent = %binding.agent_id,
            "New identity session"
        );
        entries.insert(key.to_string(), binding.clone());
        self.persist(&entries).await?;
        Ok(binding)
    }

    /// Start a fresh session for `key`, keeping its agent.
    pub async fn reset(&self, key: &str) -> Result<SessionBinding, HistoryError> {
        let mut entries = self.entries.lock().await;
        let agent_id = entries
            .get(key)
            .map(|b| b.agent_id.clone())
            .unwrap_or_else(|| self.default_agent.clone());

        let binding = self.fresh_binding(&agent_id).await?;
        entries.insert(key.to_string(), binding.clone());
        self.persist(&entries).await?;
        Ok(binding)
    }

    /// Switch `key` to another agent, in a fresh session.
    pub async fn bind_agent(
        &self,
        key: &str,
        agent_id: &str,
    ) -> Result<SessionBinding, HistoryError> {
        let mut entries = self.entries.lock().await;
        let binding = self.fresh_binding(agent_id).await?;
        entries.insert(key.to_string(), binding.clone());
        self.persist(&entries).await?;
        Ok(binding)
    }

    async fn fresh_binding(&self, agent_id: &str) -> Result<SessionBinding, HistoryError> {
        let session_id = Uuid::new_v4().to_string();
        self.history.create_session(agent_id, &session_id).await?;
        Ok(SessionBinding {
            session_id,
            agent_id: agent_id.to_string(),
        })
    }

    async fn persist(&self, entries: &HashMap<String, SessionBinding>) -> Result<(), HistoryError> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn map(tmp: &TempDir) -> (Arc<HistoryStore>, SessionMap) {
        let history = Arc::new(HistoryStore::open(tmp.path().join("history")).await.unwrap());
        let map = SessionMap::open(
            tmp.path().join("session_map.json"),
            Arc::clone(&history),
            "assistant",
        )
        .await
        .unwrap();
        (history, map)
    }

    #[tokio::test]
    async fn resolve_is_stable_and_persistent() {
        let tmp = TempDir::new().unwrap();
        let (history, map) = map(&tmp).await;

        let first = map.resolve("telegram:42").await.unwrap();
        let again = map.resolve("telegram:42").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.agent_id, "assistant");
        assert!(history.get_session(&first.session_id).await.is_some());

        let reopened = SessionMap::open(tmp.path().join("session_map.json"), history, "assistant")
            .await
            .unwrap();
        assert_eq!(reopened.get("telegram:42").await, Some(first));
    }

    #[tokio::test]
    async fn identities_get_separate_sessions() {
        let tmp = TempDir::new().unwrap();
        let (_, map) = map(&tmp).await;
        let a = map.resolve("cli:local-user").await.unwrap();
        let b = map.resolve("telegram:7").await.unwrap();
        assert_ne!(a.session_id, b.session_id);
    }

    #[tokio::test]
    async fn reset_and_bind_agent() {
        let tmp = TempDir::new().unwrap();
        let (_, map) = map(&tmp).await;
        let original = map.resolve("cli:u").await.unwrap();

        let bound = map.bind_agent("cli:u", "researcher").await.unwrap();
        assert_eq!(bound.agent_id, "researcher");
        assert_ne!(bound.session_id, original.session_id);

        let reset = map.reset("cli:u").await.unwrap();
        assert_eq!(reset.agent_id, "researcher");
        assert_ne!(reset.session_id, bound.session_id);
    }
}
