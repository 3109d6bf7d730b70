//! JSONL-backed history store.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::HistoryError;
use crate::history::{HistoryMessage, HistoryRole, HistorySession, derive_title};

const INDEX_FILE: &str = "index.jsonl";
const SESSIONS_DIR: &str = "sessions";

/// Append-only message logs plus a session index.
///
/// The in-memory index is the source of truth while the process runs. Every
/// read-modify-write of it happens under `index`, and the file is replaced
/// atomically (write to a temp file, then rename).
pub struct HistoryStore {
    root: PathBuf,
    index: Mutex<Vec<HistorySession>>,
}

impl HistoryStore {
    /// Open a store rooted at `root`, creating the directory layout.
    ///
    /// Failure to create the directories is fatal to the caller. A torn
    /// trailing record is cut off so later appends start on a fresh line,
    /// unparseable lines are skipped, and stale message counts are repaired
    /// from the logs.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(SESSIONS_DIR)).await?;

        truncate_torn_tail(&root.join(INDEX_FILE)).await?;
        let mut sessions: Vec<HistorySession> = Vec::new();
        for session in read_jsonl::<HistorySession>(&root.join(INDEX_FILE)).await? {
            // Later records for an id supersede earlier ones.
            match sessions.iter_mut().find(|s| s.id == session.id) {
                Some(existing) => *existing = session,
                None => sessions.push(session),
            }
        }

        let mut repaired = false;
        for session in &mut sessions {
            truncate_torn_tail(&log_path(&root, &session.id)).await?;
            let count = read_jsonl::<HistoryMessage>(&log_path(&root, &session.id))
                .await?
                .len();
            if count != session.message_count {
                tracing::warn!(
                    session = %session.id,
                    indexed = session.message_count,
                    logged = count,
                    "Repairing message count from session log"
                );
                session.message_count = count;
                repaired = true;
            }
        }
        sort_recent_first(&mut sessions);

        let store = Self {
            root,
            index: Mutex::new(sessions),
        };
        if repaired {
            let index = store.index.lock().await;
            store.write_index(&index).await?;
        }

        tracing::debug!(root = %store.root.display(), "History store opened");
        Ok(store)
    }

    /// Create a session, or return the existing record if `session_id` is taken.
    pub async fn create_session(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<HistorySession, HistoryError> {
        check_session_id(session_id)?;
        let mut index = self.index.lock().await;

        if let Some(existing) = index.iter().find(|s| s.id == session_id) {
            return Ok(existing.clone());
        }

        let session = HistorySession::new(session_id, agent_id);

        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path(&self.root, session_id))
            .await?;
        append_line(&self.root.join(INDEX_FILE), &session).await?;

        index.insert(0, session.clone());
        tracing::debug!(session = %session_id, agent = %agent_id, "Created history session");
        Ok(session)
    }

    /// Append a message and update the session's index record.
    pub async fn save_message(
        &self,
        session_id: &str,
        message: &HistoryMessage,
    ) -> Result<HistorySession, HistoryError> {
        let mut index = self.index.lock().await;

        let session = index
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| HistoryError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        append_line(&log_path(&self.root, session_id), message).await?;

        session.message_count += 1;
        session.updated_at = Utc::now();
        if session.title.is_none() && message.role == HistoryRole::User {
            session.title = Some(derive_title(&message.content));
        }
        let updated = session.clone();

        sort_recent_first(&mut index);
        self.write_index(&index).await?;
        Ok(updated)
    }

    /// All sessions, most recently updated first.
    pub async fn list_sessions(&self) -> Vec<HistorySession> {
        self.index.lock().await.clone()
    }

    pub async fn get_session(&self, session_id: &str) -> Option<HistorySession> {
        self.index
            .lock()
            .await
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    /// Full ordered log. Unknown sessions yield an empty list.
    pub async fn get_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<HistoryMessage>, HistoryError> {
        if check_session_id(session_id).is_err() {
            return Ok(Vec::new());
        }
        read_jsonl(&log_path(&self.root, session_id)).await
    }

    /// Set a title explicitly, overriding any derived one.
    pub async fn update_session_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<HistorySession, HistoryError> {
        let mut index = self.index.lock().await;
        let session = index
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| HistoryError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        session.title = Some(title.to_string());
        let updated = session.clone();
        self.write_index(&index).await?;
        Ok(updated)
    }

    /// Remove a session and its log. Returns false if it did not exist.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, HistoryError> {
        let mut index = self.index.lock().await;
        let Some(pos) = index.iter().position(|s| s.id == session_id) else {
            return Ok(false);
        };
        index.remove(pos);
        self.write_index(&index).await?;

        match tokio::fs::remove_file(log_path(&self.root, session_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(session = %session_id, "Deleted history session");
        Ok(true)
    }

    async fn write_index(&self, sessions: &[HistorySession]) -> Result<(), HistoryError> {
        let mut buf = String::new();
        for session in sessions {
            buf.push_str(&serde_json::to_string(session)?);
            buf.push('\n');
        }
        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp, buf).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn log_path(root: &Path, session_id: &str) -> PathBuf {
    root.join(SESSIONS_DIR).join(format!("{session_id}.jsonl"))
}

fn sort_recent_first(sessions: &mut [HistorySession]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

fn check_session_id(id: &str) -> Result<(), HistoryError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(HistoryError::InvalidSessionId { id: id.to_string() })
    }
}

async fn append_line<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), HistoryError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Cut a file back to its last newline. Missing or clean files are untouched.
async fn truncate_torn_tail(path: &Path) -> Result<(), HistoryError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if raw.last().is_none_or(|b| *b == b'\n') {
        return Ok(());
    }

    let keep = raw.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    tracing::warn!(
        path = %path.display(),
        dropped_bytes = raw.len() - keep,
        "Truncating torn record at end of history file"
    );
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(keep as u64).await?;
    file.sync_all().await?;
    Ok(())
}

/// Read a JSONL file, skipping lines that do not parse. Missing files are empty.
async fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, HistoryError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut out = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => out.push(value),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    "Skipping unreadable history line: {}",
                    e
                );
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ToolCall};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn store() -> (TempDir, HistoryStore) {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::open(tmp.path().join("history")).await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn create_and_save_updates_index() {
        let (_tmp, store) = store().await;
        store.create_session("A", "S1").await.unwrap();

        let updated = store
            .save_message(
                "S1",
                &HistoryMessage::user(
                    "This is a long question that should definitely be truncated now",
                ),
            )
            .await
            .unwrap();

        assert_eq!(updated.message_count, 1);
        assert_eq!(
            updated.title.as_deref(),
            Some("This is a long question that should definitely be ...")
        );
        assert_eq!(store.get_messages("S1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn title_only_from_first_user_message() {
        let (_tmp, store) = store().await;
        store.create_session("A", "S1").await.unwrap();
        store
            .save_message("S1", &HistoryMessage::assistant("greeting"))
            .await
            .unwrap();
        assert!(store.get_session("S1").await.unwrap().title.is_none());

        store.save_message("S1", &HistoryMessage::user("first")).await.unwrap();
        store.save_message("S1", &HistoryMessage::user("second")).await.unwrap();
        assert_eq!(
            store.get_session("S1").await.unwrap().title.as_deref(),
            Some("first")
        );
    }

    #[tokio::test]
    async fn at_most_one_session_per_id() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("history");
        {
            let store = HistoryStore::open(&root).await.unwrap();
            store.create_session("A", "S1").await.unwrap();
            store.create_session("A", "S1").await.unwrap();
            for i in 0..5 {
                store
                    .save_message("S1", &HistoryMessage::user(format!("msg {i}")))
                    .await
                    .unwrap();
            }
            assert_eq!(store.list_sessions().await.len(), 1);
        }

        let reopened = HistoryStore::open(&root).await.unwrap();
        let sessions = reopened.list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count, 5);
    }

    #[tokio::test]
    async fn save_to_unknown_session_fails() {
        let (_tmp, store) = store().await;
        let err = store
            .save_message("ghost", &HistoryMessage::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn missing_session_has_no_messages() {
        let (_tmp, store) = store().await;
        assert!(store.get_messages("nope").await.unwrap().is_empty());
        assert!(store.get_messages("../../etc/passwd").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn most_recent_first() {
        let (_tmp, store) = store().await;
        store.create_session("A", "old").await.unwrap();
        store.create_session("A", "new").await.unwrap();
        store.save_message("new", &HistoryMessage::user("x")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.save_message("old", &HistoryMessage::user("y")).await.unwrap();

        let ids: Vec<String> = store.list_sessions().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["old".to_string(), "new".to_string()]);
    }

    #[tokio::test]
    async fn torn_last_line_is_skipped_and_count_repaired() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("history");
        {
            let store = HistoryStore::open(&root).await.unwrap();
            store.create_session("A", "S1").await.unwrap();
            store.save_message("S1", &HistoryMessage::user("one")).await.unwrap();
            store.save_message("S1", &HistoryMessage::user("two")).await.unwrap();
        }
        // Simulate a crash mid-append.
        let log = root.join("sessions").join("S1.jsonl");
        let mut raw = std::fs::read_to_string(&log).unwrap();
        raw.push_str("{\"timestamp\":\"2026-");
        std::fs::write(&log, raw).unwrap();

        let store = HistoryStore::open(&root).await.unwrap();
        assert_eq!(store.get_messages("S1").await.unwrap().len(), 2);
        assert_eq!(store.get_session("S1").await.unwrap().message_count, 2);
    }

    #[tokio::test]
    async fn append_after_torn_line_is_readable() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("history");
        {
            let store = HistoryStore::open(&root).await.unwrap();
            store.create_session("A", "S1").await.unwrap();
            store.save_message("S1", &HistoryMessage::user("one")).await.unwrap();
        }
        let log = root.join("sessions").join("S1.jsonl");
        let mut raw = std::fs::read_to_string(&log).unwrap();
        raw.push_str("{\"timestamp\":\"2026-");
        std::fs::write(&log, raw).unwrap();

        let store = HistoryStore::open(&root).await.unwrap();
        let updated = store
            .save_message("S1", &HistoryMessage::assistant("after crash"))
            .await
            .unwrap();

        let contents: Vec<String> = store
            .get_messages("S1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["one", "after crash"]);
        assert_eq!(updated.message_count, 2);
        assert!(std::fs::read_to_string(&log).unwrap().ends_with('\n'));
    }

    #[tokio::test]
    async fn torn_index_record_is_dropped_on_open() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("history");
        {
            let store = HistoryStore::open(&root).await.unwrap();
            store.create_session("A", "S1").await.unwrap();
        }
        let index = root.join("index.jsonl");
        let mut raw = std::fs::read_to_string(&index).unwrap();
        raw.push_str("{\"id\":\"S2\",");
        std::fs::write(&index, raw).unwrap();

        let store = HistoryStore::open(&root).await.unwrap();
        store.create_session("A", "S3").await.unwrap();
        drop(store);

        let reopened = HistoryStore::open(&root).await.unwrap();
        let mut ids: Vec<String> = reopened
            .list_sessions()
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["S1".to_string(), "S3".to_string()]);
    }

    #[tokio::test]
    async fn update_title_and_delete() {
        let (tmp, store) = store().await;
        store.create_session("A", "S1").await.unwrap();
        store.save_message("S1", &HistoryMessage::user("hello")).await.unwrap();

        let renamed = store.update_session_title("S1", "Renamed").await.unwrap();
        assert_eq!(renamed.title.as_deref(), Some("Renamed"));

        assert!(store.delete_session("S1").await.unwrap());
        assert!(!store.delete_session("S1").await.unwrap());
        assert!(store.get_session("S1").await.is_none());
        assert!(!tmp.path().join("history/sessions/S1.jsonl").exists());
    }

    #[tokio::test]
    async fn tool_calls_survive_persistence() {
        let (_tmp, store) = store().await;
        store.create_session("A", "S1").await.unwrap();
        let original = ChatMessage::assistant_with_tool_calls(
            None,
            vec![ToolCall {
                id: "call_9".into(),
                name: "current_time".into(),
                arguments: serde_json::json!({}),
            }],
        );
        store
            .save_message("S1", &HistoryMessage::from(&original))
            .await
            .unwrap();

        let messages = store.get_messages("S1").await.unwrap();
        assert_eq!(ChatMessage::from(&messages[0]), original);
    }

    #[tokio::test]
    async fn concurrent_writers_keep_counts_exact() {
        let (_tmp, store) = store().await;
        let store = Arc::new(store);
        for s in ["a", "b", "c"] {
            store.create_session("A", s).await.unwrap();
        }

        let mut handles = Vec::new();
        for s in ["a", "b", "c"] {
            for i in 0..10 {
                let store = Arc::clone(&store);
                handles.push(tokio::spawn(async move {
                    store
                        .save_message(s, &HistoryMessage::user(format!("{i}")))
                        .await
                        .unwrap();
                }));
            }
        }
        for h in handles {
            h.await.unwrap();
        }

        for session in store.list_sessions().await {
            assert_eq!(session.message_count, 10);
            assert_eq!(store.get_messages(&session.id).await.unwrap().len(), 10);
        }
    }
}
