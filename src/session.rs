//! Session lifecycle and conversation history.
//!
//! A session binds one uploaded document, its knowledge store, and its
//! conversation history to a lifecycle state: `processing → ready |
//! error`. Queries are accepted only in `ready`; the state gate, not a
//! lock, is what keeps readers away from a store that is still being
//! built.
//!
//! [`SessionStore`] is an explicit, injectable registry (cloned into
//! request handlers) rather than a process-wide global.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Processing,
    Ready,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Processing => "processing",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
        }
    }
}

/// Errors callers must distinguish: an unknown session is not the same
/// as a known session that cannot answer yet.
#[derive(Debug)]
pub enum SessionError {
    NotFound(String),
    NotReady {
        id: String,
        state: SessionState,
        message: String,
    },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotFound(id) => write!(f, "session not found: {}", id),
            SessionError::NotReady { id, state, message } => {
                write!(
                    f,
                    "session {} is not ready (state: {}): {}",
                    id,
                    state.as_str(),
                    message
                )
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// One session's bookkeeping.
pub struct Session {
    pub state: SessionState,
    pub message: String,
    pub document_name: Option<String>,
    pub dir: PathBuf,
    pub store_path: Option<PathBuf>,
    pub history: Vec<Turn>,
    pub cancelled: Arc<AtomicBool>,
}

/// Status snapshot returned to callers.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub message: String,
    pub document_name: Option<String>,
}

/// Thread-safe session registry, shared by cloning.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore::default()
    }

    /// Create a new session in `processing` state, with its working
    /// directory under `parent_dir` keyed by the session id. Returns the
    /// id, the directory, and the cancellation flag for the background
    /// ingestion task.
    pub async fn create(
        &self,
        parent_dir: &Path,
        document_name: Option<String>,
    ) -> std::io::Result<(String, PathBuf, Arc<AtomicBool>)> {
        let id = Uuid::new_v4().to_string();
        let dir = parent_dir.join(&id);
        std::fs::create_dir_all(&dir)?;
        let cancelled = Arc::new(AtomicBool::new(false));

        let session = Session {
            state: SessionState::Processing,
            message: "Processing started".to_string(),
            document_name,
            dir: dir.clone(),
            store_path: None,
            history: Vec::new(),
            cancelled: cancelled.clone(),
        };

        self.inner.write().await.insert(id.clone(), session);
        Ok((id, dir, cancelled))
    }

    /// Update the progress message of a processing session. A no-op if
    /// the session was deleted in the meantime.
    pub async fn set_message(&self, id: &str, message: &str) {
        if let Some(session) = self.inner.write().await.get_mut(id) {
            session.message = message.to_string();
        }
    }

    pub async fn mark_ready(&self, id: &str, store_path: PathBuf, message: &str) {
        if let Some(session) = self.inner.write().await.get_mut(id) {
            session.state = SessionState::Ready;
            session.store_path = Some(store_path);
            session.message = message.to_string();
        }
    }

    pub async fn mark_error(&self, id: &str, message: &str) {
        if let Some(session) = self.inner.write().await.get_mut(id) {
            session.state = SessionState::Error;
            session.message = message.to_string();
        }
    }

    pub async fn status(&self, id: &str) -> Result<SessionStatus, SessionError> {
        let sessions = self.inner.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(SessionStatus {
            state: session.state,
            message: session.message.clone(),
            document_name: session.document_name.clone(),
        })
    }

    /// Gate for query handling: returns the store path and a history
    /// snapshot only when the session is `ready`.
    pub async fn ready_store(&self, id: &str) -> Result<(PathBuf, Vec<Turn>), SessionError> {
        let sessions = self.inner.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        match (session.state, &session.store_path) {
            (SessionState::Ready, Some(path)) => Ok((path.clone(), session.history.clone())),
            _ => Err(SessionError::NotReady {
                id: id.to_string(),
                state: session.state,
                message: session.message.clone(),
            }),
        }
    }

    /// Append a completed user/assistant exchange to the history.
    pub async fn append_exchange(
        &self,
        id: &str,
        user: &str,
        assistant: &str,
    ) -> Result<(), SessionError> {
        let mut sessions = self.inner.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.history.push(Turn::user(user));
        session.history.push(Turn::assistant(assistant));
        Ok(())
    }

    pub async fn history(&self, id: &str) -> Result<Vec<Turn>, SessionError> {
        let sessions = self.inner.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(session.history.clone())
    }

    /// End a session: signal cancellation to in-flight ingestion and
    /// remove the session directory. Best-effort on the filesystem side;
    /// the entry itself is always removed.
    pub async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let session = self
            .inner
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        session.cancelled.store(true, Ordering::Relaxed);
        if let Err(e) = std::fs::remove_dir_all(&session.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                eprintln!(
                    "Warning: could not remove session dir {}: {}",
                    session.dir.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_query_gated_until_ready() {
        let store = SessionStore::new();
        let tmp = TempDir::new().unwrap();
        let (id, _dir, _) = store
            .create(tmp.path(), Some("report.pdf".to_string()))
            .await
            .unwrap();

        let err = store.ready_store(&id).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::NotReady {
                state: SessionState::Processing,
                ..
            }
        ));

        store
            .mark_ready(&id, tmp.path().join("knowledge.sqlite"), "Ready")
            .await;
        let (path, history) = store.ready_store(&id).await.unwrap();
        assert!(path.ends_with("knowledge.sqlite"));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_errored_session_rejects_queries() {
        let store = SessionStore::new();
        let tmp = TempDir::new().unwrap();
        let (id, _dir, _) = store.create(tmp.path(), None).await.unwrap();
        store.mark_error(&id, "parser crashed").await;

        let err = store.ready_store(&id).await.unwrap_err();
        match err {
            SessionError::NotReady { state, message, .. } => {
                assert_eq!(state, SessionState::Error);
                assert_eq!(message, "parser crashed");
            }
            other => panic!("expected NotReady, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_session_is_distinct_error() {
        let store = SessionStore::new();
        assert!(matches!(
            store.status("nope").await.unwrap_err(),
            SessionError::NotFound(_)
        ));
        assert!(matches!(
            store.ready_store("nope").await.unwrap_err(),
            SessionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_history_appends_in_order() {
        let store = SessionStore::new();
        let tmp = TempDir::new().unwrap();
        let (id, _dir, _) = store.create(tmp.path(), None).await.unwrap();

        store.append_exchange(&id, "q1", "a1").await.unwrap();
        store.append_exchange(&id, "q2", "a2").await.unwrap();

        let history = store.history(&id).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
    }

    #[tokio::test]
    async fn test_delete_signals_cancellation_and_removes_dir() {
        let store = SessionStore::new();
        let tmp = TempDir::new().unwrap();
        let (id, dir, cancelled) = store.create(tmp.path(), None).await.unwrap();
        std::fs::write(dir.join("doc.pdf"), b"%PDF").unwrap();

        store.delete(&id).await.unwrap();

        assert!(cancelled.load(Ordering::Relaxed));
        assert!(!dir.exists());
        assert!(matches!(
            store.status(&id).await.unwrap_err(),
            SessionError::NotFound(_)
        ));
    }
}
