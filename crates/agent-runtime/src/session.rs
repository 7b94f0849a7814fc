use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::content::Content;

/// Conversation state of one live session. Clones share the history.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    /// Distinguishes this session from earlier ones created under the same id.
    pub generation: u64,
    history: Arc<Mutex<Vec<Content>>>,
}

impl Session {
    fn new(app_name: &str, user_id: &str, id: &str, generation: u64) -> Self {
        Self {
            id: id.to_string(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            generation,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn history(&self) -> Vec<Content> {
        self.history.lock().await.clone()
    }

    pub async fn append(&self, content: Content) {
        self.history.lock().await.push(content);
    }

    pub async fn extend(&self, contents: Vec<Content>) {
        self.history.lock().await.extend(contents);
    }
}

/// In-memory session store keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct SessionService {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    next_generation: Arc<AtomicU64>,
}

impl SessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh session, replacing any previous one with the same id.
    pub async fn create_session(&self, app_name: &str, user_id: &str, session_id: &str) -> Session {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(app_name, user_id, session_id, generation);
        let replaced = self
            .sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        if replaced.is_some() {
            debug!(session_id, "replaced existing session");
        }
        session
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn delete_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Removes the session only if it is still the given generation. A newer
    /// session created under the same id is left alone.
    pub async fn delete_session_if(&self, session_id: &str, generation: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(session_id) {
            Some(session) if session.generation == generation => {
                sessions.remove(session_id);
                true
            }
            Some(session) => {
                debug!(
                    session_id,
                    stale = generation,
                    current = session.generation,
                    "kept newer session"
                );
                false
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
