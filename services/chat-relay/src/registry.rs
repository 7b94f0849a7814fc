use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Presence {
    pub connection_id: Uuid,
    pub connected_at: Instant,
}

/// Sessions with a live WebSocket, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Presence>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection for `session_id` and returns its connection id.
    /// A previous connection under the same id is displaced.
    pub async fn register(&self, session_id: &str) -> Uuid {
        let presence = Presence {
            connection_id: Uuid::new_v4(),
            connected_at: Instant::now(),
        };
        let connection_id = presence.connection_id;
        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.insert(session_id.to_string(), presence) {
            warn!(
                session_id,
                previous = %previous.connection_id,
                previous_age = ?previous.connected_at.elapsed(),
                "session id reused while a connection was still registered"
            );
        }
        debug!(session_id, %connection_id, active = sessions.len(), "session registered");
        connection_id
    }

    /// Removes the entry only if it still belongs to `connection_id`, and
    /// returns how long that connection was registered.
    pub async fn unregister(&self, session_id: &str, connection_id: Uuid) -> Option<Duration> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(session_id) {
            Some(presence) if presence.connection_id == connection_id => {
                let connected_for = presence.connected_at.elapsed();
                sessions.remove(session_id);
                debug!(
                    session_id,
                    ?connected_for,
                    active = sessions.len(),
                    "session unregistered"
                );
                Some(connected_for)
            }
            _ => None,
        }
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Option<Presence> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
