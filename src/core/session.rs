//! Per-conversation state of the interactive conversion flow

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sessions untouched for this long are dropped.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Identity of one user inside one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId {
    pub chat_id: i64,
    pub user_id: i64,
}

/// Idle → AwaitingToCurrency → AwaitingAmount → Idle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingToCurrency {
        from: String,
    },
    AwaitingAmount {
        from: String,
        to: String,
    },
}

impl SessionState {
    /// Picking a source currency (re)starts the flow from any state.
    pub fn pick_from(self, from: String) -> SessionState {
        SessionState::AwaitingToCurrency { from }
    }

    /// Picking a target currency is only valid right after a source was picked.
    pub fn pick_to(self, to: String) -> Option<SessionState> {
        match self {
            SessionState::AwaitingToCurrency { from } => {
                Some(SessionState::AwaitingAmount { from, to })
            }
            _ => None,
        }
    }
}

struct Entry {
    state: SessionState,
    touched: Instant,
}

/// Session map keyed by conversation. Idle sessions are not stored and
/// abandoned ones expire after the TTL.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<ConversationId, Entry>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        SessionStore {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Current state, `Idle` when absent or expired.
    pub async fn get(&self, id: ConversationId) -> SessionState {
        let sessions = self.inner.lock().await;
        match sessions.get(&id) {
            Some(entry) if entry.touched.elapsed() < self.ttl => entry.state.clone(),
            _ => SessionState::Idle,
        }
    }

    pub async fn set(&self, id: ConversationId, state: SessionState) {
        let mut sessions = self.inner.lock().await;
        debug!(?id, ?state, "Session transition");
        let ttl = self.ttl;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.touched.elapsed() < ttl);
        if sessions.len() < before {
            debug!(expired = before - sessions.len(), "Dropped stale sessions");
        }
        if state == SessionState::Idle {
            sessions.remove(&id);
        } else {
            sessions.insert(
                id,
                Entry {
                    state,
                    touched: Instant::now(),
                },
            );
        }
    }

    pub async fn clear(&self, id: ConversationId) {
        self.set(id, SessionState::Idle).await;
    }

    /// Stored sessions, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
