//! In-process registry of live conversations.
//!
//! A turn checks its conversation out of the registry and holds it
//! exclusively until the lease is committed or dropped. Dropping an
//! uncommitted lease (handler error or cancelled request) restores the state
//! the turn started from. Conversations left idle longer than the configured
//! TTL are dropped the next time any conversation is checked out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use switchboard_core::domain::conversation::{ConversationId, ConversationState};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("conversation `{0}` already has a turn in progress")]
pub struct SessionBusy(pub String);

const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

enum SessionSlot {
    Idle { state: ConversationState, last_used: Instant },
    Busy,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<ConversationId, SessionSlot>>,
    idle_ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), idle_ttl }
    }

    /// Unknown conversations start fresh, bound to `user_id`.
    pub fn checkout(
        self: &Arc<Self>,
        conversation_id: &ConversationId,
        user_id: Option<&str>,
    ) -> Result<SessionLease, SessionBusy> {
        self.checkout_at(conversation_id, user_id, Instant::now())
    }

    fn checkout_at(
        self: &Arc<Self>,
        conversation_id: &ConversationId,
        user_id: Option<&str>,
        now: Instant,
    ) -> Result<SessionLease, SessionBusy> {
        let mut sessions = self.lock();
        self.evict_idle(&mut sessions, now);
        let snapshot = match sessions.insert(conversation_id.clone(), SessionSlot::Busy) {
            Some(SessionSlot::Idle { state, .. }) => state,
            Some(SessionSlot::Busy) => return Err(SessionBusy(conversation_id.0.clone())),
            None => ConversationState::new(conversation_id.clone(), user_id.map(str::to_string)),
        };

        Ok(SessionLease {
            registry: Arc::clone(self),
            state: snapshot.clone(),
            snapshot: Some(snapshot),
        })
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<ConversationState> {
        match self.lock().get(conversation_id) {
            Some(SessionSlot::Idle { state, .. }) => Some(state.clone()),
            _ => None,
        }
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, state: ConversationState) {
        let conversation_id = state.conversation_id.clone();
        self.lock().insert(conversation_id, SessionSlot::Idle { state, last_used: Instant::now() });
    }

    /// In-flight turns are never evicted.
    fn evict_idle(&self, sessions: &mut HashMap<ConversationId, SessionSlot>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, slot| match slot {
            SessionSlot::Idle { last_used, .. } => {
                now.saturating_duration_since(*last_used) < self.idle_ttl
            }
            SessionSlot::Busy => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(
                event_name = "server.sessions.evicted",
                evicted,
                remaining = sessions.len(),
                "dropped idle conversations"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    state: ConversationState,
    snapshot: Option<ConversationState>,
}

impl SessionLease {
    pub fn state_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Publishes the working state back to the registry.
    pub fn commit(mut self) {
        self.snapshot = None;
        let state = self.state.clone();
        self.registry.release(state);
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.registry.release(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use switchboard_core::domain::conversation::{ConversationId, Message};

    use super::{SessionBusy, SessionRegistry};

    fn conversation(id: &str) -> ConversationId {
        ConversationId(id.to_string())
    }

    #[test]
    fn second_checkout_of_same_conversation_is_busy() {
        let registry = Arc::new(SessionRegistry::default());
        let _lease = registry.checkout(&conversation("conv-1"), Some("user-1")).expect("first");

        let second = registry.checkout(&conversation("conv-1"), Some("user-1"));
        assert_eq!(second.err(), Some(SessionBusy("conv-1".to_string())));
        assert!(registry.checkout(&conversation("conv-2"), None).is_ok());
        assert_eq!(registry.conversation_count(), 2);
    }

    #[test]
    fn committed_state_is_visible_to_the_next_turn() {
        let registry = Arc::new(SessionRegistry::default());
        let mut lease = registry.checkout(&conversation("conv-1"), Some("user-1")).expect("lease");
        lease.state_mut().append_message(Message::user("hello"));
        lease.commit();

        let next = registry.checkout(&conversation("conv-1"), None).expect("released");
        assert_eq!(next.state().messages().len(), 1);
        assert_eq!(next.state().user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn dropped_lease_restores_the_starting_state() {
        let registry = Arc::new(SessionRegistry::default());
        let mut lease = registry.checkout(&conversation("conv-1"), None).expect("lease");
        lease.state_mut().append_message(Message::user("half-finished"));
        drop(lease);

        let state = registry.get(&conversation("conv-1")).expect("idle again");
        assert!(state.messages().is_empty());
    }

    #[test]
    fn idle_conversations_expire_but_busy_ones_stay() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let mut lease = registry.checkout(&conversation("conv-old"), Some("user-1")).expect("lease");
        lease.state_mut().append_message(Message::user("remember me"));
        lease.commit();
        let _busy = registry.checkout(&conversation("conv-busy"), None).expect("busy lease");

        let later = Instant::now() + Duration::from_secs(61);
        let lease = registry.checkout_at(&conversation("conv-new"), None, later).expect("lease");
        drop(lease);

        assert!(registry.get(&conversation("conv-old")).is_none());
        assert_eq!(registry.conversation_count(), 2);
        let second = registry.checkout(&conversation("conv-busy"), None);
        assert_eq!(second.err(), Some(SessionBusy("conv-busy".to_string())));

        let fresh = registry.checkout(&conversation("conv-old"), None).expect("recreated");
        assert!(fresh.state().messages().is_empty());
    }

    #[test]
    fn recently_used_conversations_survive_a_sweep() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        registry.checkout(&conversation("conv-1"), None).expect("lease").commit();

        let soon = Instant::now() + Duration::from_secs(30);
        drop(registry.checkout_at(&conversation("conv-2"), None, soon).expect("lease"));

        assert!(registry.get(&conversation("conv-1")).is_some());
    }
}
