//! Hand-off stash for the first message of a brand-new chat.
//!
//! The home page creates the chat, stashes the typed text here, and
//! redirects. The chat page then consumes the text exactly once and
//! submits it as the first turn. Entries are scoped to the stashing
//! user and expire so abandoned redirects do not accumulate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

const PENDING_TTL: Duration = Duration::from_secs(600);

struct PendingEntry {
    user_id: String,
    text: String,
    stored_at: Instant,
}

#[derive(Default)]
pub struct PendingMessages {
    inner: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stash the text under the chat id, replacing any previous entry.
    pub async fn stash(&self, chat_id: &str, user_id: &str, text: &str) {
        let mut inner = self.inner.lock().await;
        inner.retain(|_, e| e.stored_at.elapsed() < PENDING_TTL);
        inner.insert(
            chat_id.to_string(),
            PendingEntry {
                user_id: user_id.to_string(),
                text: text.to_string(),
                stored_at: Instant::now(),
            },
        );
        debug!(chat_id, "pending message stashed");
    }

    /// Take the stashed text, if any. A second consume returns `None`, so
    /// a page refresh never re-submits the first turn. A consume by a
    /// different user also returns `None` and leaves the entry in place
    /// for its owner.
    pub async fn consume(&self, chat_id: &str, user_id: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        if inner.get(chat_id)?.user_id != user_id {
            return None;
        }
        let entry = inner.remove(chat_id)?;
        if entry.stored_at.elapsed() >= PENDING_TTL {
            return None;
        }
        Some(entry.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consume_is_one_shot() {
        let pending = PendingMessages::new();
        pending.stash("chat-1", "user-a", "Liste mes clients").await;

        assert_eq!(
            pending.consume("chat-1", "user-a").await.as_deref(),
            Some("Liste mes clients")
        );
        assert_eq!(pending.consume("chat-1", "user-a").await, None);
    }

    #[tokio::test]
    async fn stash_replaces_previous_entry() {
        let pending = PendingMessages::new();
        pending.stash("chat-1", "user-a", "premier").await;
        pending.stash("chat-1", "user-a", "second").await;

        assert_eq!(
            pending.consume("chat-1", "user-a").await.as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn unknown_chat_yields_nothing() {
        let pending = PendingMessages::new();
        assert_eq!(pending.consume("chat-x", "user-a").await, None);
    }

    #[tokio::test]
    async fn other_user_cannot_consume_or_destroy_entry() {
        let pending = PendingMessages::new();
        pending.stash("chat-1", "user-a", "texte privé").await;

        // Someone else probing the chat id gets nothing back.
        assert_eq!(pending.consume("chat-1", "user-b").await, None);

        // The entry is still there for its owner.
        assert_eq!(
            pending.consume("chat-1", "user-a").await.as_deref(),
            Some("texte privé")
        );
    }
}
