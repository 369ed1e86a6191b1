use crate::feed::message::Message;
use std::borrow::Borrow;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// In-memory feed in display order: live pushes (most recent first)
/// followed by the historical load (newest timestamp first).
///
/// Grows for the lifetime of the session. Nothing is evicted or
/// deduplicated; identical payloads are kept as separate entries.
#[derive(Debug, Default)]
pub struct MessageStore {
    live: VecDeque<Arc<Message>>,
    history: Vec<Arc<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the historical set, sorted newest first. Live entries that
    /// arrived before the load stay ahead of it.
    pub fn bulk_load(&mut self, messages: Vec<Message>) -> usize {
        let mut history: Vec<Arc<Message>> = messages.into_iter().map(Arc::new).collect();
        sort_newest_first(&mut history);
        let loaded = history.len();
        self.history = history;
        loaded
    }

    /// Inserts at the head regardless of the message's own timestamp.
    pub fn prepend_live(&mut self, message: Message) -> Arc<Message> {
        let shared = Arc::new(message);
        self.live.push_front(Arc::clone(&shared));
        shared
    }

    pub fn len(&self) -> usize {
        self.live.len() + self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Message>> + '_ {
        self.live.iter().chain(self.history.iter())
    }

    pub fn snapshot(&self) -> Vec<Arc<Message>> {
        self.iter().cloned().collect()
    }

    /// Distinct non-empty pairs in order of first appearance.
    pub fn unique_pairs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.iter()
            .filter_map(|message| message.pair.as_deref())
            .filter(|pair| !pair.trim().is_empty())
            .filter(|pair| seen.insert(*pair))
            .map(str::to_string)
            .collect()
    }
}

/// Descending by timestamp; missing or unparsable timestamps sort last.
/// Stable, so equal instants keep their input order.
pub fn sort_newest_first<M: Borrow<Message>>(messages: &mut [M]) {
    messages.sort_by(|lhs, rhs| {
        rhs.borrow()
            .timestamp_ms()
            .cmp(&lhs.borrow().timestamp_ms())
    });
}
