//! Offline reward estimates and the bounded queue of results awaiting resync.

use crate::Result;
use minigame_types::{GameType, RewardTable, SessionId, SessionMetrics};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, warn};

/// A fallback-settled session waiting for the authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingResync {
    pub session_id: SessionId,
    pub authority_id: Option<SessionId>,
    pub game_type: GameType,
    pub local_score: u64,
    pub metrics: SessionMetrics,
    pub fallback_coins: u64,
    pub queued_at: u64,
}

pub struct FailureFallback {
    queue: VecDeque<PendingResync>,
    capacity: usize,
}

impl FailureFallback {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Deterministic estimate from the same table the screens display.
    pub fn estimate(game_type: GameType, local_score: u64, metrics: &SessionMetrics) -> u64 {
        RewardTable::for_game(game_type).estimate(local_score, metrics)
    }

    /// Queue an entry, replacing any entry for the same session. Returns the entry evicted to
    /// stay within capacity, if any.
    pub fn enqueue(&mut self, entry: PendingResync) -> Option<PendingResync> {
        self.remove(&entry.session_id);
        self.queue.push_back(entry);
        if self.queue.len() > self.capacity {
            let evicted = self.queue.pop_front();
            if let Some(evicted) = &evicted {
                warn!(session_id = %evicted.session_id, "resync queue full; dropping oldest entry");
            }
            return evicted;
        }
        None
    }

    pub fn remove(&mut self, session_id: &SessionId) -> Option<PendingResync> {
        let index = self
            .queue
            .iter()
            .position(|entry| &entry.session_id == session_id)?;
        self.queue.remove(index)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&PendingResync> {
        self.queue.iter().find(|entry| &entry.session_id == session_id)
    }

    /// Attach a late start acknowledgement to a queued entry.
    pub fn set_authority_id(&mut self, session_id: &SessionId, authority_id: SessionId) {
        if let Some(entry) = self
            .queue
            .iter_mut()
            .find(|entry| &entry.session_id == session_id)
        {
            entry.authority_id = Some(authority_id);
        }
    }

    pub fn pending(&self) -> Vec<PendingResync> {
        self.queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded = serde_json::to_vec(&self.queue)?;
        std::fs::write(path, encoded)?;
        debug!(path = %path.display(), entries = self.queue.len(), "resync queue saved");
        Ok(())
    }

    /// Load a queue saved by [FailureFallback::save]. A missing or unreadable file yields an
    /// empty queue: resync is best effort.
    pub fn load(path: &Path, capacity: usize) -> Self {
        let mut fallback = Self::new(capacity);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return fallback,
            Err(err) => {
                warn!(?err, path = %path.display(), "failed to read resync queue");
                return fallback;
            }
        };
        match serde_json::from_slice::<Vec<PendingResync>>(&bytes) {
            Ok(entries) => {
                for entry in entries {
                    fallback.enqueue(entry);
                }
            }
            Err(err) => warn!(?err, path = %path.display(), "discarding corrupt resync queue"),
        }
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, coins: u64) -> PendingResync {
        PendingResync {
            session_id: SessionId::new(id),
            authority_id: None,
            game_type: GameType::CoinHunt,
            local_score: coins,
            metrics: SessionMetrics::default(),
            fallback_coins: coins,
            queued_at: 0,
        }
    }

    #[test]
    fn estimate_is_deterministic() {
        let metrics = SessionMetrics::default();
        let a = FailureFallback::estimate(GameType::MemoryMatch, 80, &metrics);
        let b = FailureFallback::estimate(GameType::MemoryMatch, 80, &metrics);
        assert_eq!(a, b);
        assert_eq!(a, 80);
        assert_eq!(
            FailureFallback::estimate(GameType::MemoryMatch, 1_000, &metrics),
            RewardTable::for_game(GameType::MemoryMatch).max_coins
        );
    }

    #[test]
    fn queue_is_bounded_and_deduplicated() {
        let mut fallback = FailureFallback::new(2);
        assert!(fallback.enqueue(entry("a", 1)).is_none());
        assert!(fallback.enqueue(entry("b", 2)).is_none());
        assert!(fallback.enqueue(entry("a", 3)).is_none());
        assert_eq!(fallback.len(), 2);
        assert_eq!(fallback.get(&SessionId::new("a")).unwrap().fallback_coins, 3);

        let evicted = fallback.enqueue(entry("c", 4)).unwrap();
        assert_eq!(evicted.session_id, SessionId::new("b"));
        let ids: Vec<_> = fallback
            .pending()
            .into_iter()
            .map(|entry| entry.session_id)
            .collect();
        assert_eq!(ids, vec![SessionId::new("a"), SessionId::new("c")]);
    }

    #[test]
    fn late_ack_is_attached() {
        let mut fallback = FailureFallback::new(4);
        fallback.enqueue(entry("a", 1));
        fallback.set_authority_id(&SessionId::new("a"), SessionId::new("srv-9"));
        assert_eq!(
            fallback.get(&SessionId::new("a")).unwrap().authority_id,
            Some(SessionId::new("srv-9"))
        );
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resync.json");

        let mut fallback = FailureFallback::new(4);
        fallback.enqueue(entry("a", 1));
        fallback.enqueue(entry("b", 2));
        fallback.save(&path).unwrap();

        let loaded = FailureFallback::load(&path, 4);
        assert_eq!(loaded.pending(), fallback.pending());

        // Capacity applies on load too.
        assert_eq!(FailureFallback::load(&path, 1).len(), 1);
    }

    #[test]
    fn load_tolerates_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(FailureFallback::load(&missing, 4).is_empty());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, b"{not json").unwrap();
        assert!(FailureFallback::load(&corrupt, 4).is_empty());
    }
}
