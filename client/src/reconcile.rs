//! Canonical per-session reward outcomes.
//!
//! An authoritative value always wins. A fallback estimate is provisional: it is returned on
//! every repeat until the authority answers, then replaced once and frozen.

use minigame_types::{RewardResult, RewardSource, SessionId};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

pub struct ReconciliationResolver {
    results: HashMap<SessionId, RewardResult>,
    order: VecDeque<SessionId>,
    capacity: usize,
    evicted: Vec<SessionId>,
}

impl ReconciliationResolver {
    pub fn new(capacity: usize) -> Self {
        Self {
            results: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            evicted: Vec::new(),
        }
    }

    /// Resolve the outcome for `session_id`.
    ///
    /// Returns the cached result unchanged if it is already authoritative, or if no
    /// authoritative value is supplied and a result exists.
    pub fn resolve(
        &mut self,
        session_id: &SessionId,
        authoritative: Option<u64>,
        fallback_coins: u64,
        now_ms: u64,
    ) -> RewardResult {
        if let Some(existing) = self.results.get(session_id) {
            match authoritative {
                Some(_) if !existing.is_authoritative() => {}
                _ => {
                    debug!(%session_id, source = ?existing.source, "returning cached result");
                    return existing.clone();
                }
            }
        }

        let result = match authoritative {
            Some(coins) => RewardResult {
                session_id: session_id.clone(),
                coins_earned: coins,
                source: RewardSource::Authority,
                reconciled_at: now_ms,
            },
            None => RewardResult {
                session_id: session_id.clone(),
                coins_earned: fallback_coins,
                source: RewardSource::Fallback,
                reconciled_at: now_ms,
            },
        };

        if let Some(previous) = self.results.insert(session_id.clone(), result.clone()) {
            info!(
                %session_id,
                estimate = previous.coins_earned,
                authoritative = result.coins_earned,
                "fallback result reconciled"
            );
        } else {
            self.order.push_back(session_id.clone());
            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.results.remove(&oldest);
                    self.evicted.push(oldest);
                }
            }
        }
        result
    }

    pub fn result(&self, session_id: &SessionId) -> Option<&RewardResult> {
        self.results.get(session_id)
    }

    /// Forget a provisional result. Authoritative results are never revoked.
    pub fn revoke(&mut self, session_id: &SessionId) -> Option<RewardResult> {
        if self.results.get(session_id)?.is_authoritative() {
            return None;
        }
        self.order.retain(|id| id != session_id);
        self.results.remove(session_id)
    }

    /// Sessions whose results were dropped to stay within capacity since the last call.
    pub fn take_evicted(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.evicted)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
