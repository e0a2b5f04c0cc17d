use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tracing::debug;

use conduit_primitives::PeerId;

use crate::fraud::Severity;

const DEFAULT_MAX_SCORE: i64 = 100;
const DEFAULT_AUTO_PAUSE_THRESHOLD: i64 = 50;
const DEFAULT_DECAY_RATE_PER_DAY: i64 = 1;

/// A single penalty applied to a peer's reputation.
#[derive(Debug, Clone)]
pub struct ViolationRecord {
    pub rule: &'static str,
    pub severity: Severity,
    pub at: OffsetDateTime,
}

struct PeerReputation {
    score: i64,
    last_updated: OffsetDateTime,
    violations: Vec<ViolationRecord>,
}

/// A read-only snapshot of a peer's reputation.
#[derive(Debug, Clone, Copy)]
pub struct ReputationScore {
    pub score: i64,
    pub last_updated: OffsetDateTime,
}

/// Per-peer score with severity-weighted penalties and time-based decay.
///
/// Uses the same double-checked-locking peer registry as the rate limiter's
/// bucket map: a read lock on the common path, a write lock only the first
/// time a peer is observed.
pub struct ReputationTracker {
    max_score: i64,
    auto_pause_threshold: i64,
    decay_rate_per_day: i64,
    peers: RwLock<HashMap<PeerId, Arc<Mutex<PeerReputation>>>>,
}

impl ReputationTracker {
    pub fn new() -> Self {
        Self::with_params(
            DEFAULT_MAX_SCORE,
            DEFAULT_AUTO_PAUSE_THRESHOLD,
            DEFAULT_DECAY_RATE_PER_DAY,
        )
    }

    pub fn with_params(max_score: i64, auto_pause_threshold: i64, decay_rate_per_day: i64) -> Self {
        Self {
            max_score,
            auto_pause_threshold,
            decay_rate_per_day,
            peers: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, peer: &PeerId) -> Arc<Mutex<PeerReputation>> {
        if let Some(entry) = self.peers.read().get(peer) {
            return Arc::clone(entry);
        }
        let max_score = self.max_score;
        let mut peers = self.peers.write();
        peers
            .entry(peer.clone())
            .or_insert_with(|| {
                debug!(%peer, "creating new reputation state");
                Arc::new(Mutex::new(PeerReputation {
                    score: max_score,
                    last_updated: OffsetDateTime::now_utc(),
                    violations: Vec::new(),
                }))
            })
            .clone()
    }

    /// Apply a violation's severity penalty, clamped at zero. Initializes a
    /// peer to `max_score` on its first violation.
    pub fn update_reputation_score(
        &self,
        peer: &PeerId,
        rule: &'static str,
        severity: Severity,
        at: OffsetDateTime,
    ) -> i64 {
        let entry = self.get_or_create(peer);
        let mut state = entry.lock();
        state.score = (state.score - severity.penalty()).max(0);
        state.last_updated = at;
        state.violations.push(ViolationRecord { rule, severity, at });
        state.score
    }

    /// Add `whole_days_elapsed * decay_rate` back to the score, clamped at
    /// `max_score`. Only whole days count; a 1.9-day gap applies one day of
    /// decay and leaves the remaining 0.9 day outstanding, so `last_updated`
    /// advances by exactly the whole-day span consumed rather than to `now`.
    pub fn apply_score_decay(&self, peer: &PeerId, now: OffsetDateTime) {
        let Some(entry) = self.peers.read().get(peer).cloned() else {
            return;
        };
        let mut state = entry.lock();
        let days_elapsed = (now - state.last_updated).whole_days();
        if days_elapsed <= 0 {
            return;
        }
        state.score = (state.score + days_elapsed * self.decay_rate_per_day).min(self.max_score);
        state.last_updated += time::Duration::days(days_elapsed);
    }

    /// `score < auto_pause_threshold`. Unknown peers are never auto-paused.
    pub fn should_auto_pause(&self, peer: &PeerId) -> bool {
        self.peers
            .read()
            .get(peer)
            .map(|entry| entry.lock().score < self.auto_pause_threshold)
            .unwrap_or(false)
    }

    pub fn snapshot(&self, peer: &PeerId) -> Option<ReputationScore> {
        self.peers.read().get(peer).map(|entry| {
            let state = entry.lock();
            ReputationScore {
                score: state.score,
                last_updated: state.last_updated,
            }
        })
    }
}

impl Default for ReputationTracker {
    fn default() -> Self {
        Self::new()
    }
}
