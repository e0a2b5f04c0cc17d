use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use conduit_primitives::{PeerId, RequestType};

use crate::token_bucket::TokenBucket;
use crate::violation_counter::ViolationCounter;

const MIN_MULTIPLIER: f64 = 0.1;
const MAX_MULTIPLIER: f64 = 5.0;
const MULTIPLIER_DECAY: f64 = 0.9;

/// Static configuration for [`RateLimiter`]. Validated once at
/// construction; any violation is a fatal `ConfigInvalid` error for the
/// caller (see [`RateLimiterConfig::validate`]).
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub default_capacity: f64,
    pub default_refill_rate: f64,
    pub violation_threshold: u32,
    pub window: Duration,
    pub block_duration: Duration,
    pub adaptive_enabled: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_capacity: 100.0,
            default_refill_rate: 100.0,
            violation_threshold: 5,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(30),
            adaptive_enabled: true,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_capacity <= 0.0 {
            return Err("default_capacity must be positive".into());
        }
        if self.default_refill_rate < 0.0 {
            return Err("default_refill_rate must be non-negative".into());
        }
        if self.violation_threshold == 0 {
            return Err("violation_threshold must be positive".into());
        }
        Ok(())
    }
}

/// Per-peer override of the default bucket shape.
#[derive(Debug, Clone, Copy)]
pub struct PeerBucketOverride {
    pub capacity: f64,
    pub refill_rate: f64,
}

struct PeerBucket {
    bucket: TokenBucket,
    multiplier: Mutex<f64>,
    override_shape: Option<PeerBucketOverride>,
}

struct BlockRecord {
    unblock_at: Instant,
}

/// Per-peer admission decision; drives the circuit breaker block/unblock
/// via [`TokenBucket`] and [`ViolationCounter`].
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<PeerId, Arc<PeerBucket>>,
    blocked: DashMap<PeerId, BlockRecord>,
    violations: ViolationCounter,
    trusted: DashMap<PeerId, ()>,
    overrides: DashMap<PeerId, PeerBucketOverride>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            violations: ViolationCounter::new(config.window),
            config,
            buckets: DashMap::new(),
            blocked: DashMap::new(),
            trusted: DashMap::new(),
            overrides: DashMap::new(),
        })
    }

    pub fn mark_trusted(&self, peer: PeerId) {
        self.trusted.insert(peer, ());
    }

    pub fn set_override(&self, peer: PeerId, shape: PeerBucketOverride) {
        self.overrides.insert(peer, shape);
    }

    fn is_trusted(&self, peer: &PeerId) -> bool {
        self.trusted.contains_key(peer)
    }

    fn get_or_create_bucket(&self, peer: &PeerId) -> Arc<PeerBucket> {
        if let Some(b) = self.buckets.get(peer) {
            return Arc::clone(&b);
        }
        let override_shape = self.overrides.get(peer).map(|r| *r);
        let (capacity, rate) = override_shape
            .map(|o| (o.capacity, o.refill_rate))
            .unwrap_or((self.config.default_capacity, self.config.default_refill_rate));

        let entry = Arc::new(PeerBucket {
            bucket: TokenBucket::new(capacity, rate),
            multiplier: Mutex::new(1.0),
            override_shape,
        });
        self.buckets
            .entry(peer.clone())
            .or_insert_with(|| entry)
            .clone()
    }

    /// Admission decision for a packet/request from `peer`.
    ///
    /// Never blocks longer than a single state update.
    pub fn check_limit(&self, peer: &PeerId, _request_type: RequestType) -> bool {
        if let Some(block) = self.blocked.get(peer) {
            if Instant::now() < block.unblock_at {
                metrics::counter!("rate_limiter.blocked_total").increment(1);
                return false;
            }
            drop(block);
            // Lazily expire: fall through to a fresh check below.
            self.unblock(peer);
        }

        let entry = self.get_or_create_bucket(peer);
        let trusted = self.is_trusted(peer);

        let allowed = if let Some(shape) = entry.override_shape {
            entry.bucket.try_consume_with_rate(1.0, shape.refill_rate)
        } else {
            let multiplier = if self.config.adaptive_enabled {
                *entry.multiplier.lock()
            } else {
                1.0
            };
            entry
                .bucket
                .try_consume_with_rate(1.0, self.config.default_refill_rate * multiplier)
        };

        if allowed {
            metrics::counter!("rate_limiter.allowed_total").increment(1);
            return true;
        }

        metrics::counter!("rate_limiter.throttled_total").increment(1);

        if !trusted && self.config.adaptive_enabled && entry.override_shape.is_none() {
            let mut m = entry.multiplier.lock();
            *m = (*m * MULTIPLIER_DECAY).clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);
        }

        if !trusted {
            let count = self.violations.increment(peer);
            if count >= self.config.violation_threshold {
                self.block(peer.clone());
            }
        }

        false
    }

    fn block(&self, peer: PeerId) {
        warn!(%peer, "circuit breaker: blocking peer");
        let unblock_at = Instant::now() + self.config.block_duration;
        self.blocked.insert(peer, BlockRecord { unblock_at });
        metrics::counter!("rate_limiter.circuit_breaker_trips_total").increment(1);
    }

    /// Clear a peer's block, reset its violation counter and adaptive
    /// multiplier. Called either by the scheduled timer or an admin API.
    pub fn unblock(&self, peer: &PeerId) {
        if self.blocked.remove(peer).is_some() {
            debug!(%peer, "unblocking peer");
        }
        self.violations.reset(peer);
        if let Some(entry) = self.buckets.get(peer) {
            *entry.multiplier.lock() = 1.0;
        }
    }

    pub fn is_blocked(&self, peer: &PeerId) -> bool {
        self.blocked
            .get(peer)
            .map(|b| Instant::now() < b.unblock_at)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(cfg: RateLimiterConfig) -> RateLimiter {
        RateLimiter::new(cfg).unwrap()
    }

    #[test]
    fn allows_within_burst_and_blocks_after_violations() {
        let rl = limiter(RateLimiterConfig {
            default_capacity: 1.0,
            default_refill_rate: 0.0, // effectively no refill within the test
            violation_threshold: 3,
            window: Duration::from_secs(60),
            block_duration: Duration::from_millis(30),
            adaptive_enabled: true,
        });
        let peer = PeerId::from("peer-a");

        assert!(rl.check_limit(&peer, RequestType::IlpPacket)); // consumes the 1 token
        assert!(!rl.check_limit(&peer, RequestType::IlpPacket)); // violation 1
        assert!(!rl.check_limit(&peer, RequestType::IlpPacket)); // violation 2
        assert!(!rl.check_limit(&peer, RequestType::IlpPacket)); // violation 3 -> blocked
        assert!(rl.is_blocked(&peer));
        assert!(!rl.check_limit(&peer, RequestType::IlpPacket)); // still blocked
    }

    #[test]
    fn unblock_resets_violations_and_multiplier() {
        let rl = limiter(RateLimiterConfig {
            default_capacity: 1.0,
            default_refill_rate: 0.0,
            violation_threshold: 1,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(3600),
            adaptive_enabled: true,
        });
        let peer = PeerId::from("peer-a");
        assert!(rl.check_limit(&peer, RequestType::IlpPacket));
        assert!(!rl.check_limit(&peer, RequestType::IlpPacket));
        assert!(rl.is_blocked(&peer));

        rl.unblock(&peer);
        assert!(!rl.is_blocked(&peer));
    }

    #[test]
    fn trusted_peers_bypass_circuit_breaker() {
        let rl = limiter(RateLimiterConfig {
            default_capacity: 1.0,
            default_refill_rate: 0.0,
            violation_threshold: 1,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(3600),
            adaptive_enabled: true,
        });
        let peer = PeerId::from("peer-a");
        rl.mark_trusted(peer.clone());
        assert!(rl.check_limit(&peer, RequestType::IlpPacket));
        assert!(!rl.check_limit(&peer, RequestType::IlpPacket));
        assert!(!rl.is_blocked(&peer));
    }

    #[test]
    fn peer_override_bypasses_adaptive_multiplier() {
        let rl = limiter(RateLimiterConfig {
            default_capacity: 1.0,
            default_refill_rate: 1000.0,
            violation_threshold: 100,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(1),
            adaptive_enabled: true,
        });
        let peer = PeerId::from("peer-a");
        rl.set_override(
            peer.clone(),
            PeerBucketOverride {
                capacity: 5.0,
                refill_rate: 5.0,
            },
        );
        for _ in 0..5 {
            assert!(rl.check_limit(&peer, RequestType::IlpPacket));
        }
    }

    #[test]
    fn config_validation_rejects_zero_capacity() {
        let cfg = RateLimiterConfig {
            default_capacity: 0.0,
            ..RateLimiterConfig::default()
        };
        assert!(RateLimiter::new(cfg).is_err());
    }
}
