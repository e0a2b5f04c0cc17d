use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Fixed-capacity counter refilling at a steady rate, consumed per request.
///
/// Internally serialized with a single `Mutex`: must be safe against
/// concurrent callers, and a token-bucket update is cheap enough that
/// holding the lock across it never blocks the pipeline for longer than a
/// single state update.
pub struct TokenBucket {
    inner: Mutex<State>,
}

struct State {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate_per_sec: f64) -> Self {
        Self {
            inner: Mutex::new(State {
                capacity,
                refill_rate: refill_rate_per_sec,
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Refresh tokens by `min(capacity, tokens + rate * dt)`, then consume
    /// `n` if enough are available.
    pub fn try_consume(&self, n: f64) -> bool {
        let mut state = self.inner.lock();
        let now = Instant::now();
        let dt = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + state.refill_rate * dt).min(state.capacity);
        state.last_refill = now;

        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Like [`try_consume`], but first re-pins the refill rate. Used by the
    /// rate limiter to apply a peer's adaptive multiplier without allocating
    /// a fresh bucket on every request.
    pub fn try_consume_with_rate(&self, n: f64, refill_rate_per_sec: f64) -> bool {
        let mut state = self.inner.lock();
        let now = Instant::now();
        let dt = now.duration_since(state.last_refill).as_secs_f64();
        state.refill_rate = refill_rate_per_sec;
        state.tokens = (state.tokens + state.refill_rate * dt).min(state.capacity);
        state.last_refill = now;

        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Current token count, after a refresh. For diagnostics/tests only.
    pub fn available(&self) -> f64 {
        let mut state = self.inner.lock();
        let now = Instant::now();
        let dt = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + state.refill_rate * dt).min(state.capacity);
        state.last_refill = now;
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_up_to_capacity() {
        let bucket = TokenBucket::new(2.0, 0.0);
        assert!(bucket.try_consume(1.0));
        assert!(bucket.try_consume(1.0));
        assert!(!bucket.try_consume(1.0));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(1.0, 1000.0);
        assert!(bucket.try_consume(1.0));
        assert!(!bucket.try_consume(1.0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.try_consume(1.0));
    }

    #[test]
    fn never_exceeds_capacity() {
        let bucket = TokenBucket::new(1.0, 1000.0);
        std::thread::sleep(Duration::from_millis(50));
        assert!((bucket.available() - 1.0).abs() < f64::EPSILON);
    }
}
