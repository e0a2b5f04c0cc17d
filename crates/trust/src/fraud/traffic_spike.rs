use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use conduit_primitives::PeerId;

use super::{Detection, FraudEvent, FraudRule, Severity};

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_SPIKE_THRESHOLD: f64 = 10.0;
const BUCKET_WIDTH: Duration = Duration::from_secs(1);

struct Bucket {
    start: Instant,
    count: u64,
}

/// Flags a peer whose current traffic bucket is `spike_threshold` times its
/// historical average within `time_window`.
pub struct SuddenTrafficSpikeRule {
    window: Duration,
    spike_threshold: f64,
    buckets: DashMap<PeerId, Mutex<VecDeque<Bucket>>>,
}

impl SuddenTrafficSpikeRule {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_WINDOW, DEFAULT_SPIKE_THRESHOLD)
    }

    pub fn with_params(window: Duration, spike_threshold: f64) -> Self {
        Self {
            window,
            spike_threshold,
            buckets: DashMap::new(),
        }
    }
}

impl Default for SuddenTrafficSpikeRule {
    fn default() -> Self {
        Self::new()
    }
}

impl FraudRule for SuddenTrafficSpikeRule {
    fn name(&self) -> &'static str {
        "SuddenTrafficSpike"
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn check(&self, event: &FraudEvent) -> Option<Detection> {
        let FraudEvent::PacketObserved { peer } = event else {
            return None;
        };

        let now = Instant::now();
        let entry = self
            .buckets
            .entry(peer.clone())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut buckets = entry.lock();

        while let Some(front) = buckets.front() {
            if now.duration_since(front.start) >= self.window {
                buckets.pop_front();
            } else {
                break;
            }
        }

        match buckets.back_mut() {
            Some(b) if now.duration_since(b.start) < BUCKET_WIDTH => {
                b.count += 1;
            }
            _ => buckets.push_back(Bucket { start: now, count: 1 }),
        }

        if buckets.len() < 2 {
            return None;
        }

        let current = buckets.back().map(|b| b.count).unwrap_or(0);
        let history: Vec<u64> = buckets
            .iter()
            .rev()
            .skip(1)
            .map(|b| b.count)
            .collect();
        if history.is_empty() {
            return None;
        }
        let historical_average = history.iter().sum::<u64>() as f64 / history.len() as f64;
        if historical_average <= 0.0 {
            return None;
        }

        if current as f64 / historical_average >= self.spike_threshold {
            return Some(Detection {
                rule: self.name(),
                severity: self.severity(),
                peer: peer.clone(),
                details: Some(format!(
                    "current packet count {current} is {:.1}x the historical average {historical_average:.2}",
                    current as f64 / historical_average
                )),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_two_data_points_before_reporting() {
        let rule = SuddenTrafficSpikeRule::with_params(Duration::from_secs(60), 10.0);
        let peer = PeerId::from("peer-a");
        let event = FraudEvent::PacketObserved { peer: peer.clone() };
        assert!(rule.check(&event).is_none());
    }

    #[test]
    fn flags_spike_relative_to_history() {
        let rule = SuddenTrafficSpikeRule::with_params(Duration::from_secs(60), 3.0);
        let peer = PeerId::from("peer-a");

        for _ in 0..2 {
            rule.check(&FraudEvent::PacketObserved { peer: peer.clone() });
            std::thread::sleep(Duration::from_millis(1100));
        }

        let mut detected = false;
        for _ in 0..10 {
            if rule
                .check(&FraudEvent::PacketObserved { peer: peer.clone() })
                .is_some()
            {
                detected = true;
            }
        }
        assert!(detected);
    }
}
