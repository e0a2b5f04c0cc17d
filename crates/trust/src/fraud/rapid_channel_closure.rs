use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use conduit_primitives::PeerId;

use super::{Detection, FraudEvent, FraudRule, Severity};

const DEFAULT_MAX_CLOSURES: usize = 3;
const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Flags a peer that closes more than `max_closures` channels within
/// `time_window`.
pub struct RapidChannelClosureRule {
    max_closures: usize,
    window: Duration,
    closures: DashMap<PeerId, Mutex<Vec<(String, Instant)>>>,
}

impl RapidChannelClosureRule {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CLOSURES, DEFAULT_WINDOW)
    }

    pub fn with_limits(max_closures: usize, window: Duration) -> Self {
        Self {
            max_closures,
            window,
            closures: DashMap::new(),
        }
    }
}

impl Default for RapidChannelClosureRule {
    fn default() -> Self {
        Self::new()
    }
}

impl FraudRule for RapidChannelClosureRule {
    fn name(&self) -> &'static str {
        "RapidChannelClosure"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn check(&self, event: &FraudEvent) -> Option<Detection> {
        let FraudEvent::ChannelClosed { peer, channel_id } = event else {
            return None;
        };

        let now = Instant::now();
        let entry = self
            .closures
            .entry(peer.clone())
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut closures = entry.lock();
        closures.retain(|(_, ts)| now.duration_since(*ts) < self.window);
        closures.push((channel_id.clone(), now));

        if closures.len() > self.max_closures {
            return Some(Detection {
                rule: self.name(),
                severity: self.severity(),
                peer: peer.clone(),
                details: Some(format!(
                    "{} channel closures within {:?} (limit {})",
                    closures.len(),
                    self.window,
                    self.max_closures
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
    fn flags_after_exceeding_limit() {
        let rule = RapidChannelClosureRule::with_limits(2, Duration::from_secs(60));
        let peer = PeerId::from("peer-a");
        let close = |id: &str| FraudEvent::ChannelClosed {
            peer: peer.clone(),
            channel_id: id.into(),
        };

        assert!(rule.check(&close("c1")).is_none());
        assert!(rule.check(&close("c2")).is_none());
        assert!(rule.check(&close("c3")).is_some());
    }

    #[test]
    fn evicts_entries_outside_window() {
        let rule = RapidChannelClosureRule::with_limits(1, Duration::from_millis(20));
        let peer = PeerId::from("peer-a");
        let close = |id: &str| FraudEvent::ChannelClosed {
            peer: peer.clone(),
            channel_id: id.into(),
        };

        assert!(rule.check(&close("c1")).is_none());
        std::thread::sleep(Duration::from_millis(30));
        assert!(rule.check(&close("c2")).is_none());
    }
}
