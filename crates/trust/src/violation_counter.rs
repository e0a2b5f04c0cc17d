use std::time::{Duration, Instant};

use dashmap::DashMap;

use conduit_primitives::PeerId;

struct Window {
    count: u32,
    window_start: Instant,
}

/// Sliding window count of policy violations per peer.
pub struct ViolationCounter {
    window: Duration,
    windows: DashMap<PeerId, Window>,
}

impl ViolationCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: DashMap::new(),
        }
    }

    /// If there is no record, or the current window has expired, start a
    /// fresh window of count 1; otherwise increment the count.
    pub fn increment(&self, peer: &PeerId) -> u32 {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(peer.clone())
            .or_insert_with(|| Window {
                count: 0,
                window_start: now,
            });

        if entry.count == 0 || now.duration_since(entry.window_start) >= self.window {
            entry.count = 1;
            entry.window_start = now;
        } else {
            entry.count += 1;
        }
        entry.count
    }

    /// Lazily expires the window to 0 if it has aged out, then returns the
    /// current count.
    pub fn get_count(&self, peer: &PeerId) -> u32 {
        let now = Instant::now();
        match self.windows.get(peer) {
            Some(entry) if now.duration_since(entry.window_start) < self.window => entry.count,
            _ => 0,
        }
    }

    /// Reset a peer's violation window (called on unblock).
    pub fn reset(&self, peer: &PeerId) {
        self.windows.remove(peer);
    }

    /// Remove all expired windows.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.window_start) < self.window);
    }

    /// Peers with a non-expired window.
    pub fn active_peers(&self) -> Vec<PeerId> {
        let now = Instant::now();
        self.windows
            .iter()
            .filter(|e| now.duration_since(e.window_start) < self.window)
            .map(|e| e.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_increment_in_new_window_resets_to_one() {
        let vc = ViolationCounter::new(Duration::from_millis(20));
        let peer = PeerId::from("a");
        assert_eq!(vc.increment(&peer), 1);
        assert_eq!(vc.increment(&peer), 2);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(vc.increment(&peer), 1);
    }

    #[test]
    fn get_count_expires_lazily() {
        let vc = ViolationCounter::new(Duration::from_millis(10));
        let peer = PeerId::from("a");
        vc.increment(&peer);
        assert_eq!(vc.get_count(&peer), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(vc.get_count(&peer), 0);
    }

    #[test]
    fn cleanup_removes_expired() {
        let vc = ViolationCounter::new(Duration::from_millis(10));
        let peer = PeerId::from("a");
        vc.increment(&peer);
        std::thread::sleep(Duration::from_millis(20));
        vc.cleanup();
        assert!(vc.active_peers().is_empty());
    }
}
