use arc_swap::ArcSwap;

use conduit_primitives::PeerId;

/// One routing entry: an ILP address prefix, the peer to forward matching
/// packets to, and a priority used to break ties among overlapping
/// prefixes.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub prefix: String,
    pub next_hop: PeerId,
    pub priority: i32,
}

/// Longest-prefix-match routing table.
///
/// Updates are infrequent; lookups are on the hot path and must be
/// sub-microsecond amortized, so the table is an `ArcSwap<Vec<RouteEntry>>`:
/// readers take an uncontended atomic load with no lock, writers publish a
/// whole new sorted snapshot. Entries are kept sorted by descending prefix
/// length so a linear scan finds the longest match first, falling back to
/// insertion order (stable sort) to break ties on equal-length prefixes
/// sharing a priority.
pub struct RoutingTable {
    entries: ArcSwap<Vec<RouteEntry>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Insert or replace the route for `prefix`.
    pub fn insert(&self, prefix: impl Into<String>, next_hop: PeerId, priority: i32) {
        let prefix = prefix.into();
        let mut next: Vec<RouteEntry> = (**self.entries.load()).clone();
        next.retain(|e| e.prefix != prefix);
        next.push(RouteEntry {
            prefix,
            next_hop,
            priority,
        });
        // Longest prefix first; ties broken by priority (higher first),
        // then by insertion order (stable sort preserves relative order of
        // equal keys from the retained prefix of the vector).
        next.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then(b.priority.cmp(&a.priority))
        });
        self.entries.store(std::sync::Arc::new(next));
    }

    pub fn remove(&self, prefix: &str) {
        let mut next: Vec<RouteEntry> = (**self.entries.load()).clone();
        next.retain(|e| e.prefix != prefix);
        self.entries.store(std::sync::Arc::new(next));
    }

    /// The highest-priority entry whose prefix is a prefix of `destination`,
    /// longest prefix wins.
    pub fn longest_prefix_match(&self, destination: &str) -> Option<PeerId> {
        let entries = self.entries.load();
        entries
            .iter()
            .find(|e| destination.starts_with(e.prefix.as_str()))
            .map(|e| e.next_hop.clone())
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let table = RoutingTable::new();
        table.insert("g.", PeerId::from("peer-default"), 0);
        table.insert("g.b.", PeerId::from("peer-b"), 0);

        assert_eq!(
            table.longest_prefix_match("g.b.alice"),
            Some(PeerId::from("peer-b"))
        );
        assert_eq!(
            table.longest_prefix_match("g.c.alice"),
            Some(PeerId::from("peer-default"))
        );
    }

    #[test]
    fn no_match_is_none() {
        let table = RoutingTable::new();
        table.insert("g.b.", PeerId::from("peer-b"), 0);
        assert_eq!(table.longest_prefix_match("h.x.alice"), None);
    }

    #[test]
    fn equal_length_ties_broken_by_priority() {
        let table = RoutingTable::new();
        table.insert("g.b.", PeerId::from("peer-low"), 0);
        table.insert("g.c.", PeerId::from("peer-high"), 5);

        // Distinct prefixes of the same length: each only matches its own
        // destination, priority only matters when prefixes are literally
        // equal (last insert wins via `insert`'s replace-by-prefix).
        table.insert("g.b.", PeerId::from("peer-override"), 9);
        assert_eq!(
            table.longest_prefix_match("g.b.alice"),
            Some(PeerId::from("peer-override"))
        );
    }

    #[test]
    fn update_replaces_existing_prefix() {
        let table = RoutingTable::new();
        table.insert("g.b.", PeerId::from("peer-b1"), 0);
        table.insert("g.b.", PeerId::from("peer-b2"), 0);
        assert_eq!(
            table.longest_prefix_match("g.b.alice"),
            Some(PeerId::from("peer-b2"))
        );
    }
}
