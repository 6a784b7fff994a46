//! Stream identifier allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::FIRST_STREAM_ID;

/// Identifier of one stream within a session.
///
/// Client-initiated and peer-accepted streams share one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u64);

impl StreamId {
    /// Raw sequence number.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction of a client-initiated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client writes, peer reads.
    Uni,
    /// Both sides read and write.
    Bi,
}

/// Issues strictly increasing stream identifiers for one session.
#[derive(Debug)]
pub struct StreamRegistry {
    next: AtomicU64,
}

impl StreamRegistry {
    /// A registry whose first identifier is [`FIRST_STREAM_ID`].
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(FIRST_STREAM_ID),
        }
    }

    /// Allocate the next identifier. Safe under concurrent callers.
    pub fn next_stream_id(&self) -> StreamId {
        StreamId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_start_at_one() {
        let registry = StreamRegistry::new();
        assert_eq!(registry.next_stream_id().get(), 1);
        assert_eq!(registry.next_stream_id().get(), 2);
        assert_eq!(registry.next_stream_id().to_string(), "#3");
    }

    #[test]
    fn test_concurrent_ids_are_distinct() {
        let registry = Arc::new(StreamRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut ids = Vec::new();
                    for _ in 0..500 {
                        ids.push(registry.next_stream_id());
                    }
                    ids
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for thread in threads {
            let ids = thread.join().unwrap();
            // Each thread observes its own ids in increasing order.
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            seen.extend(ids);
        }
        assert_eq!(seen.len(), 8 * 500);
        assert_eq!(seen.iter().max().map(StreamId::get), Some(4000));
    }
}
