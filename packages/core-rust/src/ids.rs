//! Snowflake-style 64-bit id generation.
//!
//! Layout, most significant first: 41 bits of milliseconds since
//! [`EPOCH_MS`], a 12-bit sequence, a 10-bit node id. A burst of more than
//! 4096 ids in one millisecond borrows from the next millisecond. A clock that
//! steps backwards does the same, so ids from one generator always increase.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 2020-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MS: u64 = 1_577_836_800_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const TIME_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;
const SEQUENCE_STEP: u64 = 1 << NODE_BITS;

/// Largest node id that fits the layout.
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;

/// Lock-free id source for one node.
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u64,
    last: AtomicU64,
}

impl IdGenerator {
    /// Node ids above [`MAX_NODE_ID`] are masked into range.
    #[must_use]
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: u64::from(node_id & MAX_NODE_ID),
            last: AtomicU64::new(0),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> u64 {
        self.next_at(unix_millis())
    }

    fn next_at(&self, now_ms: u64) -> u64 {
        let floor = (now_ms.saturating_sub(EPOCH_MS) << TIME_SHIFT) | self.node_id;
        let advance = |prev: u64| {
            if floor > prev {
                floor
            } else {
                prev + SEQUENCE_STEP
            }
        };
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| Some(advance(prev)))
        {
            Ok(prev) | Err(prev) => advance(prev),
        }
    }

    /// Extracts the node id from an id produced by any generator.
    #[must_use]
    pub fn node_of(id: u64) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let node = (id & u64::from(MAX_NODE_ID)) as u16;
        node
    }

    /// Extracts the Unix millisecond timestamp from an id.
    #[must_use]
    pub fn unix_millis_of(id: u64) -> u64 {
        (id >> TIME_SHIFT) + EPOCH_MS
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn ids_carry_node_and_time() {
        let gen = IdGenerator::new(42);
        let now = EPOCH_MS + 1_000;
        let id = gen.next_at(now);
        assert_eq!(IdGenerator::node_of(id), 42);
        assert_eq!(IdGenerator::unix_millis_of(id), now);
    }

    #[test]
    fn same_millisecond_bumps_sequence() {
        let gen = IdGenerator::new(1);
        let now = EPOCH_MS + 5;
        let a = gen.next_at(now);
        let b = gen.next_at(now);
        assert_eq!(b - a, SEQUENCE_STEP);
        assert_eq!(IdGenerator::node_of(b), 1);
    }

    #[test]
    fn sequence_overflow_rolls_into_next_millisecond() {
        let gen = IdGenerator::new(3);
        let now = EPOCH_MS + 10;
        let mut last = 0;
        for _ in 0..=(1 << SEQUENCE_BITS) {
            last = gen.next_at(now);
        }
        assert_eq!(IdGenerator::unix_millis_of(last), now + 1);
        assert_eq!(IdGenerator::node_of(last), 3);
    }

    #[test]
    fn node_id_is_masked() {
        let gen = IdGenerator::new(u16::MAX);
        let id = gen.next_id();
        assert_eq!(IdGenerator::node_of(id), MAX_NODE_ID);
    }

    proptest! {
        #[test]
        fn ids_strictly_increase_even_when_clock_jumps(
            offsets in proptest::collection::vec(0u64..10_000, 1..200),
            node in 0u16..=MAX_NODE_ID,
        ) {
            let gen = IdGenerator::new(node);
            let mut prev = 0u64;
            for offset in offsets {
                let id = gen.next_at(EPOCH_MS + offset);
                prop_assert!(id > prev);
                prop_assert_eq!(IdGenerator::node_of(id), node);
                prev = id;
            }
        }
    }
}
