// Snowflake-style local id generator
//
// 41 bits of milliseconds since EPOCH_MS | 10 bits node id | 12 bits sequence.
// Ids are positive i64, unique per node and increasing over time.

use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{AppError, AppResult};

/// 2024-01-01T00:00:00Z
const EPOCH_MS: i64 = 1_704_067_200_000;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct State {
    last_ms: i64,
    sequence: i64,
}

pub struct IdGenerator {
    node_id: i64,
    state: Mutex<State>,
}

impl IdGenerator {
    pub fn new(node_id: u16) -> AppResult<Self> {
        if node_id > MAX_NODE {
            return Err(AppError::Config(format!(
                "snowflake node id {} exceeds {}",
                node_id, MAX_NODE
            )));
        }

        Ok(Self {
            node_id: node_id as i64,
            state: Mutex::new(State::default()),
        })
    }

    pub fn next_id(&self) -> AppResult<i64> {
        self.next_id_at(|| Utc::now().timestamp_millis())
    }

    fn next_id_at(&self, now_ms: impl Fn() -> i64) -> AppResult<i64> {
        let mut state = self.state.lock();
        let mut now = now_ms();

        if now < state.last_ms {
            // clock moved backwards; keep issuing from the last seen millisecond
            now = state.last_ms;
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // sequence exhausted for this millisecond, borrow the next one
                now = state.last_ms + 1;
            }
        } else {
            state.sequence = 0;
        }

        state.last_ms = now;

        let elapsed = now - EPOCH_MS;
        if elapsed < 0 {
            return Err(AppError::Internal("system clock is before the id epoch".to_string()));
        }

        Ok((elapsed << (NODE_BITS + SEQUENCE_BITS))
            | (self.node_id << SEQUENCE_BITS)
            | state.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let gen = IdGenerator::new(7).unwrap();
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = gen.next_id().unwrap();
            assert!(id > last);
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn test_node_id_is_encoded() {
        let gen = IdGenerator::new(5).unwrap();
        let id = gen.next_id_at(|| EPOCH_MS + 1000).unwrap();
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE as i64, 5);
        assert_eq!(id >> (NODE_BITS + SEQUENCE_BITS), 1000);
    }

    #[test]
    fn test_clock_rollback_does_not_repeat_ids() {
        let gen = IdGenerator::new(1).unwrap();
        let first = gen.next_id_at(|| EPOCH_MS + 5000).unwrap();
        let second = gen.next_id_at(|| EPOCH_MS + 4000).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_rejects_large_node_id() {
        assert!(IdGenerator::new(1024).is_err());
    }
}
