//! Property tests for pool exclusivity and arena layout.

use std::collections::HashSet;

use proptest::prelude::*;
use tidepool_core::{Arena, FixedBlockPool, GrowthPolicy, PoolConfig, PoolError, ThreadSafety};

fn thread_safety() -> impl Strategy<Value = ThreadSafety> {
    prop_oneof![
        Just(ThreadSafety::None),
        Just(ThreadSafety::Locked),
        Just(ThreadSafety::LockFree),
    ]
}

proptest! {
    #[test]
    fn live_handles_never_share_a_slot(
        mode in thread_safety(),
        ops in proptest::collection::vec(any::<bool>(), 1..200),
    ) {
        let pool = FixedBlockPool::new(PoolConfig::new(24, 16).with_thread_safety(mode)).unwrap();
        let mut live = Vec::new();

        for acquire in ops {
            if acquire {
                match pool.acquire() {
                    Ok(handle) => live.push(handle),
                    Err(err) => prop_assert!(err.is_backpressure()),
                }
            } else if let Some(handle) = live.pop() {
                prop_assert!(pool.release(handle).is_ok());
            }

            let indices: HashSet<_> = live.iter().map(|h| h.index()).collect();
            prop_assert_eq!(indices.len(), live.len());
            prop_assert_eq!(pool.free_len() + live.len(), 16);
        }
    }

    #[test]
    fn released_handles_are_rejected(count in 1usize..32) {
        let pool = FixedBlockPool::with_policy(8, count, GrowthPolicy::None).unwrap();
        let handles: Vec<_> = (0..count).map(|_| pool.acquire().unwrap()).collect();
        for &handle in &handles {
            pool.release(handle).unwrap();
        }
        for &handle in &handles {
            prop_assert_eq!(
                pool.release(handle),
                Err(PoolError::DoubleFree { index: handle.index() })
            );
        }
        prop_assert_eq!(pool.free_len(), count);
    }

    #[test]
    fn arena_allocations_never_overlap(
        requests in proptest::collection::vec((0usize..200, 0u32..7), 1..40),
    ) {
        let mut arena = Arena::new(2048).unwrap();
        let mut ranges: Vec<(usize, usize)> = Vec::new();

        for (size, align_shift) in requests {
            let align = 1usize << align_shift;
            match arena.allocate(size, align) {
                Ok(ptr) => {
                    prop_assert_eq!(ptr.offset() % align, 0);
                    let (start, end) = (ptr.offset(), ptr.offset() + ptr.len());
                    for &(s, e) in &ranges {
                        prop_assert!(end <= s || start >= e || start == end || s == e);
                    }
                    ranges.push((start, end));
                }
                Err(err) => prop_assert!(err.is_backpressure()),
            }
            prop_assert!(arena.used() <= arena.capacity());
        }
    }
}
