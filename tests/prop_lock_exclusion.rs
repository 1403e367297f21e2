// Feature: edge-media-cache, Property 4: Single owner per key
//
// Property: However many tasks contend for the same key, and whichever
// hand-off order is configured, at most one of them holds the lock at any
// moment, every one of them eventually gets it, and nothing stays held
// afterwards.

use edge_media_cache::lock::{KeyedLock, WaiterOrder};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 4: mutual exclusion and liveness
    #[test]
    fn prop_single_owner(
        tasks in 1usize..12,
        keys in 1usize..3,
        lifo in any::<bool>(),
    ) {
        let rt = Runtime::new().unwrap();
        let order = if lifo { WaiterOrder::Lifo } else { WaiterOrder::Fifo };

        let result: Result<(), TestCaseError> = rt.block_on(async {
            let lock = KeyedLock::new(order);
            let holders: Arc<Vec<AtomicUsize>> =
                Arc::new((0..keys).map(|_| AtomicUsize::new(0)).collect());
            let violations = Arc::new(AtomicUsize::new(0));
            let completed = Arc::new(AtomicUsize::new(0));

            let mut handles = Vec::new();
            for i in 0..tasks {
                let lock = lock.clone();
                let holders = holders.clone();
                let violations = violations.clone();
                let completed = completed.clone();
                handles.push(tokio::spawn(async move {
                    let slot = i % keys;
                    let _guard = lock.acquire(&format!("key-{}", slot)).await;
                    if holders[slot].fetch_add(1, Ordering::SeqCst) != 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    holders[slot].fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            prop_assert_eq!(violations.load(Ordering::SeqCst), 0);
            prop_assert_eq!(completed.load(Ordering::SeqCst), tasks);
            prop_assert_eq!(lock.held_count(), 0);
            Ok(())
        });
        result?;
    }
}
