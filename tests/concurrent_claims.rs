mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use dupguard::{AtomicCache, DedupeStrategy, DuplicateDetector, Envelope, MemoryCache, QueueRef};

use common::{config, init_logging};

const WORKERS: usize = 32;

fn race(detectors: Vec<Arc<DuplicateDetector>>, message_id: &str) -> Vec<bool> {
    let barrier = Arc::new(Barrier::new(WORKERS));
    let queue = Arc::new(QueueRef::new("orders", Some(30)));

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let detector = detectors[i % detectors.len()].clone();
            let barrier = barrier.clone();
            let msg = Envelope::new(message_id, queue.clone());
            thread::spawn(move || {
                barrier.wait();
                detector.found_duplicate(Some(&msg))
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn exactly_one_worker_wins_the_claim() {
    init_logging();
    let cache: Arc<dyn AtomicCache> = Arc::new(MemoryCache::new());
    let detector = Arc::new(DuplicateDetector::new(
        &config(DedupeStrategy::Strict, 0),
        cache,
    ));

    let results = race(vec![detector], "abc123");
    assert_eq!(results.iter().filter(|dup| !**dup).count(), 1);
    assert_eq!(results.iter().filter(|dup| **dup).count(), WORKERS - 1);
}

#[test]
fn independent_detectors_sharing_a_cache_agree() {
    init_logging();
    // Several detectors stand in for separate worker processes.
    let cache: Arc<dyn AtomicCache> = Arc::new(MemoryCache::new());
    let detectors: Vec<_> = (0..4)
        .map(|_| {
            Arc::new(DuplicateDetector::new(
                &config(DedupeStrategy::Relaxed, 0),
                cache.clone(),
            ))
        })
        .collect();

    let results = race(detectors, "shared-id");
    assert_eq!(results.iter().filter(|dup| !**dup).count(), 1);
}

#[test]
fn concurrent_first_resolution_converges() {
    init_logging();
    let detector = Arc::new(DuplicateDetector::new(
        &config(DedupeStrategy::Relaxed, 0),
        Arc::new(MemoryCache::new()),
    ));
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let detector = detector.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                // Every thread reports a different window for the same queue.
                let queue = QueueRef::new("contended", Some(10 + i as u32));
                barrier.wait();
                detector.queue_timeout(&queue)
            })
        })
        .collect();

    let seen: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let stable = detector.queue_timeout(&QueueRef::new("contended", None));
    assert!(seen.iter().all(|t| *t == stable), "diverging timeouts: {seen:?}");
    assert_eq!(detector.queue_timeout(&QueueRef::new("contended", Some(999))), stable);
    assert_eq!(detector.resolved_queues(), 1);
}
