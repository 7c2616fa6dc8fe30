use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use reliq_core::{QueueCounts, QueueManager};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Job {
    producer: usize,
    seq: usize,
}

const PRODUCERS: usize = 10;
const PER_PRODUCER: usize = 40;
const CONSUMERS: usize = 4;

#[test]
fn every_item_succeeds_exactly_once_under_failures() {
    let dir = tempfile::tempdir().unwrap();
    let queue: Arc<QueueManager<Job>> = Arc::new(
        QueueManager::builder()
            .queue_dir(dir.path())
            .inmemory_object_limit(16)
            .reload_interval(Duration::from_millis(50))
            .open()
            .unwrap(),
    );

    let successes: Arc<Mutex<HashMap<Job, usize>>> = Arc::default();
    let attempts = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let successes = Arc::clone(&successes);
            let attempts = Arc::clone(&attempts);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                while !done.load(Ordering::Acquire) {
                    let roll: u32 = rng.gen_range(0..10);
                    queue.pop_timeout(Duration::from_millis(20), |job: &Job| {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        match roll {
                            // 約 3 割を失敗させる（false / Err / panic）
                            0 => Ok(false),
                            1 => Err(format!("induced error for {job:?}")),
                            2 => panic!("induced panic for {job:?}"),
                            _ => {
                                *successes.lock().unwrap().entry(*job).or_insert(0) += 1;
                                Ok(true)
                            }
                        }
                    });
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    queue.push(Job { producer, seq }).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let total = PRODUCERS * PER_PRODUCER;
    let deadline = Instant::now() + Duration::from_secs(60);
    while successes.lock().unwrap().len() < total && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    done.store(true, Ordering::Release);
    for consumer in consumers {
        consumer.join().unwrap();
    }

    let successes = successes.lock().unwrap();
    assert_eq!(successes.len(), total, "items lost");
    let duplicated: Vec<_> = successes.iter().filter(|(_, n)| **n > 1).collect();
    assert!(duplicated.is_empty(), "delivered twice: {duplicated:?}");
    assert!(attempts.load(Ordering::Relaxed) >= total);

    assert_eq!(queue.counts().unwrap(), QueueCounts::default());
    queue.stop();
}

#[test]
fn concurrent_pushes_never_overfill_the_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let queue: Arc<QueueManager<Job>> = Arc::new(
        QueueManager::builder()
            .queue_dir(dir.path())
            .inmemory_object_limit(25)
            .reload_interval(Duration::from_millis(10))
            .open()
            .unwrap(),
    );

    thread::scope(|s| {
        for producer in 0..PRODUCERS {
            let queue = &queue;
            s.spawn(move || {
                for seq in 0..PER_PRODUCER {
                    queue.push(Job { producer, seq }).unwrap();
                    assert!(queue.buffered() <= 25);
                }
            });
        }
        // 手動 reload も同時に走らせる
        s.spawn(|| {
            for _ in 0..50 {
                queue.reload();
                assert!(queue.buffered() <= 25);
            }
        });
    });

    let counts = queue.counts().unwrap();
    assert_eq!(counts.buffered, 25);
    assert_eq!(counts.active, 25);
    assert_eq!(counts.waiting, PRODUCERS * PER_PRODUCER - 25);
    queue.stop();
}

#[derive(Debug, Serialize, Deserialize)]
struct Blob {
    id: usize,
    body: String,
}

const BLOB_LEN: usize = 512 * 1024;

#[test]
fn reload_never_sees_a_partially_written_item() {
    let dir = tempfile::tempdir().unwrap();
    let queue: Arc<QueueManager<Blob>> = Arc::new(
        QueueManager::builder()
            .queue_dir(dir.path())
            .inmemory_object_limit(1)
            .reload_interval(Duration::from_secs(3600))
            .open()
            .unwrap(),
    );
    let total = 100;
    let done = AtomicBool::new(false);
    let corrupt = AtomicUsize::new(0);
    let delivered: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
    let deadline = Instant::now() + Duration::from_secs(60);

    thread::scope(|s| {
        // 書き込み中の waiting を読み続ける
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                corrupt.fetch_add(queue.reload().corrupt, Ordering::Relaxed);
            }
        });
        s.spawn(|| {
            while delivered.lock().unwrap().len() < total && Instant::now() < deadline {
                queue.pop_timeout(Duration::from_millis(20), |blob: &Blob| {
                    delivered.lock().unwrap().push((blob.id, blob.body.len()));
                    true
                });
            }
            done.store(true, Ordering::Release);
        });

        for id in 0..total {
            let body = "x".repeat(BLOB_LEN);
            queue.push(Blob { id, body }).unwrap();
        }
    });

    assert_eq!(corrupt.load(Ordering::Relaxed), 0);
    let mut delivered = delivered.into_inner().unwrap();
    delivered.sort();
    assert_eq!(
        delivered,
        (0..total).map(|id| (id, BLOB_LEN)).collect::<Vec<_>>()
    );
    assert_eq!(queue.counts().unwrap(), QueueCounts::default());
    queue.stop();
}
