use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use reliq_core::{Admission, Partition, QueueCounts, QueueManager};

fn open(root: &Path, limit: usize) -> QueueManager<u32> {
    QueueManager::builder()
        .queue_dir(root)
        .inmemory_object_limit(limit)
        .reload_interval(Duration::from_secs(3600))
        .open()
        .unwrap()
}

/// Pop with `reload()` in between whenever the buffer runs dry.
fn drain_in_order(queue: &QueueManager<u32>, n: usize) -> Vec<u32> {
    let mut seen = Vec::with_capacity(n);
    while seen.len() < n {
        let consumed = queue.pop_timeout(Duration::from_millis(10), |item| {
            seen.push(*item);
            true
        });
        if !consumed {
            let report = queue.reload();
            assert!(report.promoted > 0, "queue ran dry after {} items", seen.len());
        }
    }
    seen
}

#[test]
fn items_survive_restart_in_every_partition() {
    let dir = tempfile::tempdir().unwrap();

    {
        let queue = open(dir.path(), 10);
        for i in 0..30 {
            queue.push(i).unwrap();
        }
        // 5 件は retry へ
        for _ in 0..5 {
            queue.pop(|_| false);
        }
        let counts = queue.counts().unwrap();
        assert_eq!((counts.active, counts.waiting, counts.retry), (5, 20, 5));
        queue.stop();
    }

    let queue = open(dir.path(), 10);
    assert_eq!(queue.buffered(), 5);

    let seen = drain_in_order(&queue, 30);
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), 30, "duplicate delivery: {seen:?}");
    assert_eq!(unique, (0..30).collect());
    assert_eq!(queue.counts().unwrap(), QueueCounts::default());
}

#[test]
fn restart_preserves_push_order() {
    let dir = tempfile::tempdir().unwrap();

    {
        let queue = open(dir.path(), 10);
        for i in 0..50 {
            queue.push(i).unwrap();
        }
        // stop() を呼ばずに drop しても reloader は止まる
    }

    let queue = open(dir.path(), 10);
    assert_eq!(drain_in_order(&queue, 50), (0..50).collect::<Vec<_>>());
    assert_eq!(queue.counts().unwrap().total_files(), 0);
}

#[test]
fn restart_with_smaller_limit_moves_excess_to_waiting() {
    let dir = tempfile::tempdir().unwrap();

    {
        let queue = open(dir.path(), 20);
        for i in 0..20 {
            assert_eq!(queue.push(i).unwrap(), Admission::Buffered);
        }
    }

    let queue = open(dir.path(), 5);
    let counts = queue.counts().unwrap();
    assert_eq!(counts.buffered, 5);
    assert_eq!(counts.active, 5);
    assert_eq!(counts.waiting, 15);
    assert_eq!(drain_in_order(&queue, 20), (0..20).collect::<Vec<_>>());
}

#[test]
fn manual_reload_promotes_up_to_remaining_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let queue = open(dir.path(), 4);

    for i in 0..10 {
        queue.push(i).unwrap();
    }
    // 3 件失敗させて retry に置く
    for _ in 0..3 {
        queue.pop(|_| false);
    }
    assert_eq!(queue.buffered(), 1);
    assert_eq!(queue.counts().unwrap().get(Partition::Retry), 3);

    // 空き 3、waiting に 6 件 -> waiting から 3 件
    let report = queue.reload();
    assert_eq!(report.promoted, 3);
    let counts = queue.counts().unwrap();
    assert_eq!((counts.buffered, counts.waiting, counts.retry), (4, 3, 3));

    // 満杯なら何もしない
    assert!(queue.reload().is_empty());

    let mut seen = Vec::new();
    for _ in 0..4 {
        queue.pop(|item| {
            seen.push(*item);
            true
        });
    }
    assert_eq!(seen, vec![3, 4, 5, 6]);

    // waiting の残り 3 件が先、次に retry から 1 件
    let report = queue.reload();
    assert_eq!(report.promoted, 4);
    let counts = queue.counts().unwrap();
    assert_eq!((counts.waiting, counts.retry), (0, 2));

    let mut seen = Vec::new();
    for _ in 0..4 {
        queue.pop(|item| {
            seen.push(*item);
            true
        });
    }
    assert_eq!(seen, vec![7, 8, 9, 0]);
}

#[test]
fn capacity_bound_holds_for_sequential_pushes() {
    let dir = tempfile::tempdir().unwrap();
    let queue = open(dir.path(), 7);

    let admissions: Vec<_> = (0..20).map(|i| queue.push(i).unwrap()).collect();
    let buffered = admissions
        .iter()
        .filter(|a| **a == Admission::Buffered)
        .count();

    assert_eq!(buffered, 7);
    assert!(admissions[..7].iter().all(|a| *a == Admission::Buffered));
    assert!(admissions[7..].iter().all(|a| *a == Admission::Spilled));

    let counts = queue.counts().unwrap();
    assert_eq!(counts.buffered, 7);
    assert_eq!(counts.active, 7);
    assert_eq!(counts.waiting, 13);
}

#[test]
fn stop_halts_file_movement() {
    let dir = tempfile::tempdir().unwrap();
    let queue: QueueManager<u32> = QueueManager::builder()
        .queue_dir(dir.path())
        .inmemory_object_limit(2)
        .reload_interval(Duration::from_millis(20))
        .open()
        .unwrap();

    for i in 0..10 {
        queue.push(i).unwrap();
    }
    queue.stop();
    assert!(!queue.is_running());

    // buffer を空けても、停止後は waiting から何も上がってこない
    for _ in 0..2 {
        queue.pop(|_| true);
    }
    std::thread::sleep(Duration::from_millis(200));

    let counts = queue.counts().unwrap();
    assert_eq!(counts.buffered, 0);
    assert_eq!(counts.active, 0);
    assert_eq!(counts.waiting, 8);
}
