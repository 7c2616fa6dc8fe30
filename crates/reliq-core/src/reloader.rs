//! Reloader - waiting / retry から buffer への補充
//!
//! # トリガー
//! - 起動時: active の整合（`reconcile_active`）
//! - 定期: バックグラウンドスレッドが `reload_interval` ごとに `run_cycle`
//! - 手動: `QueueManager::reload` が同じ `run_cycle` を同期実行
//!
//! 定期と手動の cycle が同時に走っても安全: 同じファイルを両方が読んでも、
//! rename に成功するのは片方だけで、もう片方は NotFound（競合）として skip する。
//!
//! # エラー処理
//! - NotFound: 競合。debug ログのみ
//! - CorruptItem: error ログ、ファイルはそのまま残す（隔離はしない）
//! - I/O (権限など): warn ログ、ファイルは元のパーティションに残り次の cycle で再試行
//!
//! どのファイルで失敗しても scan は止めない。

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferEntry, MemoryBuffer};
use crate::domain::{ItemKey, Partition};
use crate::error::{ErrorKind, StoreError};
use crate::ports::Codec;
use crate::store::DurableStore;

const THREAD_NAME: &str = "reliq-reloader";

/// What one reconciliation or reload cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadReport {
    /// Items loaded into the buffer.
    pub promoted: usize,
    /// Items moved from active to waiting at startup (over capacity).
    pub demoted: usize,
    /// Files skipped because they could not be decoded.
    pub corrupt: usize,
    /// Files left in place after an I/O failure.
    pub failed: usize,
    /// Files that disappeared while being processed.
    pub raced: usize,
}

impl ReloadReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn record(&mut self, partition: Partition, key: &ItemKey, err: StoreError) {
        match err.kind() {
            ErrorKind::Race => {
                debug!(%key, %partition, "item vanished during reload");
                self.raced += 1;
            }
            ErrorKind::Corrupt => {
                error!(%key, %partition, error = %err, "skipping corrupt item");
                self.corrupt += 1;
            }
            ErrorKind::Io | ErrorKind::Collision => {
                warn!(%key, %partition, error = %err, "reload failed, will retry next cycle");
                self.failed += 1;
            }
        }
    }
}

pub struct Reloader<T, C> {
    store: Arc<DurableStore<C>>,
    buffer: Arc<MemoryBuffer<T>>,
    capacity: usize,
}

impl<T, C> Clone for Reloader<T, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            buffer: Arc::clone(&self.buffer),
            capacity: self.capacity,
        }
    }
}

impl<T, C> Reloader<T, C>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
{
    pub fn new(store: Arc<DurableStore<C>>, buffer: Arc<MemoryBuffer<T>>, capacity: usize) -> Self {
        Self {
            store,
            buffer,
            capacity,
        }
    }

    fn has_room(&self) -> bool {
        self.buffer.occupied() < self.capacity
    }

    /// Startup pass over the active partition.
    ///
    /// Files left in `active` by a previous run have no buffer entry. Load
    /// them while there is room; move the rest to `waiting` so a large
    /// backlog does not all land in memory.
    pub fn reconcile_active(&self) -> ReloadReport {
        let mut report = ReloadReport::default();
        let Some(keys) = self.list(Partition::Active) else {
            return report;
        };

        for key in keys {
            if let Some(slot) = self.buffer.reserve(self.capacity) {
                match self.store.read::<T>(Partition::Active, &key) {
                    Ok(item) => {
                        slot.fill(BufferEntry { key, item });
                        report.promoted += 1;
                    }
                    Err(e) => report.record(Partition::Active, &key, e),
                }
            } else {
                match self.store.move_item(&key, Partition::Active, Partition::Waiting) {
                    Ok(()) => report.demoted += 1,
                    Err(e) => report.record(Partition::Active, &key, e),
                }
            }
        }

        info!(
            loaded = report.promoted,
            spilled = report.demoted,
            corrupt = report.corrupt,
            "active partition reconciled"
        );
        report
    }

    /// One reload cycle: `waiting` first, then `retry`, while the buffer has room.
    pub fn run_cycle(&self) -> ReloadReport {
        let mut report = ReloadReport::default();
        for partition in [Partition::Waiting, Partition::Retry] {
            if !self.has_room() {
                break;
            }
            self.promote_from(partition, &mut report);
        }
        report
    }

    fn promote_from(&self, partition: Partition, report: &mut ReloadReport) {
        let Some(keys) = self.list(partition) else {
            return;
        };

        for key in keys {
            let Some(slot) = self.buffer.reserve(self.capacity) else {
                break;
            };
            // decode してから move する。壊れたファイルは active に入れない
            let item = match self.store.read::<T>(partition, &key) {
                Ok(item) => item,
                Err(e) => {
                    report.record(partition, &key, e);
                    continue;
                }
            };
            match self.store.move_item(&key, partition, Partition::Active) {
                Ok(()) => {
                    slot.fill(BufferEntry { key, item });
                    report.promoted += 1;
                }
                Err(e) => report.record(partition, &key, e),
            }
        }
    }

    fn list(&self, partition: Partition) -> Option<Vec<ItemKey>> {
        match self.store.list(partition) {
            Ok(keys) => Some(keys),
            Err(e) => {
                warn!(%partition, error = %e, "cannot list partition");
                None
            }
        }
    }

    /// Start the periodic loop on a dedicated thread.
    pub fn spawn(self, interval: Duration) -> std::io::Result<ReloaderHandle> {
        let signal = Arc::new(StopSignal::new());
        let thread = thread::Builder::new().name(THREAD_NAME.to_string()).spawn({
            let signal = Arc::clone(&signal);
            move || self.run_loop(interval, &signal)
        })?;

        Ok(ReloaderHandle {
            signal,
            thread: Some(thread),
        })
    }

    fn run_loop(&self, interval: Duration, signal: &StopSignal) {
        info!(interval_ms = interval.as_millis() as u64, "reloader started");
        loop {
            if signal.wait_timeout(interval) {
                break;
            }
            // 1 件の異常でループを終わらせない
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())) {
                Ok(report) if !report.is_empty() => debug!(?report, "reload cycle finished"),
                Ok(_) => {}
                Err(_) => error!("reload cycle panicked"),
            }
        }
        info!("reloader stopped");
    }
}

/// Stop flag with an interruptible wait.
///
/// `trigger` wakes a thread sleeping in `wait_timeout` immediately.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.changed.notify_all();
    }

    /// Sleep up to `timeout`. Returns `true` as soon as the signal is
    /// triggered, `false` if the full timeout elapsed.
    ///
    /// A timeout too large to represent as a deadline waits for the signal only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*stopped {
                stopped = self
                    .changed
                    .wait(stopped)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            return true;
        };
        while !*stopped {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            if remaining.is_zero() {
                return false;
            }
            stopped = self
                .changed
                .wait_timeout(stopped, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Owner of the background reloader thread.
pub struct ReloaderHandle {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl ReloaderHandle {
    /// Signal the loop and wait until it has exited.
    ///
    /// A cycle that is already running completes first; no partition is
    /// touched by the loop after this returns.
    pub fn stop(&mut self) {
        self.signal.trigger();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("reloader thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ReloaderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
