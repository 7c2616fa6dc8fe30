//! QueueManager - store / buffer / reloader をまとめたファサード
//!
//! ```ignore
//! let queue: QueueManager<Order> = QueueManager::builder()
//!     .queue_dir("/var/spool/orders")
//!     .inmemory_object_limit(500)
//!     .open()?;
//!
//! queue.push(order)?;
//! queue.pop(|order| ship(order));   // Ok / true -> 削除, Err / false / panic -> retry
//! queue.stop();
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferEntry, MemoryBuffer};
use crate::config::QueueConfig;
use crate::domain::{Admission, ItemKey, Outcome, Partition};
use crate::error::{ErrorKind, QueueError, StoreError};
use crate::observability::QueueCounts;
use crate::ports::{Codec, JsonCodec, KeyGenerator, SystemClock, UlidKeyGenerator};
use crate::reloader::{ReloadReport, Reloader, ReloaderHandle};
use crate::store::DurableStore;

/// Builds a [`QueueManager`].
///
/// Configuration is validated in [`open`](Self::open); nothing touches the
/// filesystem before that.
pub struct QueueBuilder<C = JsonCodec> {
    config: QueueConfig,
    codec: C,
    keys: Option<Box<dyn KeyGenerator>>,
}

impl QueueBuilder<JsonCodec> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            codec: JsonCodec,
            keys: None,
        }
    }
}

impl Default for QueueBuilder<JsonCodec> {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl<C: Codec> QueueBuilder<C> {
    pub fn queue_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.queue_dir = dir.into();
        self
    }

    pub fn inmemory_object_limit(mut self, limit: usize) -> Self {
        self.config.inmemory_object_limit = limit;
        self
    }

    pub fn reload_interval(mut self, interval: Duration) -> Self {
        self.config.reload_interval = interval;
        self
    }

    pub fn key_generator(mut self, keys: impl KeyGenerator + 'static) -> Self {
        self.keys = Some(Box::new(keys));
        self
    }

    pub fn codec<C2: Codec>(self, codec: C2) -> QueueBuilder<C2> {
        QueueBuilder {
            config: self.config,
            codec,
            keys: self.keys,
        }
    }

    /// Create the partitions, reconcile what a previous run left in
    /// `active`, and start the background reloader.
    pub fn open<T>(self) -> Result<QueueManager<T, C>, QueueError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let config = self.config;
        config.validate()?;

        let store = Arc::new(DurableStore::open(&config.queue_dir, self.codec)?);
        let buffer = Arc::new(MemoryBuffer::new());
        let reloader = Reloader::new(
            Arc::clone(&store),
            Arc::clone(&buffer),
            config.inmemory_object_limit,
        );

        reloader.reconcile_active();
        let background = reloader
            .clone()
            .spawn(config.reload_interval)
            .map_err(QueueError::Spawn)?;

        info!(
            queue_dir = %config.queue_dir.display(),
            limit = config.inmemory_object_limit,
            reload_interval_ms = config.reload_interval.as_millis() as u64,
            buffered = buffer.len(),
            "queue opened"
        );

        Ok(QueueManager {
            keys: self.keys.unwrap_or_else(|| {
                Box::new(UlidKeyGenerator::new(SystemClock)) as Box<dyn KeyGenerator>
            }),
            config,
            store,
            buffer,
            reloader,
            background: Mutex::new(Some(background)),
        })
    }
}

/// Durable queue over a directory.
///
/// `push` and `pop` may be called from any number of threads. One
/// background thread keeps the in-memory buffer topped up from `waiting`
/// and `retry` until [`stop`](Self::stop) is called or the manager is dropped.
pub struct QueueManager<T, C: Codec = JsonCodec> {
    config: QueueConfig,
    store: Arc<DurableStore<C>>,
    buffer: Arc<MemoryBuffer<T>>,
    reloader: Reloader<T, C>,
    background: Mutex<Option<ReloaderHandle>>,
    keys: Box<dyn KeyGenerator>,
}

impl QueueManager<(), JsonCodec> {
    pub fn builder() -> QueueBuilder<JsonCodec> {
        QueueBuilder::default()
    }
}

impl<T> QueueManager<T, JsonCodec>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Open with the default codec and key generator.
    pub fn open(config: QueueConfig) -> Result<Self, QueueError> {
        QueueBuilder::new(config).open()
    }
}

impl<T, C> QueueManager<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    /// Persist `item`, then make it consumable if the buffer has room.
    ///
    /// Over capacity the item only goes to `waiting`; the reloader picks it
    /// up once consumers catch up.
    pub fn push(&self, item: T) -> Result<Admission, QueueError> {
        let key = self.keys.generate();
        if let Some(slot) = self.buffer.reserve(self.capacity()) {
            // 書き込みに失敗したら slot は drop で返る
            self.store.write(Partition::Active, &key, &item)?;
            slot.fill(BufferEntry { key, item });
            Ok(Admission::Buffered)
        } else {
            self.store.write(Partition::Waiting, &key, &item)?;
            debug!(%key, "buffer full, item spilled to waiting");
            Ok(Admission::Spilled)
        }
    }

    /// Block until an item is available and hand it to `consumer`.
    ///
    /// Success deletes the item. Failure, an `Err`, or a panic moves it to
    /// `retry`. Nothing the consumer does is propagated to the caller.
    pub fn pop<F, R>(&self, consumer: F)
    where
        F: FnOnce(&T) -> R,
        R: Into<Outcome>,
    {
        consume(self.take(), consumer);
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`. Returns whether
    /// an item was handed to `consumer`.
    pub fn pop_timeout<F, R>(&self, timeout: Duration, consumer: F) -> bool
    where
        F: FnOnce(&T) -> R,
        R: Into<Outcome>,
    {
        match self.take_timeout(timeout) {
            Some(delivery) => {
                consume(delivery, consumer);
                true
            }
            None => false,
        }
    }

    /// Lease the next item; the caller settles it with
    /// [`Delivery::ack`] / [`Delivery::fail`].
    pub fn take(&self) -> Delivery<T, C> {
        Delivery::new(self.buffer.pop(), Arc::clone(&self.store))
    }

    pub fn take_timeout(&self, timeout: Duration) -> Option<Delivery<T, C>> {
        self.buffer
            .pop_timeout(timeout)
            .map(|entry| Delivery::new(entry, Arc::clone(&self.store)))
    }

    /// Run one reload cycle now (waiting, then retry).
    pub fn reload(&self) -> ReloadReport {
        self.reloader.run_cycle()
    }

    /// Stop the background reloader and wait for it to exit. Idempotent.
    pub fn stop(&self) {
        let handle = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            handle.stop();
            info!(queue_dir = %self.store.root().display(), "queue stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(ReloaderHandle::is_running)
    }

    pub fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(QueueCounts {
            buffered: self.buffer.len(),
            active: self.store.count(Partition::Active)?,
            waiting: self.store.count(Partition::Waiting)?,
            retry: self.store.count(Partition::Retry)?,
        })
    }
}

impl<T, C: Codec> QueueManager<T, C> {
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.inmemory_object_limit
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn dir(&self, partition: Partition) -> &Path {
        self.store.dir(partition)
    }
}

fn consume<T, C, F, R>(delivery: Delivery<T, C>, consumer: F)
where
    C: Codec,
    F: FnOnce(&T) -> R,
    R: Into<Outcome>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        Into::<Outcome>::into(consumer(delivery.item()))
    }));
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(payload) => Outcome::failure(format!("consumer panicked: {}", panic_message(&*payload))),
    };
    let key = delivery.key().clone();
    if let Err(e) = delivery.settle(&outcome) {
        error!(%key, error = %e, "cannot settle item");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// One item taken from the buffer, not yet settled.
///
/// Its file is still in `active`. `ack` deletes it, `fail` moves it to
/// `retry`. Dropping an unsettled delivery (early return, panic) also moves
/// it to `retry`, so the item is never lost.
pub struct Delivery<T, C: Codec> {
    key: ItemKey,
    item: T,
    store: Arc<DurableStore<C>>,
    settled: bool,
}

impl<T, C: Codec> Delivery<T, C> {
    fn new(entry: BufferEntry<T>, store: Arc<DurableStore<C>>) -> Self {
        Self {
            key: entry.key,
            item: entry.item,
            store,
            settled: false,
        }
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    /// Retire the item.
    pub fn ack(mut self) -> Result<(), StoreError> {
        self.settled = true;
        self.store.delete(Partition::Active, &self.key)
    }

    /// Keep the item for another attempt.
    pub fn fail(mut self, reason: &str) -> Result<(), StoreError> {
        self.settled = true;
        self.move_to_retry(reason)
    }

    pub fn settle(self, outcome: &Outcome) -> Result<(), StoreError> {
        if outcome.is_success() {
            self.ack()
        } else {
            let reason = outcome.reason().to_string();
            self.fail(&reason)
        }
    }

    fn move_to_retry(&self, reason: &str) -> Result<(), StoreError> {
        warn!(key = %self.key, reason, "consumption failed, moving item to retry");
        match self
            .store
            .move_item(&self.key, Partition::Active, Partition::Retry)
        {
            // 既に無いなら追跡すべきものも無い
            Err(e) if e.kind() == ErrorKind::Race => Ok(()),
            other => other,
        }
    }
}

impl<T, C: Codec> Drop for Delivery<T, C> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = self.move_to_retry("delivery dropped without being settled") {
            error!(key = %self.key, error = %e, "retry failed");
        }
    }
}
