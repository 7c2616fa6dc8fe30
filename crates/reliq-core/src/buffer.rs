//! MemoryBuffer - blocking pop 付きの FIFO
//!
//! # 学習ポイント
//! - Mutex + Condvar による blocking pop
//! - 容量の判定は [`MemoryBuffer::reserve`] で行う。判定と枠の確保が同じロックの中なので、
//!   push と reload が並行しても `len() + 予約数` が capacity を超えない
//! - 予約はガード（[`Reservation`]）で持ち、fill せずに drop すると枠が返る

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::domain::ItemKey;

/// An item ready for consumption, mirroring a file in the active partition.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferEntry<T> {
    pub key: ItemKey,
    pub item: T,
}

struct Slots<T> {
    entries: VecDeque<BufferEntry<T>>,
    /// 確保済みでまだ fill されていない枠
    reserved: usize,
}

pub struct MemoryBuffer<T> {
    slots: Mutex<Slots<T>>,
    /// fill 時の通知用
    available: Condvar,
}

impl<T> MemoryBuffer<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: VecDeque::new(),
                reserved: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Claim one slot if entries plus outstanding reservations stay below
    /// `capacity`.
    pub fn reserve(&self, capacity: usize) -> Option<Reservation<'_, T>> {
        let mut slots = self.lock();
        if slots.entries.len() + slots.reserved >= capacity {
            return None;
        }
        slots.reserved += 1;
        Some(Reservation {
            buffer: self,
            filled: false,
        })
    }

    /// Block until an entry is available.
    pub fn pop(&self) -> BufferEntry<T> {
        let mut guard = self.lock();
        loop {
            if let Some(entry) = guard.entries.pop_front() {
                return entry;
            }
            guard = self
                .available
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<BufferEntry<T>> {
        let start = Instant::now();
        let mut guard = self.lock();
        loop {
            if let Some(entry) = guard.entries.pop_front() {
                return Some(entry);
            }
            let remaining = timeout.checked_sub(start.elapsed())?;
            let (new_guard, _) = self
                .available
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = new_guard;
        }
    }

    /// Entries ready to pop. Reservations are not counted.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries plus outstanding reservations.
    pub fn occupied(&self) -> usize {
        let slots = self.lock();
        slots.entries.len() + slots.reserved
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        // 中身は VecDeque と数値だけなので、panic したスレッドが途中状態を残すことはない
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for MemoryBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A claimed buffer slot. Dropping it unfilled gives the slot back.
#[must_use = "an unfilled reservation is released on drop"]
pub struct Reservation<'a, T> {
    buffer: &'a MemoryBuffer<T>,
    filled: bool,
}

impl<T> Reservation<'_, T> {
    pub fn fill(mut self, entry: BufferEntry<T>) {
        {
            let mut slots = self.buffer.lock();
            slots.reserved -= 1;
            slots.entries.push_back(entry);
        }
        self.filled = true;
        self.buffer.available.notify_one();
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if !self.filled {
            self.buffer.lock().reserved -= 1;
        }
    }
}
