use serde::{Deserialize, Serialize};

use crate::domain::Partition;

/// Snapshot of where items currently are. Each count is taken separately,
/// so a snapshot under load can be slightly inconsistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Entries in the in-memory buffer.
    pub buffered: usize,
    /// Files in the active partition (buffered or being consumed).
    pub active: usize,
    pub waiting: usize,
    pub retry: usize,
}

impl QueueCounts {
    pub fn get(&self, partition: Partition) -> usize {
        match partition {
            Partition::Active => self.active,
            Partition::Waiting => self.waiting,
            Partition::Retry => self.retry,
        }
    }

    /// Items on disk across all partitions.
    pub fn total_files(&self) -> usize {
        self.active + self.waiting + self.retry
    }
}
