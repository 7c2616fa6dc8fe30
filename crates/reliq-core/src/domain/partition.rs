//! Storage partitions and push admission.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the three disjoint on-disk areas an item file can live in.
///
/// Transitions:
/// - push -> Active (buffered) | Waiting (over capacity)
/// - Active -> deleted (success) | Retry (failure)
/// - Waiting/Retry -> Active (reload)
/// - Active -> Waiting (startup, over capacity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// The queue root. Mirrors the in-memory buffer.
    Active,

    /// Spill-over for items pushed while the buffer was full.
    Waiting,

    /// Items whose consumption failed.
    Retry,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Active, Partition::Waiting, Partition::Retry];

    /// Sub-directory of the queue root, `None` for the root itself.
    pub fn dir_name(self) -> Option<&'static str> {
        match self {
            Partition::Active => None,
            Partition::Waiting => Some("waiting"),
            Partition::Retry => Some("retry"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Active => "active",
            Partition::Waiting => "waiting",
            Partition::Retry => "retry",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a pushed item landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Written to `active` and enqueued in memory.
    Buffered,

    /// Written to `waiting` only; a later reload makes it consumable.
    Spilled,
}

impl Admission {
    pub fn partition(self) -> Partition {
        match self {
            Admission::Buffered => Partition::Active,
            Admission::Spilled => Partition::Waiting,
        }
    }
}
