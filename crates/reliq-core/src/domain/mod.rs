//! Domain model (keys, partitions, outcomes).

pub mod key;
pub mod outcome;
pub mod partition;

pub use key::ItemKey;
pub use outcome::{Outcome, OutcomeKind};
pub use partition::{Admission, Partition};
