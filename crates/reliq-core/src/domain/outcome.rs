//! Outcome model: the verdict a consumer returns for one item.
//!
//! Consumers are plain closures or handlers, so several natural return types
//! convert into [`Outcome`]:
//! - `bool`: `true` is success
//! - `Result<(), E>`: `Ok` is success, `Err` carries the reason
//! - `Result<bool, E>`: both of the above
//!
//! A panicking consumer is turned into a failure by the queue itself.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// Result of consuming one item.
///
/// - `SUCCESS`: the item is retired (its file is deleted).
/// - `FAILURE`: the item is moved to the retry partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("consumer reported failure")
    }
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        if ok {
            Outcome::success()
        } else {
            Outcome {
                kind: OutcomeKind::Failure,
                reason: None,
            }
        }
    }
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::success()
    }
}

impl<E: fmt::Display> From<Result<(), E>> for Outcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Outcome::success(),
            Err(e) => Outcome::failure(e.to_string()),
        }
    }
}

impl<E: fmt::Display> From<Result<bool, E>> for Outcome {
    fn from(result: Result<bool, E>) -> Self {
        match result {
            Ok(ok) => Outcome::from(ok),
            Err(e) => Outcome::failure(e.to_string()),
        }
    }
}
