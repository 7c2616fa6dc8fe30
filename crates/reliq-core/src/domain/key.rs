//! ItemKey - 永続化されたアイテムのファイル名
//!
//! `<timestamp>.<ulid>` 形式:
//! - timestamp: UTC, 秒精度, `%Y%m%dT%H%M%S`（15 文字）
//! - ulid: Crockford base32（26 文字）
//!
//! ## ソート順
//! 文字列の辞書順 ≒ 作成順。timestamp が先頭にあるため、
//! 同じ秒の中では ULID の順序になります。
//! 時計が巻き戻った場合は保証されません。

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use ulid::Ulid;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";
const TIMESTAMP_LEN: usize = 15;
const ULID_LEN: usize = 26;

/// Sortable, unique name of an item file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(created_at: DateTime<Utc>, suffix: Ulid) -> Self {
        Self(format!("{}.{}", created_at.format(TIMESTAMP_FORMAT), suffix))
    }

    /// Parse a file name. Anything that is not `<timestamp>.<ulid>` is rejected,
    /// so stray files and the partition sub-directories never look like items.
    pub fn parse(name: &str) -> Option<Self> {
        let (ts, suffix) = name.split_once('.')?;
        if ts.len() != TIMESTAMP_LEN || suffix.len() != ULID_LEN {
            return None;
        }
        NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()?;
        Ulid::from_string(suffix).ok()?;
        Some(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
