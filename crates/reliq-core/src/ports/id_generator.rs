//! KeyGenerator port - アイテムキー生成の抽象化
//!
//! キューはキーを「一意でソート可能な識別子」としてしか扱いません。
//! テスト容易性のために trait として抽象化しています。
//!
//! # 実装
//! - **UlidKeyGenerator**: ULID ベース（本番用）

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::ItemKey;
use crate::ports::Clock;

/// KeyGenerator はアイテムのファイル名を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の producer スレッドから使える）
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> ItemKey;
}

/// UlidKeyGenerator は `<timestamp>.<ulid>` 形式のキーを生成
///
/// ULID は monotonic generator で生成するため、同じミリ秒内でも
/// 生成順にソートされます。Clock を差し替えると timestamp 部分を固定できます。
pub struct UlidKeyGenerator<C> {
    clock: C,
    ulids: Mutex<Generator>,
}

impl<C: Clock> UlidKeyGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            ulids: Mutex::new(Generator::new()),
        }
    }
}

impl<C: Clock> KeyGenerator for UlidKeyGenerator<C> {
    fn generate(&self) -> ItemKey {
        let now = self.clock.now();
        let at: SystemTime = now.into();
        let ulid = self
            .ulids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate_from_datetime(at)
            // random 部分が溢れた場合のみ。単調性は失うが一意性は保たれる
            .unwrap_or_else(|_| Ulid::from_datetime(at));
        ItemKey::new(now, ulid)
    }
}
