//! Ports - 外部コラボレーターの抽象化
//!
//! キューの中核（store / buffer / reloader / manager）が依存する外部機能を
//! trait として定義します。
//!
//! - **Clock**: 現在時刻
//! - **KeyGenerator**: 一意でソート可能なキー
//! - **Codec**: ペイロードのシリアライズ

pub mod clock;
pub mod codec;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::codec::{Codec, JsonCodec};
pub use self::id_generator::{KeyGenerator, UlidKeyGenerator};
