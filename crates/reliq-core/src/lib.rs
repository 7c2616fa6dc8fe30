//! reliq-core
//!
//! ディレクトリを永続層にした、単一プロセス用の durable queue。
//!
//! # モジュール構成
//! - **domain**: ItemKey, Partition, Outcome などの値型
//! - **ports**: 抽象化レイヤー（Clock, KeyGenerator, Codec）
//! - **store**: パーティション（active / waiting / retry）へのファイル操作
//! - **buffer**: blocking pop 付きのインメモリ FIFO
//! - **reloader**: waiting / retry から buffer への補充（起動時・定期・手動）
//! - **manager**: push / pop / reload / stop のファサード
//! - **worker**: async handler で消費する WorkerGroup
//! - **observability**: パーティションごとの件数
//!
//! # 配送の保証
//! 1 件のアイテムは常にちょうど 1 つのパーティションにファイルとして存在し、
//! 消費に成功するまで削除されない（at-least-once）。

pub mod buffer;
pub mod config;
pub mod domain;
pub mod error;
pub mod manager;
pub mod observability;
pub mod ports;
pub mod reloader;
pub mod store;
pub mod worker;

pub use config::QueueConfig;
pub use domain::{Admission, ItemKey, Outcome, OutcomeKind, Partition};
pub use error::{CodecError, ConfigError, ErrorKind, QueueError, StoreError};
pub use manager::{Delivery, QueueBuilder, QueueManager};
pub use observability::QueueCounts;
pub use ports::{Codec, JsonCodec};
pub use reloader::ReloadReport;
pub use worker::{ItemHandler, WorkerGroup};
