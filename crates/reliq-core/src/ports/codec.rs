//! Codec port - ペイロードとバイト列の相互変換
//!
//! キューはペイロードの中身を解釈しません。ファイルの中身は
//! Codec が決めます（デフォルトは JSON）。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Codec は任意の serde 型を encode / decode する
///
/// # 設計原則
/// - decode 失敗は `CodecError::Decode`（呼び出し側で CorruptItem になる）
/// - 状態を持たない（`Send + Sync` で共有できる）
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, item: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// serde_json による Codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, item: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(item).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
