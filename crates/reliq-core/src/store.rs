//! DurableStore - パーティションディレクトリ上のファイル操作
//!
//! すべての状態遷移はファイルシステム上でアトミック:
//! - 作成: `.<key>.tmp` に書いて sync してから `hard_link` で key 名に公開（排他作成）
//! - 移動: `rename`（コピーしない）
//! - 削除: `remove_file`
//!
//! key 名のファイルは常に書き込み済み。一時ファイルは `ItemKey::parse` を通らないので
//! list には出てこない。
//!
//! 並行する list と move/delete の競合は `StoreError::NotFound` として
//! 呼び出し側に返す。呼び出し側はこれを無害な競合として扱う。

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::domain::{ItemKey, Partition};
use crate::error::{QueueError, StoreError};
use crate::ports::Codec;

pub struct DurableStore<C> {
    root: PathBuf,
    waiting: PathBuf,
    retry: PathBuf,
    codec: C,
}

impl<C: Codec> DurableStore<C> {
    /// Create the partition directories under `root` (if missing) and open
    /// a store over them.
    pub fn open(root: impl Into<PathBuf>, codec: C) -> Result<Self, QueueError> {
        let root = root.into();
        let waiting = partition_dir(&root, Partition::Waiting);
        let retry = partition_dir(&root, Partition::Retry);

        for dir in [&root, &waiting, &retry] {
            fs::create_dir_all(dir).map_err(|source| QueueError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(Self {
            root,
            waiting,
            retry,
            codec,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, partition: Partition) -> &Path {
        match partition {
            Partition::Active => &self.root,
            Partition::Waiting => &self.waiting,
            Partition::Retry => &self.retry,
        }
    }

    pub fn path_of(&self, partition: Partition, key: &ItemKey) -> PathBuf {
        self.dir(partition).join(key.as_str())
    }

    /// Encode `item` and write it to a new file named `key`.
    ///
    /// The bytes are synced under a temporary name first, so a file named
    /// `key` is never observed empty or partially written.
    pub fn write<T: Serialize>(
        &self,
        partition: Partition,
        key: &ItemKey,
        item: &T,
    ) -> Result<(), StoreError> {
        let bytes = self.codec.encode(item).map_err(|source| StoreError::Encode {
            key: key.clone(),
            source,
        })?;
        let path = self.path_of(partition, key);
        let tmp = self.dir(partition).join(format!(".{key}.tmp"));
        let exists_or_io = |at: &Path, source: io::Error| match source.kind() {
            io::ErrorKind::AlreadyExists => StoreError::AlreadyExists { key: key.clone() },
            _ => StoreError::from_io(at, source),
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(|source| exists_or_io(&tmp, source))?;
        let published = write_all_synced(&mut file, &bytes)
            .map_err(|source| StoreError::from_io(&tmp, source))
            .and_then(|()| {
                // link は既存の key を上書きしない
                fs::hard_link(&tmp, &path).map_err(|source| exists_or_io(&path, source))
            });
        drop(file);
        if let Err(e) = fs::remove_file(&tmp) {
            debug!(path = %tmp.display(), error = %e, "cannot remove temporary file");
        }
        published?;

        debug!(%key, %partition, bytes = bytes.len(), "item written");
        Ok(())
    }

    /// Keys in `partition`, in lexicographic (= key) order.
    ///
    /// Entries that are not item files (sub-directories, stray files) are
    /// skipped.
    pub fn list(&self, partition: Partition) -> Result<Vec<ItemKey>, StoreError> {
        let dir = self.dir(partition);
        let entries = fs::read_dir(dir).map_err(|source| StoreError::from_io(dir, source))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::from_io(dir, source))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(key) = entry.file_name().to_str().and_then(ItemKey::parse) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn count(&self, partition: Partition) -> Result<usize, StoreError> {
        self.list(partition).map(|keys| keys.len())
    }

    pub fn read<T: DeserializeOwned>(
        &self,
        partition: Partition,
        key: &ItemKey,
    ) -> Result<T, StoreError> {
        let path = self.path_of(partition, key);
        let bytes = fs::read(&path).map_err(|source| StoreError::from_io(&path, source))?;
        self.codec
            .decode(&bytes)
            .map_err(|source| StoreError::CorruptItem { path, source })
    }

    /// Atomically rename `key` from one partition to another.
    ///
    /// `NotFound` means the source vanished. A missing destination directory
    /// is reported as an I/O error instead.
    pub fn move_item(&self, key: &ItemKey, from: Partition, to: Partition) -> Result<(), StoreError> {
        let src = self.path_of(from, key);
        let dst = self.path_of(to, key);
        fs::rename(&src, &dst).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound && src.is_file() {
                StoreError::Io { path: dst, source }
            } else {
                StoreError::from_io(&src, source)
            }
        })?;

        debug!(%key, %from, %to, "item moved");
        Ok(())
    }

    /// Remove `key` from `partition`. Already-missing files are fine.
    pub fn delete(&self, partition: Partition, key: &ItemKey) -> Result<(), StoreError> {
        let path = self.path_of(partition, key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%key, %partition, "item deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::from_io(&path, source)),
        }
    }
}

fn partition_dir(root: &Path, partition: Partition) -> PathBuf {
    match partition.dir_name() {
        Some(name) => root.join(name),
        None => root.to_path_buf(),
    }
}

fn write_all_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.sync_all()
}
