//! Durable record of read assertions the server has not confirmed yet.
//!
//! The server's `readThroughSeq` stays the source of truth. This file only
//! remembers what the client claimed so a restart or reconnect can re-send it,
//! and so a stale poll arriving before the claim is applied cannot bring an
//! unread badge back.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    pending: BTreeMap<Uuid, i64>,
}

#[derive(Debug)]
pub struct ReadStateCache {
    path: PathBuf,
    pending: BTreeMap<Uuid, i64>,
}

impl ReadStateCache {
    /// Load the cache at `path`. A missing file is an empty cache; an unreadable
    /// one is discarded, since every entry can be re-derived by opening the
    /// conversation again.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let pending = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<CacheFile>(&contents) {
                Ok(file) => file.pending,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Discarding corrupt read-state cache: {}", e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read {:?}", path))
                    .into())
            }
        };

        Ok(Self { path, pending })
    }

    pub fn get(&self, conversation_id: Uuid) -> Option<i64> {
        self.pending.get(&conversation_id).copied()
    }

    /// Assertions still waiting for server confirmation.
    pub fn pending(&self) -> impl Iterator<Item = (Uuid, i64)> + '_ {
        self.pending.iter().map(|(id, seq)| (*id, *seq))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record that the client has read `conversation_id` through `seq`.
    /// Lower assertions than the one already recorded are ignored.
    pub fn assert_read(&mut self, conversation_id: Uuid, seq: i64) -> AppResult<()> {
        match self.pending.get(&conversation_id) {
            Some(existing) if *existing >= seq => Ok(()),
            _ => {
                self.pending.insert(conversation_id, seq);
                self.persist()
            }
        }
    }

    /// Drop the assertion once the server reports a pointer at or past it.
    /// Returns true when an entry was pruned.
    pub fn confirm(&mut self, conversation_id: Uuid, server_read_through: i64) -> AppResult<bool> {
        match self.pending.get(&conversation_id) {
            Some(asserted) if server_read_through >= *asserted => {
                self.pending.remove(&conversation_id);
                self.persist()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Forget an assertion the server rejected outright.
    pub fn forget(&mut self, conversation_id: Uuid) -> AppResult<()> {
        if self.pending.remove(&conversation_id).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> AppResult<()> {
        let contents = serde_json::to_string_pretty(&CacheFile {
            pending: self.pending.clone(),
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create cache directory {:?}", parent))?;
            }
        }

        // Write to a sibling temp file, then rename over the cache
        let temp_file = self.path.with_extension("tmp");
        fs::write(&temp_file, contents)
            .with_context(|| format!("Failed to write temp cache file {:?}", temp_file))?;
        fs::rename(&temp_file, &self.path)
            .with_context(|| format!("Failed to replace cache file {:?}", self.path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn survives_reopen_until_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read-state.json");
        let conversation = Uuid::new_v4();

        let mut cache = assert_ok!(ReadStateCache::open(&path));
        assert!(cache.is_empty());
        assert_ok!(cache.assert_read(conversation, 5));
        assert_ok!(cache.assert_read(conversation, 3));

        let mut reopened = assert_ok!(ReadStateCache::open(&path));
        assert_eq!(reopened.get(conversation), Some(5));

        assert!(!assert_ok!(reopened.confirm(conversation, 4)));
        assert!(assert_ok!(reopened.confirm(conversation, 5)));

        let reopened = assert_ok!(ReadStateCache::open(&path));
        assert!(reopened.is_empty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read-state.json");
        fs::write(&path, "{not json").unwrap();

        let cache = assert_ok!(ReadStateCache::open(&path));
        assert!(cache.is_empty());
    }

    #[test]
    fn forget_drops_rejected_assertion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("read-state.json");
        let conversation = Uuid::new_v4();

        let mut cache = assert_ok!(ReadStateCache::open(&path));
        assert_ok!(cache.assert_read(conversation, 2));
        assert_ok!(cache.forget(conversation));

        let reopened = assert_ok!(ReadStateCache::open(&path));
        assert_eq!(reopened.get(conversation), None);
    }
}
