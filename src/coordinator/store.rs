//! Revisioned key space of a local coordination node
//!
//! Every mutation bumps a store-wide revision. Each key tracks the revision
//! it was created at, the revision of its last change and how many times it
//! was written. Changes are broadcast to watchers.

use crate::common::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

const WATCH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A change to one key. For deletes `kv` holds the last value and
/// `mod_revision` is the deleting revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub kv: KeyValue,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    revision: i64,
    entries: Vec<KeyValue>,
}

#[derive(Debug, Default)]
struct StoreInner {
    revision: i64,
    entries: BTreeMap<String, KeyValue>,
}

pub struct KvStore {
    inner: RwLock<StoreInner>,
    events: Mutex<Option<broadcast::Sender<WatchEvent>>>,
    closed: AtomicBool,
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(StoreInner::default()),
            events: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NodeStopped);
        }
        Ok(())
    }

    pub fn revision(&self) -> i64 {
        self.inner.read().revision
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Keys equal to `key`, or starting with it when `prefix` is set.
    pub fn range(&self, key: &str, prefix: bool) -> Result<(Vec<KeyValue>, i64)> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let kvs = if prefix {
            inner
                .entries
                .range(key.to_string()..)
                .take_while(|(k, _)| k.starts_with(key))
                .map(|(_, kv)| kv.clone())
                .collect()
        } else {
            inner.entries.get(key).cloned().into_iter().collect()
        };
        Ok((kvs, inner.revision))
    }

    pub fn put(&self, key: &str, value: Vec<u8>) -> Result<i64> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::Grpc(tonic::Status::invalid_argument(
                "key must not be empty",
            )));
        }

        // Events go out under the write lock so watchers see revisions in order
        let mut inner = self.inner.write();
        inner.revision += 1;
        let revision = inner.revision;
        let kv = match inner.entries.get(key) {
            Some(prev) => KeyValue {
                key: key.to_string(),
                value,
                create_revision: prev.create_revision,
                mod_revision: revision,
                version: prev.version + 1,
            },
            None => KeyValue {
                key: key.to_string(),
                value,
                create_revision: revision,
                mod_revision: revision,
                version: 1,
            },
        };
        inner.entries.insert(key.to_string(), kv.clone());
        self.publish(vec![WatchEvent {
            kind: EventKind::Put,
            kv,
        }]);
        Ok(revision)
    }

    /// Returns the number of deleted keys and the store revision afterwards.
    /// The revision only moves when something was deleted.
    pub fn delete(&self, key: &str, prefix: bool) -> Result<(i64, i64)> {
        self.ensure_open()?;

        let mut inner = self.inner.write();
        let doomed: Vec<String> = if prefix {
            inner
                .entries
                .range(key.to_string()..)
                .take_while(|(k, _)| k.starts_with(key))
                .map(|(k, _)| k.clone())
                .collect()
        } else if inner.entries.contains_key(key) {
            vec![key.to_string()]
        } else {
            Vec::new()
        };

        if doomed.is_empty() {
            return Ok((0, inner.revision));
        }

        inner.revision += 1;
        let revision = inner.revision;
        let events: Vec<WatchEvent> = doomed
            .iter()
            .filter_map(|k| inner.entries.remove(k))
            .map(|mut kv| {
                kv.mod_revision = revision;
                WatchEvent {
                    kind: EventKind::Delete,
                    kv,
                }
            })
            .collect();

        let deleted = events.len() as i64;
        self.publish(events);
        Ok((deleted, revision))
    }

    /// Callers hold the `inner` write lock.
    fn publish(&self, events: Vec<WatchEvent>) {
        if let Some(tx) = self.events.lock().as_ref() {
            for event in events {
                // No receivers is fine
                let _ = tx.send(event);
            }
        }
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<WatchEvent>> {
        self.ensure_open()?;
        self.events
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(Error::NodeStopped)
    }

    /// Reject further operations and end every watch stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.events.lock().take();
    }

    /// Write the key space to `path` as JSON, through a temporary file.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let bytes = {
            let inner = self.inner.read();
            let snapshot = Snapshot {
                revision: inner.revision,
                entries: inner.entries.values().cloned().collect(),
            };
            serde_json::to_vec(&snapshot)?
        };

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::debug!(path = %path.display(), "snapshot saved");
        Ok(())
    }

    /// Load a snapshot written by [`KvStore::save_snapshot`]. A missing file
    /// leaves the store empty and returns `false`.
    pub async fn restore_snapshot(&self, path: &Path) -> Result<bool> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

        let mut inner = self.inner.write();
        inner.revision = snapshot.revision;
        inner.entries = snapshot
            .entries
            .into_iter()
            .map(|kv| (kv.key.clone(), kv))
            .collect();
        tracing::info!(
            path = %path.display(),
            revision = inner.revision,
            keys = inner.entries.len(),
            "snapshot restored"
        );
        Ok(true)
    }
}
