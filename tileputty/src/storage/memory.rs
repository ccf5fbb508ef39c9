//! In-memory object store.
//!
//! Keeps objects in a map and supports injecting failures per key, so the
//! retry, isolation and conflict behavior of the pipeline can be exercised
//! without a network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{ObjectStore, StorageError, StoredObject, WriteCondition};
use crate::metadata::ObjectMetadata;

/// An object held by [`MemoryStore`], with the headers it was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    pub etag: String,
}

/// A scripted failure for one key.
#[derive(Debug)]
struct Fault {
    /// Failures left; `None` fails forever.
    remaining: Option<u32>,
    error: StorageError,
}

impl Fault {
    /// Consume one failure, if any is left.
    fn trip(&mut self) -> Option<StorageError> {
        match &mut self.remaining {
            None => Some(self.error.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.error.clone())
            }
        }
    }
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), MemoryObject>,
    put_faults: HashMap<String, Fault>,
    get_faults: HashMap<String, Fault>,
    put_attempts: HashMap<String, u32>,
    etag_sequence: u64,
}

impl State {
    fn next_etag(&mut self) -> String {
        self.etag_sequence += 1;
        format!("\"{:016x}\"", self.etag_sequence)
    }

    fn record_put(&mut self, key: &str) -> Result<(), StorageError> {
        *self.put_attempts.entry(key.to_string()).or_default() += 1;
        match self.put_faults.get_mut(key).and_then(Fault::trip) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Object store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without headers.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.state();
        let etag = state.next_etag();
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            MemoryObject {
                body: body.into(),
                content_type: None,
                content_encoding: None,
                cache_control: None,
                etag,
            },
        );
    }

    /// Get a stored object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<MemoryObject> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// All keys stored in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail the next `times` writes to `key` with `error`.
    pub fn fail_puts(&self, key: &str, times: u32, error: StorageError) {
        self.state().put_faults.insert(
            key.to_string(),
            Fault {
                remaining: Some(times),
                error,
            },
        );
    }

    /// Fail every write to `key` with `error`.
    pub fn fail_all_puts(&self, key: &str, error: StorageError) {
        self.state().put_faults.insert(
            key.to_string(),
            Fault {
                remaining: None,
                error,
            },
        );
    }

    /// Fail the next `times` reads of `key` with `error`.
    pub fn fail_gets(&self, key: &str, times: u32, error: StorageError) {
        self.state().get_faults.insert(
            key.to_string(),
            Fault {
                remaining: Some(times),
                error,
            },
        );
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let mut state = self.state();
        if let Some(error) = state.get_faults.get_mut(key).and_then(Fault::trip) {
            return Err(error);
        }
        let object = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        Ok(StoredObject {
            body: object.body.clone(),
            etag: Some(object.etag.clone()),
        })
    }

    /// Write attempts made against `key`, failed ones included.
    pub fn put_attempts(&self, key: &str) -> u32 {
        self.state().put_attempts.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        self.state().record_put(key)?;

        let body = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::LocalRead {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut state = self.state();
        let etag = state.next_etag();
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            MemoryObject {
                body,
                content_type: metadata.content_type.map(str::to_string),
                content_encoding: metadata.content_encoding.map(str::to_string),
                cache_control: metadata.cache_control.map(str::to_string),
                etag,
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let result = self.lookup(bucket, key);

        // A real request suspends here; let concurrent callers interleave.
        tokio::task::yield_now().await;
        result
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
        condition: WriteCondition,
    ) -> Result<(), StorageError> {
        let mut state = self.state();
        state.record_put(key)?;

        let id = (bucket.to_string(), key.to_string());
        let holds = match (&condition, state.objects.get(&id)) {
            (WriteCondition::Unconditional, _) => true,
            (WriteCondition::IfAbsent, existing) => existing.is_none(),
            (WriteCondition::IfMatch(etag), Some(existing)) => existing.etag == *etag,
            (WriteCondition::IfMatch(_), None) => false,
        };
        if !holds {
            return Err(StorageError::PreconditionFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let etag = state.next_etag();
        state.objects.insert(
            id,
            MemoryObject {
                body,
                content_type: content_type.map(str::to_string),
                content_encoding: None,
                cache_control: None,
                etag,
            },
        );
        Ok(())
    }
}
