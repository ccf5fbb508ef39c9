//! Shared "latest version per dataset" manifest.
//!
//! The manifest is a JSON array stored at the bucket root:
//!
//! ```json
//! [{"name": "forest", "latest_version": "v2"}, {"name": "roads", "latest_version": "v1"}]
//! ```
//!
//! Many publish runs may update it at once, so [`ManifestUpdater`] never
//! overwrites blindly. It reads the document with its ETag, merges the new
//! entry, and writes back only if the stored object is unchanged
//! (`If-Match`) or still absent (`If-None-Match: *`). A lost race re-reads
//! and re-merges.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metadata::JSON_CONTENT_TYPE;
use crate::storage::{ObjectStore, StorageError, WriteCondition};
use crate::upload::{with_retry, RetryPolicy};

/// Key of the manifest object.
pub const LATEST_KEY: &str = "latest";

/// Re-reads allowed after losing a conditional write.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Latest published version of one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub latest_version: String,
}

/// The manifest document: one entry per dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LatestManifest {
    entries: Vec<ManifestEntry>,
}

impl LatestManifest {
    /// Parse a manifest body.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Record `version` as the latest for `dataset`.
    ///
    /// Updates the existing entry in place, or appends one if the dataset
    /// is new. Later entries with the same name are dropped, so the result
    /// holds at most one entry per dataset. Returns the version of the first
    /// matching entry, if any.
    pub fn upsert(&mut self, dataset: &str, version: &str) -> Option<String> {
        let mut previous = None;
        self.entries.retain_mut(|entry| {
            if entry.name != dataset {
                return true;
            }
            if previous.is_some() {
                return false;
            }
            previous = Some(std::mem::replace(
                &mut entry.latest_version,
                version.to_string(),
            ));
            true
        });

        if previous.is_none() {
            self.entries.push(ManifestEntry {
                name: dataset.to_string(),
                latest_version: version.to_string(),
            });
        }
        previous
    }

    /// Latest version recorded for `dataset`.
    pub fn latest_version(&self, dataset: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == dataset)
            .map(|e| e.latest_version.as_str())
    }

    /// All entries, in document order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Errors that abort a manifest update.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Reading the manifest failed for a reason other than absence.
    #[error("failed to fetch manifest: {0}")]
    Fetch(#[source] StorageError),

    /// The stored manifest is not a JSON array of entries.
    #[error("manifest s3://{bucket}/{key} is malformed: {source}")]
    Parse {
        bucket: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The merged manifest could not be serialized.
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Writing the manifest failed.
    #[error("failed to write manifest: {0}")]
    Write(#[source] StorageError),

    /// Concurrent writers kept winning the conditional write.
    #[error("manifest update lost {attempts} conditional writes to concurrent updates")]
    Conflict { attempts: u32 },
}

/// Read-merge-write of the manifest guarded by conditional writes.
pub struct ManifestUpdater {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    max_conflict_retries: u32,
    retry: RetryPolicy,
}

impl ManifestUpdater {
    /// Create an updater for the manifest in `bucket`.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: LATEST_KEY.to_string(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            retry: RetryPolicy::default(),
        }
    }

    /// Use a different manifest key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Set how many times a lost conditional write is retried.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Set the retry policy for transient read and write failures.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Record `version` as the latest for `dataset`.
    ///
    /// A missing manifest counts as empty. Returns the manifest as written.
    ///
    /// # Errors
    ///
    /// - [`ManifestError::Fetch`] if the read fails other than with "not found"
    /// - [`ManifestError::Parse`] if the stored body is malformed
    /// - [`ManifestError::Write`] if the write fails other than by conflict
    /// - [`ManifestError::Conflict`] if every conditional write lost
    pub async fn update(
        &self,
        dataset: &str,
        version: &str,
    ) -> Result<LatestManifest, ManifestError> {
        let max_attempts = self.max_conflict_retries + 1;

        for attempt in 1..=max_attempts {
            let (mut manifest, condition) = self.fetch().await?;
            let previous = manifest.upsert(dataset, version);
            let body = manifest.to_json().map_err(ManifestError::Serialize)?;

            let written = with_retry(&self.retry, "manifest write", || {
                self.store.put_object(
                    &self.bucket,
                    &self.key,
                    body.clone(),
                    Some(JSON_CONTENT_TYPE),
                    condition.clone(),
                )
            })
            .await;

            match written.result {
                Ok(()) => {
                    info!(
                        dataset,
                        version,
                        previous = previous.as_deref().unwrap_or("none"),
                        entries = manifest.len(),
                        "Updated latest manifest"
                    );
                    return Ok(manifest);
                }
                Err(StorageError::PreconditionFailed { .. }) => {
                    warn!(
                        dataset,
                        attempt,
                        max_attempts,
                        "Manifest changed during update, re-reading"
                    );
                }
                Err(e) => return Err(ManifestError::Write(e)),
            }
        }

        Err(ManifestError::Conflict {
            attempts: max_attempts,
        })
    }

    /// Read the current manifest and the condition to write it back under.
    async fn fetch(&self) -> Result<(LatestManifest, WriteCondition), ManifestError> {
        let fetched = with_retry(&self.retry, "manifest read", || {
            self.store.get_object(&self.bucket, &self.key)
        })
        .await;

        match fetched.result {
            Ok(object) => {
                let manifest =
                    LatestManifest::from_json(&object.body).map_err(|e| ManifestError::Parse {
                        bucket: self.bucket.clone(),
                        key: self.key.clone(),
                        source: e,
                    })?;
                let condition = match object.etag {
                    Some(etag) => WriteCondition::IfMatch(etag),
                    None => WriteCondition::Unconditional,
                };
                Ok((manifest, condition))
            }
            Err(e) if e.is_not_found() => {
                debug!(bucket = %self.bucket, key = %self.key, "No manifest found, starting empty");
                Ok((LatestManifest::default(), WriteCondition::IfAbsent))
            }
            Err(e) => Err(ManifestError::Fetch(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::storage::MemoryStore;

    fn updater(store: &Arc<MemoryStore>) -> ManifestUpdater {
        let store: Arc<dyn ObjectStore> = store.clone();
        ManifestUpdater::new(store, "b").with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO))
    }

    fn stored(store: &MemoryStore) -> serde_json::Value {
        serde_json::from_slice(&store.object("b", LATEST_KEY).unwrap().body).unwrap()
    }

    #[test]
    fn test_upsert_updates_in_place_and_appends() {
        let mut manifest = LatestManifest::default();
        assert_eq!(manifest.upsert("forest", "v1"), None);
        assert_eq!(manifest.upsert("roads", "v1"), None);
        assert_eq!(manifest.upsert("forest", "v2"), Some("v1".to_string()));

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[0].name, "forest");
        assert_eq!(manifest.latest_version("forest"), Some("v2"));
        assert_eq!(manifest.latest_version("roads"), Some("v1"));
        assert_eq!(manifest.latest_version("water"), None);
    }

    #[test]
    fn test_upsert_collapses_duplicate_entries() {
        let mut manifest = LatestManifest::from_json(
            br#"[
                {"name": "forest", "latest_version": "v1"},
                {"name": "roads", "latest_version": "v4"},
                {"name": "forest", "latest_version": "v2"}
            ]"#,
        )
        .unwrap();

        assert_eq!(manifest.upsert("forest", "v3"), Some("v1".to_string()));

        assert_eq!(
            manifest.entries(),
            &[
                ManifestEntry {
                    name: "forest".to_string(),
                    latest_version: "v3".to_string(),
                },
                ManifestEntry {
                    name: "roads".to_string(),
                    latest_version: "v4".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_json_shape() {
        let mut manifest = LatestManifest::default();
        manifest.upsert("forest", "v1");
        assert_eq!(
            String::from_utf8(manifest.to_json().unwrap()).unwrap(),
            r#"[{"name":"forest","latest_version":"v1"}]"#
        );

        let body = br#"[{"name": "a", "latest_version": "v3", "extra": 1}]"#;
        let parsed = LatestManifest::from_json(body).unwrap();
        assert_eq!(parsed.latest_version("a"), Some("v3"));
        assert!(LatestManifest::from_json(b"{}").is_err());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_created() {
        let store = Arc::new(MemoryStore::new());

        let manifest = updater(&store).update("forest", "v1").await.unwrap();

        assert_eq!(manifest.len(), 1);
        assert_eq!(
            stored(&store),
            serde_json::json!([{"name": "forest", "latest_version": "v1"}])
        );
        let object = store.object("b", LATEST_KEY).unwrap();
        assert_eq!(object.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_existing_entry_updated_new_entry_appended() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", LATEST_KEY, r#"[{"name":"forest","latest_version":"v1"}]"#);

        updater(&store).update("forest", "v2").await.unwrap();
        assert_eq!(
            stored(&store),
            serde_json::json!([{"name": "forest", "latest_version": "v2"}])
        );

        updater(&store).update("roads", "v1").await.unwrap();
        assert_eq!(
            stored(&store),
            serde_json::json!([
                {"name": "forest", "latest_version": "v2"},
                {"name": "roads", "latest_version": "v1"}
            ])
        );
    }

    #[tokio::test]
    async fn test_duplicated_stored_manifest_is_written_back_deduplicated() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "b",
            LATEST_KEY,
            r#"[{"name":"forest","latest_version":"v1"},{"name":"forest","latest_version":"v2"}]"#,
        );

        updater(&store).update("forest", "v3").await.unwrap();

        assert_eq!(
            stored(&store),
            serde_json::json!([{"name": "forest", "latest_version": "v3"}])
        );
    }

    #[tokio::test]
    async fn test_fetch_error_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", LATEST_KEY, "[]");
        store.fail_gets(
            LATEST_KEY,
            1,
            StorageError::Request {
                bucket: "b".to_string(),
                key: LATEST_KEY.to_string(),
                message: "403 Access Denied".to_string(),
                retryable: false,
            },
        );

        let err = updater(&store).update("forest", "v1").await.unwrap_err();
        assert!(matches!(err, ManifestError::Fetch(_)));
        assert_eq!(store.object("b", LATEST_KEY).unwrap().body, b"[]");
    }

    #[tokio::test]
    async fn test_transient_fetch_error_is_retried() {
        let store = Arc::new(MemoryStore::new());
        store.fail_gets(
            LATEST_KEY,
            2,
            StorageError::Request {
                bucket: "b".to_string(),
                key: LATEST_KEY.to_string(),
                message: "connection reset".to_string(),
                retryable: true,
            },
        );

        let manifest = updater(&store).update("forest", "v1").await.unwrap();
        assert_eq!(manifest.latest_version("forest"), Some("v1"));
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", LATEST_KEY, "not json");

        let err = updater(&store).update("forest", "v1").await.unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
        assert_eq!(store.object("b", LATEST_KEY).unwrap().body, b"not json");
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_both_entries() {
        let store = Arc::new(MemoryStore::new());
        let first = updater(&store);
        let second = updater(&store);

        let (a, b) = tokio::join!(first.update("forest", "v1"), second.update("roads", "v7"));
        a.unwrap();
        b.unwrap();

        let body = store.object("b", LATEST_KEY).unwrap().body;
        let manifest = LatestManifest::from_json(&body).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.latest_version("forest"), Some("v1"));
        assert_eq!(manifest.latest_version("roads"), Some("v7"));
    }

    #[tokio::test]
    async fn test_persistent_conflict_gives_up() {
        let store = Arc::new(MemoryStore::new());
        store.fail_all_puts(
            LATEST_KEY,
            StorageError::PreconditionFailed {
                bucket: "b".to_string(),
                key: LATEST_KEY.to_string(),
            },
        );

        let err = updater(&store)
            .with_max_conflict_retries(2)
            .update("forest", "v1")
            .await
            .unwrap_err();

        assert!(matches!(err, ManifestError::Conflict { attempts: 3 }));
        assert_eq!(store.put_attempts(LATEST_KEY), 3);
    }

    #[tokio::test]
    async fn test_custom_key() {
        let store = Arc::new(MemoryStore::new());
        updater(&store)
            .with_key("manifests/latest.json")
            .update("forest", "v1")
            .await
            .unwrap();
        assert!(store.object("b", "manifests/latest.json").is_some());
        assert!(store.object("b", LATEST_KEY).is_none());
    }
}
