//! Record entries on top of the gateway and the index.
//!
//! Create order is fixed: the entry is written first, then its id is
//! appended to the index. A create interrupted between the two leaves an
//! entry that no listing ever surfaces, never an index pointing at nothing.

use std::sync::Arc;

use crate::clock::Clock;
use crate::codec::EncryptedPayload;
use crate::error::{CluevaultError, Result};
use crate::gateway::Gateway;
use crate::index::IndexManager;
use crate::lifecycle::{self, Transition};
use crate::record::{self, generate_record_id, Location, Record, RecordId, RecordStatus};

/// Input to [`RecordStore::create`].
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub owner: String,
    pub category: String,
    pub location: Location,
    pub payload: EncryptedPayload,
}

/// Counts of listed records by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub total: usize,
    pub pending: usize,
    pub verified: usize,
    pub rejected: usize,
}

impl CatalogStats {
    fn tally<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            match record.status {
                RecordStatus::Pending => stats.pending += 1,
                RecordStatus::Verified => stats.verified += 1,
                RecordStatus::Rejected => stats.rejected += 1,
            }
        }
        stats
    }
}

#[derive(Clone)]
pub struct RecordStore {
    gateway: Gateway,
    index: IndexManager,
    record_key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl RecordStore {
    /// Store entries under `record_key_prefix` + id, indexed by `index`.
    pub fn new(
        gateway: Gateway,
        index: IndexManager,
        record_key_prefix: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            index,
            record_key_prefix: record_key_prefix.into(),
            clock,
        }
    }

    /// The index this store appends to.
    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}{}", self.record_key_prefix, id)
    }

    /// Validate, write the entry, then append its id to the index.
    pub async fn create(&self, new: NewRecord) -> Result<RecordId> {
        if new.category.trim().is_empty() {
            return Err(CluevaultError::Validation("category must not be empty".into()));
        }
        if new.owner.trim().is_empty() {
            return Err(CluevaultError::Validation("owner must not be empty".into()));
        }
        new.location.validate()?;

        let now = self.clock.now();
        let id = generate_record_id(now.timestamp_millis())?;
        let record = Record {
            id: id.clone(),
            payload: new.payload,
            created_at: now.timestamp(),
            owner: new.owner,
            category: new.category,
            status: RecordStatus::Pending,
            location: new.location,
        };

        self.gateway.set(&self.record_key(&id), record.to_wire()?).await?;

        if let Err(e) = self.index.append(&id).await {
            tracing::warn!(record_id = %id, error = %e, "entry written but not indexed");
            return Err(e);
        }

        tracing::info!(record_id = %id, category = %record.category, "record created");
        Ok(id)
    }

    /// Fetch one record by id.
    pub async fn get(&self, id: &str) -> Result<Record> {
        let bytes = self.read_entry(id).await?;
        Record::from_wire(id, &bytes)
    }

    /// Every indexed record that reads back cleanly, newest first.
    ///
    /// Missing and malformed entries are logged and skipped. Fails with
    /// `Unavailable` rather than returning an empty list when the oracle is
    /// down.
    pub async fn list(&self) -> Result<Vec<Record>> {
        if !self.gateway.is_available().await {
            return Err(CluevaultError::Unavailable(
                "oracle reports unavailable".into(),
            ));
        }

        let ids = self.index.list_ids().await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.get(id).await {
                Ok(record) => records.push(record),
                Err(CluevaultError::NotFound(_)) => {
                    tracing::warn!(record_id = %id, "indexed record has no entry, skipping");
                }
                Err(CluevaultError::CorruptRecord { reason, .. }) => {
                    tracing::warn!(record_id = %id, %reason, "corrupt record, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Listed records currently in `status`.
    pub async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<Record>> {
        let mut records = self.list().await?;
        records.retain(|r| r.status == status);
        Ok(records)
    }

    /// Tally of listed records by status.
    pub async fn stats(&self) -> Result<CatalogStats> {
        Ok(CatalogStats::tally(&self.list().await?))
    }

    /// Move a record to `new_status` on behalf of `actor`.
    ///
    /// Authorization and transition legality are decided by
    /// [`lifecycle::authorize`]. Only the `status` field of the stored entry
    /// is rewritten.
    pub async fn update_status(
        &self,
        id: &str,
        new_status: RecordStatus,
        actor: &str,
    ) -> Result<Transition> {
        let bytes = self.read_entry(id).await?;
        let current = Record::from_wire(id, &bytes)?;
        let transition = lifecycle::authorize(&current, actor, new_status)?;

        let rewritten = record::rewrite_status(id, &bytes, new_status)?;
        self.gateway.set(&self.record_key(id), rewritten).await?;
        Ok(transition)
    }

    async fn read_entry(&self, id: &str) -> Result<Vec<u8>> {
        self.gateway
            .get(&self.record_key(id))
            .await?
            .ok_or_else(|| CluevaultError::NotFound(id.to_string()))
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("index", &self.index)
            .field("record_key_prefix", &self.record_key_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::{PayloadCodec, PlaceholderCodec};
    use crate::gateway::{KeyValueOracle, MemoryOracle};

    fn store(oracle: Arc<MemoryOracle>, clock: Arc<ManualClock>) -> RecordStore {
        let gateway = Gateway::new(oracle, Duration::from_secs(5));
        let index = IndexManager::new(gateway.clone(), "record_keys", 3);
        RecordStore::new(gateway, index, "record_", clock)
    }

    fn new_record(category: &str, lat: f64, lng: f64) -> NewRecord {
        NewRecord {
            owner: "0xOwner".into(),
            category: category.into(),
            location: Location::new(lat, lng),
            payload: PlaceholderCodec.encode(1.0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_entry_written_before_index() {
        let oracle = Arc::new(MemoryOracle::new());
        let store = store(oracle.clone(), Arc::new(ManualClock::at_secs(1_000)));

        let id = store.create(new_record("Puzzle", 1.0, 2.0)).await.unwrap();
        assert_eq!(oracle.write_count(), 2);

        let raw = oracle.get(&format!("record_{}", id)).await.unwrap();
        let entry: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(entry["status"], "pending");
        assert_eq!(entry["timestamp"], 1_000);
        assert_eq!(entry["owner"], "0xOwner");
        assert_eq!(entry["location"]["lat"], 1.0);
    }

    #[tokio::test]
    async fn test_validation_writes_nothing() {
        let oracle = Arc::new(MemoryOracle::new());
        let store = store(oracle.clone(), Arc::new(ManualClock::at_secs(1)));

        assert!(matches!(
            store.create(new_record("", 1.0, 2.0)).await,
            Err(CluevaultError::Validation(_))
        ));
        assert!(matches!(
            store.create(new_record("Puzzle", 0.0, 0.0)).await,
            Err(CluevaultError::Validation(_))
        ));
        assert_eq!(oracle.write_count(), 0);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let clock = Arc::new(ManualClock::at_secs(100));
        let store = store(Arc::new(MemoryOracle::new()), clock.clone());

        let first = store.create(new_record("A", 1.0, 1.0)).await.unwrap();
        clock.advance_secs(10);
        let second = store.create(new_record("B", 1.0, 1.0)).await.unwrap();
        clock.advance_secs(10);
        let third = store.create(new_record("C", 1.0, 1.0)).await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third, second, first]);
    }

    #[tokio::test]
    async fn test_unindexed_entry_is_invisible() {
        let oracle = Arc::new(MemoryOracle::new());
        let store = store(oracle.clone(), Arc::new(ManualClock::at_secs(5)));
        let listed = store.create(new_record("Seen", 1.0, 1.0)).await.unwrap();

        oracle
            .set(
                "record_orphan",
                br#"{"data":"FHE-MQ==","timestamp":9,"owner":"0xA","category":"Hidden","status":"pending","location":{"lat":1,"lng":1}}"#.to_vec(),
            )
            .await
            .unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, listed);
    }

    /// Refuses writes to the index key only.
    struct IndexWriteRefused(MemoryOracle);

    #[async_trait::async_trait]
    impl KeyValueOracle for IndexWriteRefused {
        async fn get(&self, key: &str) -> Result<Vec<u8>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
            if key == "record_keys" {
                return Err(CluevaultError::Write {
                    key: key.to_string(),
                    reason: "refused".into(),
                });
            }
            self.0.set(key, value).await
        }
        async fn is_available(&self) -> Result<bool> {
            self.0.is_available().await
        }
    }

    #[tokio::test]
    async fn test_index_failure_leaves_unlisted_entry() {
        let oracle = Arc::new(IndexWriteRefused(MemoryOracle::new()));
        let gateway = Gateway::new(oracle.clone(), Duration::from_secs(5));
        let index = IndexManager::new(gateway.clone(), "record_keys", 3);
        let store = RecordStore::new(gateway, index, "record_", Arc::new(ManualClock::at_secs(5)));

        let err = store.create(new_record("Lost", 1.0, 1.0)).await.unwrap_err();
        assert!(matches!(err, CluevaultError::Write { .. }));

        // The entry landed, the index did not.
        assert_eq!(oracle.0.write_count(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_oracle_short_circuits_list() {
        let oracle = Arc::new(MemoryOracle::new());
        let store = store(oracle.clone(), Arc::new(ManualClock::at_secs(5)));
        store.create(new_record("A", 1.0, 1.0)).await.unwrap();

        oracle.set_available(false);
        assert!(matches!(
            store.list().await,
            Err(CluevaultError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_and_status_filter() {
        let store = store(Arc::new(MemoryOracle::new()), Arc::new(ManualClock::at_secs(5)));
        let a = store.create(new_record("A", 1.0, 1.0)).await.unwrap();
        let b = store.create(new_record("B", 1.0, 1.0)).await.unwrap();
        store.create(new_record("C", 1.0, 1.0)).await.unwrap();

        store
            .update_status(&a, RecordStatus::Verified, "0xowner")
            .await
            .unwrap();
        store
            .update_status(&b, RecordStatus::Rejected, "0xOWNER")
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            CatalogStats {
                total: 3,
                pending: 1,
                verified: 1,
                rejected: 1
            }
        );
        let verified = store.list_by_status(RecordStatus::Verified).await.unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].id, a);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = store(Arc::new(MemoryOracle::new()), Arc::new(ManualClock::at_secs(5)));
        assert!(matches!(
            store.get("nope").await,
            Err(CluevaultError::NotFound(id)) if id == "nope"
        ));
    }
}
