use std::sync::{Arc, Mutex};

use cluevault::audit::{AuditRecord, AuditSink, FileAuditSink};
use cluevault::codec::PlaceholderCodec;
use cluevault::config::CatalogConfig;
use cluevault::gateway::{KeyValueOracle, MemoryOracle};
use cluevault::record::{Location, RecordStatus};
use cluevault::{Catalog, CluevaultError};

const OWNER: &str = "0xA11CE0000000000000000000000000000000BEEF";

async fn catalog_with_record() -> (Catalog, Arc<MemoryOracle>, String) {
    let oracle = Arc::new(MemoryOracle::new());
    let catalog = Catalog::new(
        oracle.clone(),
        Arc::new(PlaceholderCodec),
        CatalogConfig::default(),
    )
    .unwrap();
    let id = catalog
        .create_record(OWNER, "Puzzle", Location::new(35.68, 139.69), 42.5)
        .await
        .unwrap();
    (catalog, oracle, id)
}

#[tokio::test]
async fn test_verify_twice_is_illegal() {
    let (catalog, _, id) = catalog_with_record().await;

    catalog.verify(&id, OWNER).await.unwrap();
    let err = catalog.verify(&id, OWNER).await.unwrap_err();
    assert!(matches!(
        err,
        CluevaultError::IllegalTransition {
            from: RecordStatus::Verified,
            to: RecordStatus::Verified,
            ..
        }
    ));
}

#[tokio::test]
async fn test_reject_after_verify_is_illegal() {
    let (catalog, _, id) = catalog_with_record().await;

    catalog.verify(&id, OWNER).await.unwrap();
    assert!(matches!(
        catalog.reject(&id, OWNER).await,
        Err(CluevaultError::IllegalTransition { .. })
    ));
    assert_eq!(catalog.get(&id).await.unwrap().status, RecordStatus::Verified);
}

#[tokio::test]
async fn test_non_owner_cannot_verify() {
    let (catalog, _, id) = catalog_with_record().await;

    assert!(matches!(
        catalog.verify(&id, "0xB0B").await,
        Err(CluevaultError::Unauthorized { .. })
    ));
    assert_eq!(catalog.get(&id).await.unwrap().status, RecordStatus::Pending);
    assert!(catalog.audit_log().is_empty());
}

#[tokio::test]
async fn test_owner_identity_is_case_insensitive() {
    let (catalog, _, id) = catalog_with_record().await;
    let t = catalog.reject(&id, &OWNER.to_lowercase()).await.unwrap();
    assert_eq!(t.to, RecordStatus::Rejected);
}

#[tokio::test]
async fn test_unknown_record_is_not_found() {
    let (catalog, _, _) = catalog_with_record().await;
    assert!(matches!(
        catalog.verify("0-missing", OWNER).await,
        Err(CluevaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_only_status_is_rewritten() {
    let (catalog, oracle, id) = catalog_with_record().await;
    let key = format!("record_{}", id);
    let before = String::from_utf8(oracle.get(&key).await.unwrap()).unwrap();

    catalog.verify(&id, OWNER).await.unwrap();
    let after = String::from_utf8(oracle.get(&key).await.unwrap()).unwrap();

    assert_eq!(after, before.replace("\"pending\"", "\"verified\""));
}

#[tokio::test]
async fn test_failed_write_leaves_status_unchanged() {
    let (catalog, oracle, id) = catalog_with_record().await;

    oracle.fail_writes(true);
    assert!(matches!(
        catalog.verify(&id, OWNER).await,
        Err(CluevaultError::Write { .. })
    ));
    oracle.fail_writes(false);

    assert_eq!(catalog.get(&id).await.unwrap().status, RecordStatus::Pending);
    assert!(catalog.audit_log().is_empty());
    catalog.verify(&id, OWNER).await.unwrap();
}

#[tokio::test]
async fn test_legacy_record_without_status_reads_pending_and_is_not_rewritten() {
    let (catalog, oracle, _) = catalog_with_record().await;

    let legacy = br#"{"data":"FHE-Nw==","timestamp":1,"owner":"0xOld","category":"Lore","location":{"lat":1.5,"lng":2.5}}"#;
    oracle.set("record_1-legacy", legacy.to_vec()).await.unwrap();
    let mut ids: Vec<String> =
        serde_json::from_slice(&oracle.get("record_keys").await.unwrap()).unwrap();
    ids.push("1-legacy".into());
    oracle
        .set("record_keys", serde_json::to_vec(&ids).unwrap())
        .await
        .unwrap();

    let listed = catalog.list().await.unwrap();
    let record = listed.iter().find(|r| r.id == "1-legacy").unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
    assert_eq!(
        oracle.get("record_1-legacy").await.unwrap(),
        legacy.to_vec()
    );

    catalog.verify("1-legacy", "0xold").await.unwrap();
    assert_eq!(
        catalog.get("1-legacy").await.unwrap().status,
        RecordStatus::Verified
    );
}

struct SharedVecSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl AuditSink for SharedVecSink {
    fn record(&mut self, entry: &AuditRecord) {
        self.records.lock().unwrap().push(entry.clone());
    }
}

#[tokio::test]
async fn test_transitions_are_audited() {
    let (catalog, _, id) = catalog_with_record().await;
    let records = Arc::new(Mutex::new(Vec::new()));
    catalog.add_audit_sink(Box::new(SharedVecSink {
        records: Arc::clone(&records),
    }));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transitions.jsonl");
    catalog.add_audit_sink(Box::new(FileAuditSink::open(&path).unwrap()));

    catalog.verify(&id, OWNER).await.unwrap();
    let _ = catalog.reject(&id, OWNER).await;

    let log = catalog.audit_log();
    assert_eq!(log.len(), 1);
    let entry = &log.entries()[0];
    assert_eq!(entry.record_id, id);
    assert_eq!(entry.actor, OWNER);
    assert_eq!(entry.from, RecordStatus::Pending);
    assert_eq!(entry.to, RecordStatus::Verified);

    assert_eq!(records.lock().unwrap().len(), 1);
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written.lines().count(), 1);
}
