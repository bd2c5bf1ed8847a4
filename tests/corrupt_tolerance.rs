//! Listing degrades around bad entries instead of failing.

use std::sync::Arc;

use cluevault::codec::PlaceholderCodec;
use cluevault::config::CatalogConfig;
use cluevault::gateway::{KeyValueOracle, MemoryOracle};
use cluevault::record::Location;
use cluevault::{Catalog, CluevaultError};

async fn seeded(n: usize) -> (Catalog, Arc<MemoryOracle>, Vec<String>) {
    let oracle = Arc::new(MemoryOracle::new());
    let catalog = Catalog::new(
        oracle.clone(),
        Arc::new(PlaceholderCodec),
        CatalogConfig::default(),
    )
    .unwrap();

    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        ids.push(
            catalog
                .create_record("0xA", "Lore", Location::new(5.0, 5.0 + i as f64), i as f64)
                .await
                .unwrap(),
        );
    }
    (catalog, oracle, ids)
}

#[tokio::test]
async fn test_malformed_entry_is_skipped() {
    let (catalog, oracle, ids) = seeded(5).await;
    oracle
        .set(&format!("record_{}", ids[2]), b"{\"data\": \"FHE-".to_vec())
        .await
        .unwrap();

    let listed = catalog.list().await.unwrap();
    assert_eq!(listed.len(), 4);
    assert!(listed.iter().all(|r| r.id != ids[2]));

    assert!(matches!(
        catalog.get(&ids[2]).await,
        Err(CluevaultError::CorruptRecord { .. })
    ));
}

#[tokio::test]
async fn test_wrong_shape_is_skipped() {
    let (catalog, oracle, ids) = seeded(3).await;
    oracle
        .set(&format!("record_{}", ids[0]), br#"{"unexpected": true}"#.to_vec())
        .await
        .unwrap();
    oracle
        .set(
            &format!("record_{}", ids[1]),
            br#"{"data":"FHE-MQ==","timestamp":1,"owner":"0xA","category":"Lore","status":"archived"}"#.to_vec(),
        )
        .await
        .unwrap();

    let listed = catalog.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, ids[2]);
}

#[tokio::test]
async fn test_indexed_id_without_entry_is_skipped() {
    let (catalog, oracle, ids) = seeded(2).await;
    let mut index = ids.clone();
    index.insert(1, "0-ghost".to_string());
    oracle
        .set("record_keys", serde_json::to_vec(&index).unwrap())
        .await
        .unwrap();

    assert_eq!(catalog.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_corrupt_index_lists_nothing() {
    let (catalog, oracle, _) = seeded(2).await;
    oracle.set("record_keys", b"[\"oops".to_vec()).await.unwrap();
    assert!(catalog.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_oracle_is_not_an_empty_catalog() {
    let (catalog, oracle, _) = seeded(2).await;
    oracle.set_available(false);
    assert!(matches!(
        catalog.list().await,
        Err(CluevaultError::Unavailable(_))
    ));
    oracle.set_available(true);
    assert_eq!(catalog.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_foreign_index_element_keeps_live_ids() {
    let (catalog, oracle, ids) = seeded(2).await;
    let mut index: Vec<serde_json::Value> = ids.iter().map(|id| id.as_str().into()).collect();
    index.push(7.into());
    oracle
        .set("record_keys", serde_json::to_vec(&index).unwrap())
        .await
        .unwrap();

    assert_eq!(catalog.list().await.unwrap().len(), 2);

    let added = catalog
        .create_record("0xA", "Lore", Location::new(9.0, 9.0), 3.0)
        .await
        .unwrap();
    let listed: Vec<String> = catalog.list().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(listed.len(), 3);
    assert!(listed.contains(&added));
    assert!(ids.iter().all(|id| listed.contains(id)));
}
