//! Minimal example: a creator publishes a clue, verifies it, and a player
//! reveals it by signing a decryption challenge.
//!
//! Run with: `cargo run --example clue_hunt_demo`
//!
//! Transitions are also written to a JSON-lines audit file for inspection.

use std::sync::Arc;

use cluevault::audit::FileAuditSink;
use cluevault::challenge::LocalEd25519Signer;
use cluevault::codec::PlaceholderCodec;
use cluevault::config::CatalogConfig;
use cluevault::gateway::MemoryOracle;
use cluevault::logging::init_logging;
use cluevault::record::Location;
use cluevault::Catalog;

const CONTRACT: &str = "0xC1ue000000000000000000000000000000000001";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup
    let config = CatalogConfig::from_env()?;
    init_logging(&config.logging)?;

    let oracle = Arc::new(MemoryOracle::new());
    let catalog = Catalog::new(oracle, Arc::new(PlaceholderCodec), config)?;

    let audit_path = std::env::temp_dir().join("cluevault_audit.jsonl");
    catalog.add_audit_sink(Box::new(FileAuditSink::open(&audit_path)?));

    // 2. A creator publishes a clue in Tokyo
    let creator = "0x5eC0000000000000000000000000000000c0FFEE";
    let id = catalog
        .create_record(creator, "Puzzle", Location::new(35.6895, 139.6917), 42.5)
        .await?;
    println!("Created clue {id}");

    // 3. The creator verifies it
    catalog.verify(&id, creator).await?;

    for record in catalog.list().await? {
        println!(
            "  {} [{}] {} @ ({:.4}, {:.4})",
            record.id, record.status, record.category, record.location.lat, record.location.lng
        );
    }

    // 4. A player signs the session challenge and reveals the value
    let session = catalog.new_session(CONTRACT, 11155111)?;
    let wallet = LocalEd25519Signer::generate()?;
    let record = catalog.get(&id).await?;
    let value = catalog.decrypt(&record.payload, &session, &wallet).await?;
    println!("Revealed value: {value}");

    // 5. Stats and audit
    let stats = catalog.stats().await?;
    println!(
        "Clues: {} total, {} verified, {} pending, {} rejected",
        stats.total, stats.verified, stats.pending, stats.rejected
    );
    println!("Audit written to: {}", audit_path.display());

    Ok(())
}
