//! Seeding entities and scientific synonyms from a World Flora Online bundle.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use taxa_core::{EngineConfig, EntityStore, Error, Result, SynonymRecord, WriteReport};
use taxa_dump::{read_bundle, WfoSeed};

use crate::coordinator::{run_windows, WorkPool};
use crate::writeback::{chunked, BatchWriteBack};

/// Totals for one seeding run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Distinct accepted scientific names read from the bundle.
    pub accepted: usize,
    /// Entities newly inserted (existing names are skipped).
    pub inserted: u64,
    /// Accepted names whose entity id was found after insert.
    pub resolved: usize,
    /// Synonym pairs with no entity to attach to.
    pub orphan_synonyms: usize,
    /// Names given up on while inserting or resolving ids.
    pub names_dropped: usize,
    pub writes: WriteReport,
}

/// Insert accepted names as entities and attach their scientific synonyms.
pub async fn seed_from_bundle(
    store: Arc<dyn EntityStore>,
    config: &EngineConfig,
    dir: &Path,
    limit: Option<usize>,
) -> Result<SeedReport> {
    store
        .ping()
        .await
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
    let start = Instant::now();
    let seed = load_bundle(dir.to_path_buf(), limit).await?;
    let report = seed_entities(store, config, seed).await;

    info!(
        subsystem = "engine",
        component = "seed",
        accepted = report.accepted,
        inserted = report.inserted,
        resolved = report.resolved,
        synonyms_sent = report.writes.synonyms_sent,
        orphan_synonyms = report.orphan_synonyms,
        dropped = report.names_dropped + report.writes.items_dropped,
        duration_ms = start.elapsed().as_millis() as u64,
        "Seeding complete"
    );
    Ok(report)
}

async fn load_bundle(dir: PathBuf, limit: Option<usize>) -> Result<WfoSeed> {
    tokio::task::spawn_blocking(move || read_bundle(&dir, limit))
        .await
        .map_err(|e| Error::Internal(format!("bundle reader panicked: {}", e)))?
}

/// Write an already-read bundle to the store.
pub async fn seed_entities(store: Arc<dyn EntityStore>, config: &EngineConfig, seed: WfoSeed) -> SeedReport {
    let mut report = SeedReport::default();
    let mut seen = HashSet::new();
    let names: Vec<String> = seed
        .accepted
        .into_iter()
        .map(|t| t.scientific_name.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(n.clone()))
        .collect();
    report.accepted = names.len();

    let pool = WorkPool::new(config.db_concurrency);
    let shared = Arc::new(config.clone());

    let inserts = {
        let config = shared.clone();
        pool.run(&store, chunked(names.clone(), config.upsert_chunk), move |store, chunk| {
            insert_chunk(store, config.clone(), chunk)
        })
        .await
    };
    for (inserted, dropped) in inserts {
        report.inserted += inserted;
        report.names_dropped += dropped;
    }

    let lookups = {
        let config = shared.clone();
        pool.run(&store, chunked(names, config.in_list_max), move |store, chunk| {
            resolve_chunk(store, config.clone(), chunk)
        })
        .await
    };
    let mut ids: HashMap<String, Uuid> = HashMap::new();
    for (pairs, dropped) in lookups {
        report.names_dropped += dropped;
        ids.extend(pairs);
    }
    report.resolved = ids.len();

    let mut synonyms = Vec::with_capacity(seed.synonyms.len());
    for (accepted, synonym) in seed.synonyms {
        match ids.get(accepted.trim()) {
            Some(id) if !synonym.trim().eq_ignore_ascii_case(accepted.trim()) => {
                synonyms.push(SynonymRecord::scientific(*id, synonym.trim()));
            }
            Some(_) => {}
            None => report.orphan_synonyms += 1,
        }
    }
    if report.orphan_synonyms > 0 {
        warn!(
            subsystem = "engine",
            component = "seed",
            orphan_synonyms = report.orphan_synonyms,
            "Synonyms skipped: accepted name has no entity"
        );
    }

    report.writes = BatchWriteBack::new(store, config.clone())
        .write(Vec::new(), synonyms)
        .await;
    report
}

async fn insert_chunk(store: Arc<dyn EntityStore>, config: Arc<EngineConfig>, chunk: Vec<String>) -> (u64, usize) {
    let store = store.as_ref();
    let out = run_windows(&chunk, chunk.len(), &config, "insert_entities", move |window| {
        store.insert_entities(window)
    })
    .await;
    (out.values.into_iter().sum(), out.dropped)
}

async fn resolve_chunk(
    store: Arc<dyn EntityStore>,
    config: Arc<EngineConfig>,
    chunk: Vec<String>,
) -> (Vec<(String, Uuid)>, usize) {
    let store = store.as_ref();
    let out = run_windows(&chunk, chunk.len(), &config, "ids_by_scientific", move |window| {
        store.ids_by_scientific(window)
    })
    .await;
    (out.values.into_iter().flatten().collect(), out.dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taxa_core::{Entity, NameKind};
    use taxa_dump::AcceptedTaxon;

    use crate::testing::MemoryStore;

    fn seed(accepted: &[&str], synonyms: &[(&str, &str)]) -> WfoSeed {
        WfoSeed {
            accepted: accepted
                .iter()
                .enumerate()
                .map(|(i, name)| AcceptedTaxon {
                    taxon_id: format!("wfo-{i}"),
                    scientific_name: name.to_string(),
                })
                .collect(),
            synonyms: synonyms
                .iter()
                .map(|(a, s)| (a.to_string(), s.to_string()))
                .collect(),
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default().with_backoff(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_seed_inserts_and_links_synonyms() {
        let existing = Entity::new(Uuid::new_v4(), "Rosa canina", "Dog rose");
        let store = MemoryStore::new().with_entity(existing.clone());

        let report = seed_entities(
            Arc::new(store.clone()),
            &config(),
            seed(
                &["Rosa canina", "Quercus robur", "Quercus robur", " "],
                &[
                    ("Rosa canina", "Rosa lutetiana"),
                    ("Quercus robur", "Quercus pedunculata"),
                    ("Quercus robur", "quercus robur"),
                    ("Bellis perennis", "Bellis hortensis"),
                ],
            ),
        )
        .await;

        assert_eq!(report.accepted, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.resolved, 2);
        assert_eq!(report.orphan_synonyms, 1);
        assert_eq!(report.writes.synonyms_sent, 2);

        // existing display untouched
        assert_eq!(store.entity(existing.id).unwrap().display_name, "Dog rose");
        let oak = store
            .entities()
            .into_iter()
            .find(|e| e.scientific_name == "Quercus robur")
            .unwrap();
        assert_eq!(oak.display_name, "Quercus robur");
        let oak_synonyms = store.synonyms_for(oak.id, NameKind::Scientific);
        assert_eq!(oak_synonyms.len(), 1);
        assert_eq!(oak_synonyms[0].name, "Quercus pedunculata");
    }

    #[tokio::test]
    async fn test_seed_shrinks_oversized_inserts() {
        let names: Vec<String> = (0..40).map(|i| format!("Rosa s{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let store = MemoryStore::new().with_max_batch(9);

        let report = seed_entities(Arc::new(store.clone()), &config(), seed(&refs, &[])).await;
        assert_eq!(report.inserted, 40);
        assert_eq!(report.resolved, 40);
        assert_eq!(report.names_dropped, 0);
        assert_eq!(store.entities().len(), 40);
    }

    #[tokio::test]
    async fn test_seed_requires_reachable_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new().with_unavailable());
        let err = seed_from_bundle(store, &config(), dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_seed_missing_bundle_file() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        let err = seed_from_bundle(store, &config(), dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
