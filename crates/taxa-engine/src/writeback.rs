//! Batched persistence of entity patches and synonym rows.
//!
//! Patches are written row by row inside each chunk so one bad row never
//! takes its chunk-mates down. Synonym chunks go out as single
//! insert-skip-conflicts calls through adaptive windows.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use taxa_core::{EngineConfig, EntityPatch, EntityStore, SynonymRecord, WriteReport};

use crate::coordinator::{retry_transient, run_windows, WorkPool};

/// Fold patches for the same entity together, dropping empty ones.
/// Entity order follows first appearance.
pub fn merge_patches(patches: Vec<EntityPatch>) -> Vec<EntityPatch> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut merged: HashMap<Uuid, EntityPatch> = HashMap::new();
    for patch in patches {
        match merged.get_mut(&patch.entity_id) {
            Some(existing) => existing.merge(patch),
            None => {
                order.push(patch.entity_id);
                merged.insert(patch.entity_id, patch);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| merged.remove(&id))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Drop blank names and repeats of the natural key, keeping first occurrences.
pub fn dedup_synonyms(synonyms: Vec<SynonymRecord>) -> Vec<SynonymRecord> {
    let mut seen = HashSet::new();
    synonyms
        .into_iter()
        .filter_map(|mut record| {
            record.name = record.name.trim().to_string();
            if record.name.is_empty() || !seen.insert(record.dedup_key()) {
                return None;
            }
            Some(record)
        })
        .collect()
}

/// Writes patches and synonyms through the work pool.
pub struct BatchWriteBack {
    store: Arc<dyn EntityStore>,
    config: Arc<EngineConfig>,
    pool: WorkPool,
}

impl BatchWriteBack {
    pub fn new(store: Arc<dyn EntityStore>, config: EngineConfig) -> Self {
        let pool = WorkPool::new(config.db_concurrency);
        Self {
            store,
            config: Arc::new(config),
            pool,
        }
    }

    pub async fn write(&self, patches: Vec<EntityPatch>, synonyms: Vec<SynonymRecord>) -> WriteReport {
        let start = Instant::now();
        let patches = merge_patches(patches);
        let synonyms = dedup_synonyms(synonyms);
        let (patch_count, synonym_count) = (patches.len(), synonyms.len());

        let mut report = self.write_patches(patches).await;
        report += self.write_synonyms(synonyms).await;

        info!(
            subsystem = "engine",
            component = "writeback",
            patches = patch_count,
            synonyms = synonym_count,
            entities_updated = report.entities_updated,
            synonyms_sent = report.synonyms_sent,
            items_dropped = report.items_dropped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Write-back complete"
        );
        report
    }

    async fn write_patches(&self, patches: Vec<EntityPatch>) -> WriteReport {
        let units = chunked(patches, self.config.update_chunk);
        let config = self.config.clone();
        self.pool
            .run(&self.store, units, move |store, chunk| {
                write_patch_chunk(store, config.clone(), chunk)
            })
            .await
            .into_iter()
            .fold(WriteReport::default(), |mut total, r| {
                total += r;
                total
            })
    }

    async fn write_synonyms(&self, synonyms: Vec<SynonymRecord>) -> WriteReport {
        let units = chunked(synonyms, self.config.upsert_chunk);
        let config = self.config.clone();
        self.pool
            .run(&self.store, units, move |store, chunk| {
                write_synonym_chunk(store, config.clone(), chunk)
            })
            .await
            .into_iter()
            .fold(WriteReport::default(), |mut total, r| {
                total += r;
                total
            })
    }
}

async fn write_patch_chunk(
    store: Arc<dyn EntityStore>,
    config: Arc<EngineConfig>,
    chunk: Vec<EntityPatch>,
) -> WriteReport {
    let mut report = WriteReport::default();
    let store = store.as_ref();
    for patch in &chunk {
        match retry_transient(&config, "update_entity", || store.update_entity(patch)).await {
            Ok(true) => report.entities_updated += 1,
            Ok(false) => debug!(
                subsystem = "engine",
                component = "writeback",
                entity_id = %patch.entity_id,
                "No row matched patch"
            ),
            Err(e) => {
                warn!(
                    subsystem = "engine",
                    component = "writeback",
                    entity_id = %patch.entity_id,
                    display_name = ?patch.display_name,
                    external_key = ?patch.external_key,
                    error = %e,
                    "Entity update failed"
                );
                report.items_dropped += 1;
            }
        }
    }
    report
}

async fn write_synonym_chunk(
    store: Arc<dyn EntityStore>,
    config: Arc<EngineConfig>,
    chunk: Vec<SynonymRecord>,
) -> WriteReport {
    let store = store.as_ref();
    let out = run_windows(&chunk, chunk.len(), &config, "insert_synonyms", move |window| {
        store.insert_synonyms(window)
    })
    .await;
    WriteReport {
        entities_updated: 0,
        synonyms_sent: out.completed,
        items_dropped: out.dropped,
    }
}

/// Scientific synonyms for `ids`, read in adaptive `IN`-list windows.
/// Windows that cannot be read contribute nothing.
pub async fn read_scientific_synonyms(
    store: &Arc<dyn EntityStore>,
    ids: &[Uuid],
    config: &EngineConfig,
) -> HashMap<Uuid, Vec<String>> {
    let units = chunked(ids.to_vec(), config.in_list_max);
    let shared = Arc::new(config.clone());
    let pairs = WorkPool::new(config.db_concurrency)
        .run(store, units, move |store, chunk| {
            read_synonym_chunk(store, shared.clone(), chunk)
        })
        .await;

    let mut by_entity: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (entity_id, name) in pairs.into_iter().flatten() {
        by_entity.entry(entity_id).or_default().push(name);
    }
    by_entity
}

async fn read_synonym_chunk(
    store: Arc<dyn EntityStore>,
    config: Arc<EngineConfig>,
    chunk: Vec<Uuid>,
) -> Vec<(Uuid, String)> {
    let store = store.as_ref();
    run_windows(&chunk, chunk.len(), &config, "scientific_synonyms", move |window| {
        store.scientific_synonyms(window)
    })
    .await
    .values
    .into_iter()
    .flatten()
    .collect()
}

pub(crate) fn chunked<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut out = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            out.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
