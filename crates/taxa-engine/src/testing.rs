//! In-memory store and naming source for exercising the engine without
//! PostgreSQL or network access.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use taxa_engine::testing::{MemoryStore, StaticSource};
//!
//! let store = MemoryStore::new()
//!     .with_entity(Entity::new(id, "Rosa canina", ""))
//!     .with_max_batch(30);
//! let source = StaticSource::new("test")
//!     .with_name("Rosa canina", vec![NameCandidate::new("Dog rose", "test")]);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use taxa_core::{
    Entity, EntityPatch, EntityStore, Error, NameCandidate, NameKind, NameMatch, NameSource,
    Result, SourceRecord, SynonymKey, SynonymRecord, Taxonomy,
};

// =============================================================================
// MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct StoreState {
    entities: BTreeMap<Uuid, Entity>,
    taxonomy: HashMap<Uuid, Taxonomy>,
    synonyms: Vec<SynonymRecord>,
    synonym_keys: HashSet<SynonymKey>,

    max_batch: Option<usize>,
    poison: HashSet<String>,
    failing_rows: HashSet<Uuid>,
    unavailable: bool,
    transient_failures: usize,

    worker_handles: usize,
    insert_batches: Vec<usize>,
    update_calls: usize,
}

impl StoreState {
    /// Simulated limits shared by every bulk primitive.
    fn check_batch(&mut self, len: usize, names: &[&str]) -> Result<()> {
        if self.unavailable {
            return Err(Error::StoreUnavailable("memory store offline".into()));
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(Error::Transient("simulated timeout".into()));
        }
        if self.max_batch.is_some_and(|max| len > max) {
            return Err(Error::PayloadTooLarge(format!("{} rows", len)));
        }
        if names
            .iter()
            .any(|n| self.poison.contains(&n.trim().to_lowercase()))
        {
            return Err(Error::PayloadTooLarge("poisoned row".into()));
        }
        Ok(())
    }
}

/// `EntityStore` over shared in-memory state.
///
/// Clones and worker handles all see the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(self, entity: Entity) -> Self {
        self.state
            .lock()
            .unwrap()
            .entities
            .insert(entity.id, entity);
        self
    }

    pub fn with_entities(self, entities: impl IntoIterator<Item = Entity>) -> Self {
        entities.into_iter().fold(self, Self::with_entity)
    }

    /// Seed a scientific synonym directly, bypassing the failure knobs.
    pub fn with_synonym(self, entity_id: Uuid, name: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let record = SynonymRecord::scientific(entity_id, name);
            if state.synonym_keys.insert(record.dedup_key()) {
                state.synonyms.push(record);
            }
        }
        self
    }

    /// Bulk calls carrying more than `max` items fail as payload-too-large.
    pub fn with_max_batch(self, max: usize) -> Self {
        self.state.lock().unwrap().max_batch = Some(max);
        self
    }

    /// Any bulk call carrying one of these names fails as payload-too-large,
    /// even alone.
    pub fn with_poison_names<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state
            .lock()
            .unwrap()
            .poison
            .extend(names.into_iter().map(|n| n.as_ref().trim().to_lowercase()));
        self
    }

    /// Updates to these rows always fail.
    pub fn with_failing_rows(self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.state.lock().unwrap().failing_rows.extend(ids);
        self
    }

    /// The next `count` bulk calls fail transiently.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.state.lock().unwrap().transient_failures = count;
        self
    }

    pub fn with_unavailable(self) -> Self {
        self.state.lock().unwrap().unavailable = true;
        self
    }

    pub fn entity(&self, id: Uuid) -> Option<Entity> {
        self.state.lock().unwrap().entities.get(&id).cloned()
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.state.lock().unwrap().entities.values().cloned().collect()
    }

    pub fn taxonomy(&self, id: Uuid) -> Option<Taxonomy> {
        self.state.lock().unwrap().taxonomy.get(&id).cloned()
    }

    pub fn synonyms(&self) -> Vec<SynonymRecord> {
        self.state.lock().unwrap().synonyms.clone()
    }

    pub fn synonyms_for(&self, entity_id: Uuid, kind: NameKind) -> Vec<SynonymRecord> {
        self.state
            .lock()
            .unwrap()
            .synonyms
            .iter()
            .filter(|s| s.entity_id == entity_id && s.kind == kind)
            .cloned()
            .collect()
    }

    /// Sizes of successful synonym inserts, in call order.
    pub fn insert_batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().insert_batches.clone()
    }

    pub fn update_calls(&self) -> usize {
        self.state.lock().unwrap().update_calls
    }

    pub fn worker_handles(&self) -> usize {
        self.state.lock().unwrap().worker_handles
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        if self.state.lock().unwrap().unavailable {
            return Err(Error::StoreUnavailable("memory store offline".into()));
        }
        Ok(())
    }

    async fn fetch_page(&self, offset: i64, limit: i64) -> Result<Vec<Entity>> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(Error::StoreUnavailable("memory store offline".into()));
        }
        Ok(state
            .entities
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn update_entity(&self, patch: &EntityPatch) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.update_calls += 1;
        if state.failing_rows.contains(&patch.entity_id) {
            return Err(Error::Internal(format!("row {} rejected", patch.entity_id)));
        }
        let Some(entity) = state.entities.get_mut(&patch.entity_id) else {
            return Ok(false);
        };
        if let Some(display) = &patch.display_name {
            entity.display_name = display.clone();
        }
        if let Some(key) = patch.external_key {
            entity.external_key = Some(key);
        }
        if let Some(taxonomy) = patch.taxonomy.clone() {
            state.taxonomy.insert(patch.entity_id, taxonomy);
        }
        Ok(true)
    }

    async fn insert_synonyms(&self, rows: &[SynonymRecord]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        state.check_batch(rows.len(), &names)?;
        for row in rows {
            if state.synonym_keys.insert(row.dedup_key()) {
                state.synonyms.push(row.clone());
            }
        }
        state.insert_batches.push(rows.len());
        Ok(rows.len() as u64)
    }

    async fn scientific_synonyms(&self, entity_ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        let mut state = self.state.lock().unwrap();
        state.check_batch(entity_ids.len(), &[])?;
        let wanted: HashSet<&Uuid> = entity_ids.iter().collect();
        Ok(state
            .synonyms
            .iter()
            .filter(|s| s.kind == NameKind::Scientific && wanted.contains(&s.entity_id))
            .map(|s| (s.entity_id, s.name.clone()))
            .collect())
    }

    async fn insert_entities(&self, scientific_names: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let names: Vec<&str> = scientific_names.iter().map(String::as_str).collect();
        state.check_batch(scientific_names.len(), &names)?;
        let mut inserted = 0;
        for name in scientific_names {
            if state.entities.values().any(|e| &e.scientific_name == name) {
                continue;
            }
            let entity = Entity::new(Uuid::new_v4(), name.clone(), name.clone());
            state.entities.insert(entity.id, entity);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn ids_by_scientific(&self, scientific_names: &[String]) -> Result<Vec<(String, Uuid)>> {
        let mut state = self.state.lock().unwrap();
        let names: Vec<&str> = scientific_names.iter().map(String::as_str).collect();
        state.check_batch(scientific_names.len(), &names)?;
        let wanted: HashSet<&String> = scientific_names.iter().collect();
        Ok(state
            .entities
            .values()
            .filter(|e| wanted.contains(&e.scientific_name))
            .map(|e| (e.scientific_name.clone(), e.id))
            .collect())
    }

    fn for_worker(&self) -> Arc<dyn EntityStore> {
        self.state.lock().unwrap().worker_handles += 1;
        Arc::new(self.clone())
    }
}

// =============================================================================
// STATIC SOURCE
// =============================================================================

/// `NameSource` answering from fixed tables, recording every call.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    id: &'static str,
    names: HashMap<String, Vec<NameCandidate>>,
    keys: HashMap<String, Vec<NameCandidate>>,
    learned: HashMap<String, (i64, Taxonomy)>,
    failing: HashSet<String>,
    persist_all: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticSource {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Candidates returned for a name match (case-insensitive).
    pub fn with_name(mut self, name: &str, candidates: Vec<NameCandidate>) -> Self {
        self.names.insert(name.to_lowercase(), candidates);
        self
    }

    /// Candidates returned for a cached external key. Makes the source
    /// accept external keys.
    pub fn with_key(mut self, key: i64, candidates: Vec<NameCandidate>) -> Self {
        self.keys.insert(key.to_string(), candidates);
        self
    }

    /// Registry key and taxonomy reported when `name` matches. Makes the
    /// source learn external keys.
    pub fn with_learned_key(mut self, name: &str, key: i64, taxonomy: Taxonomy) -> Self {
        self.learned.insert(name.to_lowercase(), (key, taxonomy));
        self
    }

    /// Lookups of this name fail transiently.
    pub fn with_failure(mut self, name: &str) -> Self {
        self.failing.insert(name.to_lowercase());
        self
    }

    pub fn persisting_all(mut self) -> Self {
        self.persist_all = true;
        self
    }

    /// Calls made so far, as `name:<name>` or `key:<key>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NameSource for StaticSource {
    fn source_id(&self) -> &'static str {
        self.id
    }

    fn accepts_external_key(&self) -> bool {
        !self.keys.is_empty()
    }

    fn learns_external_key(&self) -> bool {
        !self.learned.is_empty()
    }

    fn persists_all_candidates(&self) -> bool {
        self.persist_all
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<NameMatch>> {
        self.calls.lock().unwrap().push(format!("name:{}", name));
        let wanted = name.to_lowercase();
        if self.failing.contains(&wanted) {
            return Err(Error::Transient(format!("{} timed out", name)));
        }
        let Some(candidates) = self.names.get(&wanted) else {
            return Ok(None);
        };
        let mut matched = NameMatch::keyed(name.to_string())
            .with_record(SourceRecord::Candidates(candidates.clone()));
        if let Some((key, taxonomy)) = self.learned.get(&wanted) {
            matched = matched.with_usage_key(*key);
            matched.taxonomy = taxonomy.clone();
        }
        Ok(Some(matched))
    }

    async fn lookup_by_key(&self, key: &str) -> Result<Option<SourceRecord>> {
        self.calls.lock().unwrap().push(format!("key:{}", key));
        Ok(self
            .keys
            .get(key)
            .map(|candidates| SourceRecord::Candidates(candidates.clone())))
    }

    fn extract_candidates(&self, record: &SourceRecord) -> Vec<NameCandidate> {
        match record {
            SourceRecord::Candidates(candidates) => candidates.clone(),
            SourceRecord::Json(_) => Vec::new(),
        }
    }
}
