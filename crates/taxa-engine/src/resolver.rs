//! One naming source end to end for a batch of entities.
//!
//! The primary round groups entities by lookup path: a cached external key
//! the source honours goes straight to the detail lookup, everything else is
//! matched by name first. Name matches without inline details are fetched
//! in a second batched call. Entities whose primary attempt produced nothing
//! usable then walk their synonym chains, one batched round per chain step.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use taxa_core::{
    canonicalize, select_best, Entity, EntityPatch, NameMatch, NameSource, Provenance,
    ScoredCandidate, SourceRecord,
};

use crate::fallback::FallbackChain;

/// What one source produced for one entity.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entity_id: Uuid,
    pub source_id: &'static str,
    /// Winning candidate and the chain step that produced it.
    pub best: Option<(ScoredCandidate, Provenance)>,
    /// Every candidate from the winning attempt.
    pub candidates: Vec<ScoredCandidate>,
    /// Whether all of `candidates` should be kept as synonyms.
    pub persist_all: bool,
    /// External key and taxonomy learned from the primary name match.
    pub learned: Option<EntityPatch>,
    pub attempts: usize,
}

/// Runs one source over batches of entities, caching lookups for the run.
pub struct SourceResolver {
    source: Arc<dyn NameSource>,
    synonym_limit: usize,
    names: Mutex<HashMap<String, Option<NameMatch>>>,
    records: Mutex<HashMap<String, Option<SourceRecord>>>,
}

/// Per-entity working state inside one `resolve` call.
struct Slot<'a> {
    entity: &'a Entity,
    chain: FallbackChain,
    candidates: Vec<ScoredCandidate>,
    learned: Option<EntityPatch>,
}

impl SourceResolver {
    pub fn new(source: Arc<dyn NameSource>, synonym_limit: usize) -> Self {
        Self {
            source,
            synonym_limit,
            names: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn source_id(&self) -> &'static str {
        self.source.source_id()
    }

    /// Resolve a batch. `synonyms` maps entity ids to known scientific synonyms.
    pub async fn resolve(
        &self,
        entities: &[Entity],
        synonyms: &HashMap<Uuid, Vec<String>>,
    ) -> Vec<Resolution> {
        let start = Instant::now();
        let mut slots: Vec<Slot<'_>> = entities
            .iter()
            .map(|entity| Slot {
                entity,
                chain: FallbackChain::new(
                    &entity.scientific_name,
                    synonyms.get(&entity.id).cloned().unwrap_or_default(),
                    self.synonym_limit,
                ),
                candidates: Vec::new(),
                learned: None,
            })
            .collect();

        self.primary_round(&mut slots).await;

        let mut rounds = 0;
        while slots.iter().any(|s| !s.chain.is_exhausted()) {
            rounds += 1;
            self.synonym_round(&mut slots).await;
        }

        let resolutions: Vec<Resolution> = slots
            .into_iter()
            .map(|slot| self.finish(slot))
            .collect();

        debug!(
            subsystem = "engine",
            component = "resolver",
            source = self.source_id(),
            entities = entities.len(),
            resolved = resolutions.iter().filter(|r| r.best.is_some()).count(),
            synonym_rounds = rounds,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch resolved"
        );
        resolutions
    }

    async fn primary_round(&self, slots: &mut [Slot<'_>]) {
        // Cached keys first; entities whose key gives nothing fall back to
        // the name path within the same attempt.
        let keyed: Vec<(usize, String)> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| self.honoured_key(slot.entity).map(|k| (i, k.to_string())))
            .collect();
        let key_list: Vec<String> = keyed.iter().map(|(_, k)| k.clone()).collect();
        let key_records = self.fetch_records(&key_list).await;

        let mut by_key: HashMap<usize, Vec<ScoredCandidate>> = HashMap::new();
        for (i, key) in &keyed {
            let candidates = self.candidates_of(key_records.get(key).and_then(Option::as_ref));
            let usable = select_best(candidates.iter().cloned())
                .is_some_and(|best| slots[*i].chain.is_usable(&best));
            if usable {
                by_key.insert(*i, candidates);
            }
        }

        let by_name: Vec<usize> = (0..slots.len())
            .filter(|i| !by_key.contains_key(i))
            .collect();
        let names: Vec<String> = by_name
            .iter()
            .map(|i| slots[*i].chain.scientific_name().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let matches = self.match_names(&names).await;
        let details = self.details_for(matches.values().flatten()).await;

        for (i, slot) in slots.iter_mut().enumerate() {
            let candidates = match by_key.remove(&i) {
                Some(candidates) => candidates,
                None => {
                    let matched = matches
                        .get(slot.chain.scientific_name())
                        .and_then(Option::as_ref);
                    if let Some(matched) = matched {
                        slot.learned = self.learned_patch(slot.entity, matched);
                    }
                    self.candidates_of(matched.and_then(|m| record_for(m, &details)))
                }
            };
            self.advance(slot, candidates);
        }
    }

    async fn synonym_round(&self, slots: &mut [Slot<'_>]) {
        let names: Vec<String> = slots
            .iter()
            .filter_map(|s| s.chain.current_name())
            .map(str::to_string)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let matches = self.match_names(&names).await;
        let details = self.details_for(matches.values().flatten()).await;

        for slot in slots.iter_mut().filter(|s| !s.chain.is_exhausted()) {
            let candidates = {
                let matched = slot
                    .chain
                    .current_name()
                    .and_then(|name| matches.get(name))
                    .and_then(Option::as_ref);
                self.candidates_of(matched.and_then(|m| record_for(m, &details)))
            };
            self.advance(slot, candidates);
        }
    }

    fn advance(&self, slot: &mut Slot<'_>, candidates: Vec<ScoredCandidate>) {
        let best = select_best(candidates.iter().cloned());
        trace!(
            source = self.source_id(),
            entity_id = %slot.entity.id,
            name = ?slot.chain.current_name(),
            candidates = candidates.len(),
            best = ?best.as_ref().map(|b| b.candidate.text.as_str()),
            "Chain attempt"
        );
        slot.chain.advance(best);
        if slot.chain.winner().is_some() && slot.candidates.is_empty() {
            slot.candidates = candidates;
        }
    }

    fn finish(&self, slot: Slot<'_>) -> Resolution {
        let attempts = slot.chain.attempts();
        Resolution {
            entity_id: slot.entity.id,
            source_id: self.source_id(),
            best: slot.chain.into_winner(),
            candidates: slot.candidates,
            persist_all: self.source.persists_all_candidates(),
            learned: slot.learned,
            attempts,
        }
    }

    fn honoured_key(&self, entity: &Entity) -> Option<i64> {
        if !self.source.accepts_external_key() {
            return None;
        }
        entity
            .external_key
            .filter(|key| self.source.honours_key(*key, &entity.canonical_key()))
    }

    /// New external key (only for entities without one) plus taxonomy.
    fn learned_patch(&self, entity: &Entity, matched: &NameMatch) -> Option<EntityPatch> {
        if !self.source.learns_external_key() {
            return None;
        }
        let mut patch = EntityPatch::new(entity.id);
        if entity.external_key.is_none() {
            patch.external_key = matched.usage_key;
        }
        if !matched.taxonomy.is_empty() {
            patch.taxonomy = Some(matched.taxonomy.clone());
        }
        (!patch.is_empty()).then_some(patch)
    }

    fn candidates_of(&self, record: Option<&SourceRecord>) -> Vec<ScoredCandidate> {
        record
            .map(|r| {
                self.source
                    .extract_candidates(r)
                    .into_iter()
                    .map(|c| c.scored())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Details for matches that did not carry them inline.
    async fn details_for<'m>(
        &self,
        matches: impl Iterator<Item = &'m NameMatch>,
    ) -> HashMap<String, Option<SourceRecord>> {
        let keys: Vec<String> = matches
            .filter(|m| m.record.is_none())
            .map(|m| m.key.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        self.fetch_records(&keys).await
    }

    /// Name matches for every input name, from cache or the source.
    /// Failed lookups count as misses and are not cached.
    async fn match_names(&self, names: &[String]) -> HashMap<String, Option<NameMatch>> {
        let mut out = HashMap::with_capacity(names.len());
        let mut missing = Vec::new();
        {
            let cache = self.names.lock().await;
            for name in names {
                match cache.get(name) {
                    Some(hit) => {
                        out.insert(name.clone(), hit.clone());
                    }
                    None => missing.push(name.clone()),
                }
            }
        }
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return out;
        }

        let results = self.source.lookup_names(&missing).await;
        let mut cache = self.names.lock().await;
        for (name, result) in results {
            match result {
                Ok(matched) => {
                    cache.insert(name.clone(), matched.clone());
                    out.insert(name, matched);
                }
                Err(e) => {
                    warn!(
                        subsystem = "engine",
                        component = "resolver",
                        source = self.source_id(),
                        scientific_name = %name,
                        error = %e,
                        "Name lookup failed, treating as a miss"
                    );
                    out.insert(name, None);
                }
            }
        }
        out
    }

    async fn fetch_records(&self, keys: &[String]) -> HashMap<String, Option<SourceRecord>> {
        let mut out = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        {
            let cache = self.records.lock().await;
            for key in keys {
                match cache.get(key) {
                    Some(hit) => {
                        out.insert(key.clone(), hit.clone());
                    }
                    None => missing.push(key.clone()),
                }
            }
        }
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return out;
        }

        let results = self.source.lookup_keys(&missing).await;
        let mut cache = self.records.lock().await;
        for (key, result) in results {
            match result {
                Ok(record) => {
                    cache.insert(key.clone(), record.clone());
                    out.insert(key, record);
                }
                Err(e) => {
                    warn!(
                        subsystem = "engine",
                        component = "resolver",
                        source = self.source_id(),
                        external_key = %key,
                        error = %e,
                        "Detail lookup failed, treating as a miss"
                    );
                    out.insert(key, None);
                }
            }
        }
        out
    }
}

fn record_for<'r>(
    matched: &'r NameMatch,
    details: &'r HashMap<String, Option<SourceRecord>>,
) -> Option<&'r SourceRecord> {
    matched
        .record
        .as_ref()
        .or_else(|| details.get(&matched.key).and_then(Option::as_ref))
}

/// Canonical names a run will look up for these entities and synonyms.
pub fn wanted_names<'a>(
    entities: &'a [Entity],
    synonyms: &'a HashMap<Uuid, Vec<String>>,
) -> HashSet<String> {
    entities
        .iter()
        .map(|e| e.scientific_name.as_str())
        .chain(synonyms.values().flatten().map(String::as_str))
        .map(canonicalize)
        .filter(|c| !c.is_empty())
        .map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxa_core::{NameCandidate, Taxonomy};

    use crate::testing::StaticSource;

    fn en(text: &str) -> NameCandidate {
        NameCandidate::new(text, "test").with_language("en")
    }

    fn entity(sci: &str) -> Entity {
        Entity::new(Uuid::new_v4(), sci, "")
    }

    #[tokio::test]
    async fn test_primary_hit() {
        let source = StaticSource::new("test").with_name(
            "Rosa canina",
            vec![en("Dog rose"), NameCandidate::new("Hundsrose", "test").with_language("de")],
        );
        let resolver = SourceResolver::new(Arc::new(source), 8);
        let e = entity("Rosa canina");

        let out = resolver.resolve(&[e.clone()], &HashMap::new()).await;
        let (best, provenance) = out[0].best.clone().unwrap();
        assert_eq!(best.candidate.text, "Dog rose");
        assert_eq!(provenance, Provenance::Primary);
        assert_eq!(out[0].candidates.len(), 2);
        assert_eq!(out[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_synonym_fallback_after_identical_primary() {
        let source = StaticSource::new("test")
            .with_name("Saintpaulia ionantha", vec![en("Saintpaulia ionantha")])
            .with_name("Saintpaulia kewensis", vec![en("African violet")]);
        let source = Arc::new(source);
        let resolver = SourceResolver::new(source.clone(), 8);
        let e = entity("Saintpaulia ionantha");
        let synonyms = HashMap::from([(
            e.id,
            vec!["Saintpaulia confusa".to_string(), "Saintpaulia kewensis".to_string()],
        )]);

        let out = resolver.resolve(&[e], &synonyms).await;
        let (best, provenance) = out[0].best.clone().unwrap();
        assert_eq!(best.candidate.text, "African violet");
        assert_eq!(
            provenance,
            Provenance::Synonym {
                index: 1,
                name: "Saintpaulia kewensis".into()
            }
        );
        assert_eq!(out[0].attempts, 3);
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_honoured_key_skips_name_match() {
        let source = Arc::new(
            StaticSource::new("test")
                .with_key(42, vec![en("Dog rose")])
                .with_name("Rosa canina", vec![en("Wrong")]),
        );
        let resolver = SourceResolver::new(source.clone(), 8);
        let e = entity("Rosa canina").with_external_key(42);

        let out = resolver.resolve(&[e], &HashMap::new()).await;
        assert_eq!(out[0].best.as_ref().unwrap().0.candidate.text, "Dog rose");
        assert_eq!(source.calls(), vec!["key:42".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_key_result_falls_back_to_name() {
        let source = Arc::new(
            StaticSource::new("test")
                .with_key(1, vec![en("Other")])
                .with_name("Rosa canina", vec![en("Dog rose")]),
        );
        let resolver = SourceResolver::new(source.clone(), 8);
        let e = entity("Rosa canina").with_external_key(42);

        let out = resolver.resolve(&[e], &HashMap::new()).await;
        assert_eq!(out[0].best.as_ref().unwrap().0.candidate.text, "Dog rose");
        assert_eq!(out[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_learns_key_and_taxonomy_from_name_match() {
        let taxonomy = Taxonomy {
            family: Some("Rosaceae".into()),
            ..Default::default()
        };
        let source = StaticSource::new("test")
            .with_name("Rosa canina", vec![en("Dog rose")])
            .with_learned_key("Rosa canina", 3003, taxonomy.clone());
        let resolver = SourceResolver::new(Arc::new(source), 8);
        let e = entity("Rosa canina");

        let out = resolver.resolve(&[e.clone()], &HashMap::new()).await;
        let learned = out[0].learned.clone().unwrap();
        assert_eq!(learned.entity_id, e.id);
        assert_eq!(learned.external_key, Some(3003));
        assert_eq!(learned.taxonomy, Some(taxonomy));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_a_miss_and_not_cached() {
        let source = Arc::new(StaticSource::new("test").with_failure("Rosa canina"));
        let resolver = SourceResolver::new(source.clone(), 8);
        let e = entity("Rosa canina");

        let out = resolver.resolve(&[e.clone()], &HashMap::new()).await;
        assert!(out[0].best.is_none());
        resolver.resolve(&[e], &HashMap::new()).await;
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_shared_names_cost_one_call() {
        let source = Arc::new(
            StaticSource::new("test").with_name("Rosa canina", vec![en("Dog rose")]),
        );
        let resolver = SourceResolver::new(source.clone(), 8);
        let batch = vec![entity("Rosa canina"), entity("Rosa canina")];

        let out = resolver.resolve(&batch, &HashMap::new()).await;
        assert!(out.iter().all(|r| r.best.is_some()));
        resolver.resolve(&batch, &HashMap::new()).await;
        assert_eq!(source.calls(), vec!["name:Rosa canina".to_string()]);
    }

    #[test]
    fn test_wanted_names() {
        let e = entity("Saintpaulia ionantha subsp. grandifolia");
        let synonyms = HashMap::from([(e.id, vec!["Saintpaulia kewensis Hort.".to_string()])]);
        let wanted = wanted_names(&[e, entity("")], &synonyms);
        assert_eq!(
            wanted,
            HashSet::from([
                "saintpaulia ionantha".to_string(),
                "saintpaulia kewensis".to_string()
            ])
        );
    }
}
