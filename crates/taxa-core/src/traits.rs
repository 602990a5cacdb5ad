//! Core traits for taxa abstractions.
//!
//! These traits define the seams between the reconciliation engine and its
//! collaborators: the backing entity store, naming sources, and the approval
//! gate for display-name changes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// ENTITY STORE
// =============================================================================

/// Backing store for entities and their synonyms.
///
/// Only the primitives the engine needs: paged reads, per-row update,
/// bulk insert that skips conflicts, and `IN`-list lookups.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Cheap round trip used to fail fast at startup.
    async fn ping(&self) -> Result<()>;

    /// Read a page of entities ordered by id.
    async fn fetch_page(&self, offset: i64, limit: i64) -> Result<Vec<Entity>>;

    /// Apply one patch. Returns false when no row matched.
    async fn update_entity(&self, patch: &EntityPatch) -> Result<bool>;

    /// Insert synonym rows, skipping natural-key conflicts. Returns rows sent.
    async fn insert_synonyms(&self, rows: &[SynonymRecord]) -> Result<u64>;

    /// Scientific synonyms for the given entity ids, as `(entity_id, name)`.
    async fn scientific_synonyms(&self, entity_ids: &[Uuid]) -> Result<Vec<(Uuid, String)>>;

    /// Insert entities whose display name equals the scientific name,
    /// skipping scientific names that already exist. Returns rows inserted.
    async fn insert_entities(&self, scientific_names: &[String]) -> Result<u64>;

    /// Entity ids for exact scientific names, as `(scientific_name, id)`.
    async fn ids_by_scientific(&self, scientific_names: &[String]) -> Result<Vec<(String, Uuid)>>;

    /// A handle for one worker. Handles are never shared across workers.
    fn for_worker(&self) -> Arc<dyn EntityStore>;
}

// =============================================================================
// NAME SOURCES
// =============================================================================

/// Detail payload returned by a source for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    /// Raw registry response, decoded by the source's `extract_candidates`.
    Json(JsonValue),
    /// Candidates already extracted (bulk index, SPARQL results).
    Candidates(Vec<NameCandidate>),
}

/// Result of a name-based match against a source.
#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    /// Key to pass to `lookup_by_key` for details.
    pub key: String,
    /// Integer registry key worth caching on the entity.
    pub usage_key: Option<i64>,
    /// Details returned inline with the match; skips the detail lookup.
    pub record: Option<SourceRecord>,
    pub taxonomy: Taxonomy,
}

impl NameMatch {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            usage_key: None,
            record: None,
            taxonomy: Taxonomy::default(),
        }
    }

    pub fn with_record(mut self, record: SourceRecord) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_usage_key(mut self, key: i64) -> Self {
        self.usage_key = Some(key);
        self
    }
}

/// Outcome of one lookup in a batch, keyed by its input.
pub type Lookup<T> = (String, Result<Option<T>>);

/// A naming authority the engine can reconcile against.
///
/// `Ok(None)` is a definitive miss. `Err` means the lookup could not be
/// completed (retries exhausted); callers treat it as a miss and log it.
#[async_trait]
pub trait NameSource: Send + Sync {
    /// Stable id used in decisions, logs, and priority lists.
    fn source_id(&self) -> &'static str;

    /// Whether an entity's cached external key can be passed to `lookup_by_key`.
    fn accepts_external_key(&self) -> bool {
        false
    }

    /// Whether a cached key applies to an entity with this canonical name.
    fn honours_key(&self, _key: i64, _canonical: &str) -> bool {
        true
    }

    /// Whether `NameMatch::usage_key` should be written back to the entity.
    fn learns_external_key(&self) -> bool {
        false
    }

    /// Whether every candidate (not just the winner) is persisted as a synonym.
    fn persists_all_candidates(&self) -> bool {
        false
    }

    /// In-flight lookups for the default batch methods.
    fn batch_concurrency(&self) -> usize {
        crate::defaults::HTTP_CONCURRENCY
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<NameMatch>>;

    async fn lookup_by_key(&self, key: &str) -> Result<Option<SourceRecord>>;

    fn extract_candidates(&self, record: &SourceRecord) -> Vec<NameCandidate>;

    /// Match many names. Results come back in completion order.
    async fn lookup_names(&self, names: &[String]) -> Vec<Lookup<NameMatch>> {
        stream::iter(names.iter().cloned())
            .map(|name| async move {
                let result = self.lookup_by_name(&name).await;
                (name, result)
            })
            .buffer_unordered(self.batch_concurrency().max(1))
            .collect()
            .await
    }

    /// Fetch many detail records. Results come back in completion order.
    async fn lookup_keys(&self, keys: &[String]) -> Vec<Lookup<SourceRecord>> {
        stream::iter(keys.iter().cloned())
            .map(|key| async move {
                let result = self.lookup_by_key(&key).await;
                (key, result)
            })
            .buffer_unordered(self.batch_concurrency().max(1))
            .collect()
            .await
    }
}

// =============================================================================
// APPROVAL
// =============================================================================

/// A proposed display-name change shown to a reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub entity_id: Uuid,
    pub scientific_name: String,
    pub current_display: String,
    pub proposed_display: String,
    pub locale: String,
    pub source_id: String,
    pub score: i32,
}

/// Reviewer answer for one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
    /// Accept this and every later proposal in the run.
    AcceptAll,
    /// Reject this and every later proposal in the run.
    RejectAll,
    /// Reject this proposal and stop reviewing; remaining proposals are rejected.
    Quit,
}

/// Reviews display-name changes before they are written.
pub trait ApprovalGate: Send + Sync {
    fn review(&self, proposal: &Proposal) -> Verdict;
}

/// Gate that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ApprovalGate for AutoApprove {
    fn review(&self, _proposal: &Proposal) -> Verdict {
        Verdict::Accept
    }
}
