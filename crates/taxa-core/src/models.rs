//! Core data models for taxa.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::canonicalize;
use crate::scoring;

// =============================================================================
// ENTITIES
// =============================================================================

/// One reconciliation target as read from the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    /// Full scientific name, possibly empty.
    pub scientific_name: String,
    /// Current display (common) name, possibly empty.
    pub display_name: String,
    /// Cached registry key learned by an earlier run.
    pub external_key: Option<i64>,
}

impl Entity {
    pub fn new(id: Uuid, scientific_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id,
            scientific_name: scientific_name.into(),
            display_name: display_name.into(),
            external_key: None,
        }
    }

    pub fn with_external_key(mut self, key: i64) -> Self {
        self.external_key = Some(key);
        self
    }

    /// Gating rule: blank display, display equal to the scientific name, or forced.
    pub fn needs_update(&self, force: bool) -> bool {
        force || !self.has_distinct_display()
    }

    /// True when the entity already carries a real common name.
    pub fn has_distinct_display(&self) -> bool {
        let display = self.display_name.trim();
        !display.is_empty() && display != self.scientific_name.trim()
    }

    pub fn canonical_key(&self) -> String {
        canonicalize(&self.scientific_name)
    }
}

// =============================================================================
// NAME CANDIDATES
// =============================================================================

/// Kind of a persisted name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameKind {
    Scientific,
    Common,
}

impl NameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameKind::Scientific => "scientific",
            NameKind::Common => "common",
        }
    }
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate display name produced by a source. Scored, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCandidate {
    pub text: String,
    pub language: Option<String>,
    pub country: Option<String>,
    /// Locale supplied verbatim by the source; overrides the derived one.
    pub locale_hint: Option<String>,
    pub preferred: bool,
    pub source_id: String,
}

impl NameCandidate {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            country: None,
            locale_hint: None,
            preferred: false,
            source_id: source_id.into(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into()).filter(|l: &String| !l.trim().is_empty());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into()).filter(|c: &String| !c.trim().is_empty());
        self
    }

    pub fn with_locale_hint(mut self, locale: impl Into<String>) -> Self {
        self.locale_hint = Some(locale.into());
        self
    }

    pub fn preferred(mut self, preferred: bool) -> Self {
        self.preferred = preferred;
        self
    }

    pub fn score(&self) -> i32 {
        scoring::score(
            &self.text,
            self.preferred,
            self.language.as_deref(),
            self.country.as_deref(),
        )
    }

    pub fn locale(&self) -> String {
        match &self.locale_hint {
            Some(hint) if !hint.trim().is_empty() => hint.trim().to_string(),
            _ => scoring::locale_for(self.language.as_deref(), self.country.as_deref()),
        }
    }

    pub fn scored(self) -> ScoredCandidate {
        ScoredCandidate {
            score: self.score(),
            locale: self.locale(),
            candidate: self,
        }
    }
}

/// A candidate with its score and locale computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub candidate: NameCandidate,
    pub score: i32,
    pub locale: String,
}

// =============================================================================
// DECISIONS
// =============================================================================

/// Which attempt of the fallback chain produced a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Provenance {
    Primary,
    Synonym { index: usize, name: String },
}

/// Final display-name choice for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub entity_id: Uuid,
    pub display_name: String,
    pub locale: String,
    pub source_id: String,
    pub score: i32,
    pub provenance: Provenance,
}

/// A name to persist against an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymRecord {
    pub entity_id: Uuid,
    pub name: String,
    pub kind: NameKind,
    pub locale: Option<String>,
}

/// Natural key of a synonym row: `(entity, lowercase name, kind, locale or "")`.
pub type SynonymKey = (Uuid, String, NameKind, String);

impl SynonymRecord {
    pub fn scientific(entity_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            entity_id,
            name: name.into(),
            kind: NameKind::Scientific,
            locale: None,
        }
    }

    pub fn common(entity_id: Uuid, name: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            entity_id,
            name: name.into(),
            kind: NameKind::Common,
            locale: Some(locale.into()),
        }
    }

    pub fn dedup_key(&self) -> SynonymKey {
        (
            self.entity_id,
            self.name.trim().to_lowercase(),
            self.kind,
            self.locale.clone().unwrap_or_default(),
        )
    }
}

/// Taxonomy fields a registry match may contribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub family: Option<String>,
    pub genus: Option<String>,
    pub rank: Option<String>,
    pub match_type: Option<String>,
    pub confidence: Option<i32>,
}

impl Taxonomy {
    pub fn is_empty(&self) -> bool {
        self.family.is_none()
            && self.genus.is_none()
            && self.rank.is_none()
            && self.match_type.is_none()
            && self.confidence.is_none()
    }
}

/// Column changes for one entity row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPatch {
    pub entity_id: Uuid,
    pub display_name: Option<String>,
    pub external_key: Option<i64>,
    pub taxonomy: Option<Taxonomy>,
}

impl EntityPatch {
    pub fn new(entity_id: Uuid) -> Self {
        Self {
            entity_id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.external_key.is_none()
            && self.taxonomy.as_ref().map_or(true, Taxonomy::is_empty)
    }

    /// Fold another patch for the same entity into this one; set fields win.
    pub fn merge(&mut self, other: EntityPatch) {
        if other.display_name.is_some() {
            self.display_name = other.display_name;
        }
        if other.external_key.is_some() {
            self.external_key = other.external_key;
        }
        if other.taxonomy.is_some() {
            self.taxonomy = other.taxonomy;
        }
    }
}

/// Totals reported by a write-back pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub entities_updated: usize,
    pub synonyms_sent: usize,
    /// Items given up on after shrinking to size 1 or exhausting retries.
    pub items_dropped: usize,
}

impl std::ops::AddAssign for WriteReport {
    fn add_assign(&mut self, rhs: Self) {
        self.entities_updated += rhs.entities_updated;
        self.synonyms_sent += rhs.synonyms_sent;
        self.items_dropped += rhs.items_dropped;
    }
}
