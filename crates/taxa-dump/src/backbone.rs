//! Darwin Core Archive backbone (`Taxon.tsv` + `VernacularName.tsv`) as a
//! naming source.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use taxa_core::{
    canonicalize, Error, NameCandidate, NameMatch, NameSource, Result, ScoredCandidate,
    SourceRecord,
};
use tracing::{debug, info};

use crate::taxon::{TaxonFilter, TaxonIndex};
use crate::tsv::TsvReader;
use crate::vernacular::{LanguageFilter, VernacularIndex};

pub const SOURCE_ID: &str = "dwca";

pub const TAXON_FILE: &str = "Taxon.tsv";
pub const VERNACULAR_FILE: &str = "VernacularName.tsv";

/// Options for loading a backbone.
#[derive(Debug, Clone)]
pub struct BackboneOptions {
    pub taxon_filter: TaxonFilter,
    pub languages: LanguageFilter,
    /// Use the best name in any language when the filtered set is empty.
    pub allow_any_language: bool,
}

impl Default for BackboneOptions {
    fn default() -> Self {
        Self {
            taxon_filter: TaxonFilter::backbone(),
            languages: LanguageFilter::default(),
            allow_any_language: false,
        }
    }
}

/// Both indices built from one backbone directory. Read-only once built.
#[derive(Debug)]
pub struct BackboneIndex {
    pub taxa: TaxonIndex,
    pub vernaculars: VernacularIndex,
}

/// Paths of the two required backbone files, checked for existence.
pub fn backbone_files(dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let taxon = dir.join(TAXON_FILE);
    let vernacular = dir.join(VERNACULAR_FILE);
    for path in [&taxon, &vernacular] {
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "{} not found in {}",
                path.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                dir.display()
            )));
        }
    }
    Ok((taxon, vernacular))
}

impl BackboneIndex {
    /// Stream both dumps. `wanted` holds canonical names (any case).
    ///
    /// Blocking; call from `spawn_blocking` inside async code.
    pub fn load(dir: &Path, wanted: &HashSet<String>, options: &BackboneOptions) -> Result<Self> {
        let (taxon_path, vernacular_path) = backbone_files(dir)?;
        let wanted: HashSet<String> = wanted.iter().map(|n| n.to_lowercase()).collect();

        let (taxa, _) = TaxonIndex::build(
            TsvReader::open(&taxon_path)?,
            &wanted,
            &options.taxon_filter,
        )?;
        let targets = taxa.target_keys();
        let vernaculars = if targets.is_empty() {
            info!(
                subsystem = "dump",
                component = "backbone",
                "No species keys found for the needed names"
            );
            VernacularIndex::default()
        } else {
            VernacularIndex::build(
                TsvReader::open(&vernacular_path)?,
                &targets,
                &options.languages,
                SOURCE_ID,
            )?
        };
        Ok(Self { taxa, vernaculars })
    }

    /// Best candidate for a key, following its accepted redirect when the
    /// key itself has none.
    pub fn best_for_key(&self, key: i64, allow_any: bool) -> Option<&ScoredCandidate> {
        self.vernaculars.best_for(key, allow_any).or_else(|| {
            self.taxa
                .accepted_of(key)
                .and_then(|accepted| self.vernaculars.best_for(accepted, allow_any))
        })
    }

    /// One best candidate per key indexed for a canonical name.
    pub fn candidates_for_name(&self, name: &str, allow_any: bool) -> Vec<NameCandidate> {
        let canonical = canonicalize(name);
        self.taxa
            .keys_for(&canonical)
            .iter()
            .filter_map(|key| self.best_for_key(*key, allow_any))
            .map(|scored| scored.candidate.clone())
            .collect()
    }
}

/// A loaded backbone exposed through the `NameSource` seam.
#[derive(Debug, Clone)]
pub struct IndexedSource {
    index: Arc<BackboneIndex>,
    allow_any_language: bool,
}

impl IndexedSource {
    pub fn new(index: Arc<BackboneIndex>, allow_any_language: bool) -> Self {
        Self {
            index,
            allow_any_language,
        }
    }

    pub fn index(&self) -> &BackboneIndex {
        &self.index
    }
}

#[async_trait]
impl NameSource for IndexedSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn accepts_external_key(&self) -> bool {
        true
    }

    /// A cached key counts only when it is one of the species keys indexed
    /// for the entity's own canonical name.
    fn honours_key(&self, key: i64, canonical: &str) -> bool {
        self.index.taxa.contains(canonical, key)
    }

    fn batch_concurrency(&self) -> usize {
        // in-memory lookups; no point fanning out
        1
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<NameMatch>> {
        let canonical = canonicalize(name);
        let keys = self.index.taxa.keys_for(&canonical);
        let candidates = self.index.candidates_for_name(name, self.allow_any_language);
        debug!(
            source = SOURCE_ID,
            canonical = %canonical,
            keys = ?keys,
            candidates = candidates.len(),
            "Backbone name lookup"
        );
        if candidates.is_empty() {
            return Ok(None);
        }
        let mut matched = NameMatch::keyed(keys[0].to_string())
            .with_record(SourceRecord::Candidates(candidates));
        matched.usage_key = Some(keys[0]);
        Ok(Some(matched))
    }

    async fn lookup_by_key(&self, key: &str) -> Result<Option<SourceRecord>> {
        let Ok(key) = key.trim().parse::<i64>() else {
            return Ok(None);
        };
        Ok(self
            .index
            .best_for_key(key, self.allow_any_language)
            .map(|scored| SourceRecord::Candidates(vec![scored.candidate.clone()])))
    }

    fn extract_candidates(&self, record: &SourceRecord) -> Vec<NameCandidate> {
        match record {
            SourceRecord::Candidates(candidates) => candidates.clone(),
            SourceRecord::Json(_) => Vec::new(),
        }
    }
}
