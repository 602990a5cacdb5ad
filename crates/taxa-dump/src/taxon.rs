//! Taxon dump index: canonical name → taxon keys.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::time::Instant;

use taxa_core::defaults;
use taxa_core::{canonicalize, Result};
use tracing::{debug, info};

use crate::tsv::{Record, TsvReader};

/// Column positions of a taxon dump, resolved against its header.
#[derive(Debug, Clone, Copy)]
pub struct TaxonColumns {
    pub id: Option<usize>,
    pub accepted: Option<usize>,
    pub kingdom: Option<usize>,
    pub rank: Option<usize>,
    pub canonical: Option<usize>,
    pub scientific: Option<usize>,
}

impl TaxonColumns {
    pub fn resolve<R: BufRead>(reader: &TsvReader<R>) -> Self {
        Self {
            id: reader.column(&["taxonID", "taxonId", "usageID", "usageKey"]),
            accepted: reader.column(&["acceptedNameUsageID", "acceptedUsageKey"]),
            kingdom: reader.column(&["kingdom"]),
            rank: reader.column(&["taxonRank", "rank"]),
            canonical: reader.column(&["canonicalName"]),
            scientific: reader.column(&["scientificName"]),
        }
    }

    /// Typed view of one record; `None` when the id is blank or not an integer.
    pub fn read(&self, record: &Record) -> Option<TaxonRow> {
        let key = record.get_i64(self.id)?;
        let name = match record.get(self.canonical) {
            "" => record.get(self.scientific),
            n => n,
        };
        Some(TaxonRow {
            key,
            accepted: record.get_i64(self.accepted).filter(|a| *a != key),
            kingdom: record.get(self.kingdom).to_lowercase(),
            rank: record.get(self.rank).to_lowercase(),
            name: name.to_string(),
        })
    }
}

/// One taxon dump row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRow {
    pub key: i64,
    pub accepted: Option<i64>,
    pub kingdom: String,
    pub rank: String,
    pub name: String,
}

/// Kingdom and rank filter applied while indexing.
#[derive(Debug, Clone)]
pub struct TaxonFilter {
    /// Rows with a non-empty, different kingdom are dropped.
    pub kingdom: Option<String>,
    /// Lowercase ranks kept (exact match).
    pub ranks: Vec<String>,
}

impl TaxonFilter {
    /// Strict species-only filter used for backbone enrichment.
    pub fn backbone() -> Self {
        Self {
            kingdom: Some(defaults::KINGDOM.to_string()),
            ranks: vec!["species".to_string()],
        }
    }

    /// Any species-like rank.
    pub fn species_like() -> Self {
        Self {
            kingdom: Some(defaults::KINGDOM.to_string()),
            ranks: defaults::SPECIES_RANKS.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn accepts(&self, row: &TaxonRow) -> bool {
        if let Some(kingdom) = &self.kingdom {
            if !row.kingdom.is_empty() && !row.kingdom.eq_ignore_ascii_case(kingdom) {
                return false;
            }
        }
        self.ranks.iter().any(|r| r == &row.rank)
    }
}

/// Per-key info kept for redirect lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowInfo {
    pub canonical: String,
    pub accepted: Option<i64>,
}

/// Canonical name (lowercase) → taxon keys, plus a key → row side index.
#[derive(Debug, Default)]
pub struct TaxonIndex {
    by_canonical: HashMap<String, Vec<i64>>,
    rows: HashMap<i64, RowInfo>,
}

/// Counters from one indexing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub rows_read: usize,
    pub rows_indexed: usize,
    pub rows_malformed: usize,
}

impl TaxonIndex {
    /// Single streaming pass over a taxon dump.
    ///
    /// `wanted` holds lowercase canonical keys; rows for other names are
    /// skipped so memory stays proportional to the entities being processed.
    pub fn build<R: BufRead>(
        mut reader: TsvReader<R>,
        wanted: &HashSet<String>,
        filter: &TaxonFilter,
    ) -> Result<(Self, IndexStats)> {
        let start = Instant::now();
        let columns = TaxonColumns::resolve(&reader);
        let mut index = TaxonIndex::default();
        let mut stats = IndexStats::default();

        while let Some(record) = reader.next_record()? {
            stats.rows_read += 1;
            let Some(row) = columns.read(&record) else {
                stats.rows_malformed += 1;
                continue;
            };
            if !filter.accepts(&row) {
                continue;
            }
            let canonical = canonicalize(&row.name).to_lowercase();
            if canonical.is_empty() || !wanted.contains(&canonical) {
                continue;
            }
            stats.rows_indexed += 1;
            index.insert(canonical, row.key, row.accepted);
        }

        info!(
            subsystem = "dump",
            component = "taxon_index",
            op = "build",
            rows_read = stats.rows_read,
            rows_indexed = stats.rows_indexed,
            rows_malformed = stats.rows_malformed,
            names = index.by_canonical.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Taxon index built"
        );
        Ok((index, stats))
    }

    pub fn insert(&mut self, canonical: String, key: i64, accepted: Option<i64>) {
        let keys = self.by_canonical.entry(canonical.clone()).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
        self.rows.insert(key, RowInfo { canonical, accepted });
    }

    /// Keys indexed for a canonical name, in dump order.
    pub fn keys_for(&self, canonical: &str) -> &[i64] {
        self.by_canonical
            .get(&canonical.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, canonical: &str, key: i64) -> bool {
        self.keys_for(canonical).contains(&key)
    }

    pub fn row(&self, key: i64) -> Option<&RowInfo> {
        self.rows.get(&key)
    }

    /// Accepted key a synonym row redirects to.
    pub fn accepted_of(&self, key: i64) -> Option<i64> {
        self.rows.get(&key).and_then(|r| r.accepted)
    }

    /// Every key worth reading vernaculars for: indexed keys and their redirects.
    pub fn target_keys(&self) -> HashSet<i64> {
        let mut keys: HashSet<i64> = self.rows.keys().copied().collect();
        keys.extend(self.rows.values().filter_map(|r| r.accepted));
        debug!(
            subsystem = "dump",
            component = "taxon_index",
            target_keys = keys.len(),
            "Target keys collected"
        );
        keys
    }

    pub fn len(&self) -> usize {
        self.by_canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_canonical.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DUMP: &str = "taxonID\tacceptedNameUsageID\tkingdom\ttaxonRank\tcanonicalName\tscientificName\n\
        1\t\tPlantae\tspecies\tSaintpaulia ionantha\tSaintpaulia ionantha H.Wendl.\n\
        2\t\tPlantae\tsubspecies\tSaintpaulia ionantha grandifolia\t\n\
        3\t1\tPlantae\tspecies\t\tSaintpaulia kewensis C.B.Clarke\n\
        4\t\tAnimalia\tspecies\tRosa canina\t\n\
        x9\t\tPlantae\tspecies\tRosa canina\t\n\
        5\t\t\tspecies\tRosa canina\t\n\
        6\t\tPlantae\tspecies\tQuercus robur\t\n\
        7\t\tPlantae\n";

    fn wanted(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_lowercase()).collect()
    }

    fn build(names: &[&str], filter: &TaxonFilter) -> (TaxonIndex, IndexStats) {
        let reader = TsvReader::new(Cursor::new(DUMP.as_bytes().to_vec())).unwrap();
        TaxonIndex::build(reader, &wanted(names), filter).unwrap()
    }

    #[test]
    fn test_indexes_only_wanted_species() {
        let (index, stats) = build(
            &["Saintpaulia ionantha", "Rosa canina", "Saintpaulia kewensis"],
            &TaxonFilter::backbone(),
        );
        assert_eq!(index.keys_for("saintpaulia ionantha"), &[1]);
        assert_eq!(index.keys_for("Saintpaulia kewensis"), &[3]);
        // Animalia row dropped, blank kingdom kept
        assert_eq!(index.keys_for("Rosa canina"), &[5]);
        assert!(index.keys_for("Quercus robur").is_empty());
        assert_eq!(stats.rows_malformed, 1);
        assert_eq!(stats.rows_indexed, 3);
    }

    #[test]
    fn test_scientific_name_used_when_canonical_blank() {
        let (index, _) = build(&["Saintpaulia kewensis"], &TaxonFilter::backbone());
        assert!(index.contains("Saintpaulia kewensis", 3));
    }

    #[test]
    fn test_accepted_redirect() {
        let (index, _) = build(
            &["Saintpaulia ionantha", "Saintpaulia kewensis"],
            &TaxonFilter::backbone(),
        );
        assert_eq!(index.accepted_of(3), Some(1));
        assert_eq!(index.accepted_of(1), None);
        let targets = index.target_keys();
        assert!(targets.contains(&1) && targets.contains(&3));
    }

    #[test]
    fn test_short_rows_do_not_fail_stream() {
        let (_, stats) = build(&["Quercus robur"], &TaxonFilter::backbone());
        assert_eq!(stats.rows_read, 8);
        assert_eq!(stats.rows_indexed, 1);
    }

    #[test]
    fn test_species_like_filter() {
        let filter = TaxonFilter {
            kingdom: None,
            ranks: vec!["subspecies".into()],
        };
        let (index, _) = build(&["Saintpaulia ionantha"], &filter);
        assert_eq!(index.keys_for("Saintpaulia ionantha"), &[2]);
        assert!(TaxonFilter::species_like().ranks.contains(&"nothospecies".to_string()));
    }

    #[test]
    fn test_missing_optional_columns() {
        let text = "usageKey\tscientificName\n10\tAbies alba Mill.\n";
        let reader = TsvReader::new(Cursor::new(text.as_bytes().to_vec())).unwrap();
        let filter = TaxonFilter {
            kingdom: Some("plantae".into()),
            ranks: vec![String::new()],
        };
        let (index, _) = TaxonIndex::build(reader, &wanted(&["Abies alba"]), &filter).unwrap();
        assert_eq!(index.keys_for("abies alba"), &[10]);
    }
}
