//! Vernacular-name dump index: taxon key → best common name.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::time::Instant;

use taxa_core::defaults;
use taxa_core::{compare, NameCandidate, Result, ScoredCandidate};
use tracing::{info, trace};

use crate::tsv::{Record, TsvReader};

/// Column positions of a vernacular dump.
#[derive(Debug, Clone, Copy)]
pub struct VernacularColumns {
    pub id: Option<usize>,
    pub name: Option<usize>,
    pub language: Option<usize>,
    pub country: Option<usize>,
    pub preferred: Option<usize>,
}

impl VernacularColumns {
    pub fn resolve<R: BufRead>(reader: &TsvReader<R>) -> Self {
        Self {
            id: reader.column(&["taxonID", "taxonId", "usageID", "usageKey"]),
            name: reader.column(&["vernacularName"]),
            language: reader.column(&["language", "languageCode"]),
            country: reader.column(&["countryCode", "country"]),
            preferred: reader.column(&["isPreferredName", "preferred", "isPreferred"]),
        }
    }

    pub fn read(&self, record: &Record) -> Option<VernacularRow> {
        let key = record.get_i64(self.id)?;
        let name = record.get(self.name);
        if name.is_empty() {
            return None;
        }
        let preferred = record.get(self.preferred).to_lowercase();
        Some(VernacularRow {
            key,
            name: name.to_string(),
            language: record.get(self.language).to_lowercase(),
            country: record.get(self.country).to_string(),
            preferred: defaults::TRUTHY.contains(&preferred.as_str()),
        })
    }
}

/// One vernacular dump row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VernacularRow {
    pub key: i64,
    pub name: String,
    /// Lowercase; empty when the dump gives none.
    pub language: String,
    pub country: String,
    pub preferred: bool,
}

impl VernacularRow {
    pub fn candidate(&self, source_id: &str) -> NameCandidate {
        NameCandidate::new(&self.name, source_id)
            .with_language(&self.language)
            .with_country(&self.country)
            .preferred(self.preferred)
    }
}

/// Allowed languages. Rows without a language always pass.
#[derive(Debug, Clone)]
pub struct LanguageFilter {
    allowed: Vec<String>,
}

impl LanguageFilter {
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: languages
                .into_iter()
                .map(|l| l.as_ref().trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, language: &str) -> bool {
        language.is_empty() || self.allowed.iter().any(|l| l == language)
    }
}

impl Default for LanguageFilter {
    fn default() -> Self {
        Self::new(defaults::ENGLISH_LANGUAGES)
    }
}

/// Best candidate per key, under the language filter and under any language.
#[derive(Debug, Default)]
pub struct VernacularIndex {
    best: HashMap<i64, ScoredCandidate>,
    best_any: HashMap<i64, ScoredCandidate>,
}

/// Keep `candidate` only if it strictly outranks the current best.
fn offer(map: &mut HashMap<i64, ScoredCandidate>, key: i64, candidate: ScoredCandidate) {
    match map.get(&key) {
        Some(current) if compare(&candidate, current) != std::cmp::Ordering::Greater => {}
        _ => {
            map.insert(key, candidate);
        }
    }
}

impl VernacularIndex {
    /// Single streaming pass, keeping only rows for `targets`.
    pub fn build<R: BufRead>(
        mut reader: TsvReader<R>,
        targets: &HashSet<i64>,
        filter: &LanguageFilter,
        source_id: &str,
    ) -> Result<Self> {
        let start = Instant::now();
        let columns = VernacularColumns::resolve(&reader);
        let mut index = VernacularIndex::default();
        let mut rows_read = 0usize;
        let mut rows_used = 0usize;

        while let Some(record) = reader.next_record()? {
            rows_read += 1;
            let Some(row) = columns.read(&record) else {
                continue;
            };
            if !targets.contains(&row.key) {
                continue;
            }
            rows_used += 1;
            let scored = row.candidate(source_id).scored();
            trace!(key = row.key, name = %row.name, score = scored.score, "Vernacular candidate");

            if filter.allows(&row.language) {
                offer(&mut index.best, row.key, scored.clone());
            }
            offer(&mut index.best_any, row.key, scored);
        }

        info!(
            subsystem = "dump",
            component = "vernacular_index",
            op = "build",
            rows_read,
            rows_used,
            keys = index.best_any.len(),
            keys_filtered = index.best.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Vernacular index built"
        );
        Ok(index)
    }

    /// Best candidate for a key; the any-language map is consulted only when
    /// `allow_any` is set and the filtered map has nothing.
    pub fn best_for(&self, key: i64, allow_any: bool) -> Option<&ScoredCandidate> {
        self.best
            .get(&key)
            .or_else(|| allow_any.then(|| self.best_any.get(&key)).flatten())
    }

    pub fn len(&self) -> usize {
        self.best_any.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best_any.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DUMP: &str = "taxonID\tvernacularName\tlanguage\tcountryCode\tisPreferredName\n\
        1\tAfrican Violet\ten\tUS\ttrue\n\
        1\tVioleta Africana\tes\t\tfalse\n\
        1\tUsambara violet\teng\t\t\n\
        2\tVeilchen\tde\t\tyes\n\
        3\tDog rose\t\t\t\n\
        3\tDog briar\t\t\t\n\
        9\tIgnored\ten\t\t\n\
        bad\tBroken\ten\t\t\n\
        4\t\ten\t\t\n";

    fn build() -> VernacularIndex {
        let reader = TsvReader::new(Cursor::new(DUMP.as_bytes().to_vec())).unwrap();
        let targets: HashSet<i64> = [1, 2, 3, 4].into_iter().collect();
        VernacularIndex::build(reader, &targets, &LanguageFilter::default(), "dwca").unwrap()
    }

    #[test]
    fn test_best_under_language_filter() {
        let index = build();
        let best = index.best_for(1, false).unwrap();
        assert_eq!(best.candidate.text, "African Violet");
        assert_eq!(best.locale, "en-US");
    }

    #[test]
    fn test_any_language_fallback_only_when_enabled() {
        let index = build();
        assert!(index.best_for(2, false).is_none());
        let any = index.best_for(2, true).unwrap();
        assert_eq!(any.candidate.text, "Veilchen");
        assert_eq!(any.locale, "de");
    }

    #[test]
    fn test_blank_language_passes_filter_as_english() {
        let index = build();
        let best = index.best_for(3, false).unwrap();
        // equal scores: lexicographically smaller lowercase name wins
        assert_eq!(best.candidate.text, "Dog briar");
        assert_eq!(best.locale, "en");
        assert_eq!(best.score, 10 + 4);
    }

    #[test]
    fn test_untargeted_and_malformed_rows_skipped() {
        let index = build();
        assert!(index.best_for(9, true).is_none());
        assert!(index.best_for(4, true).is_none());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_language_filter() {
        let filter = LanguageFilter::new(["EN", " de "]);
        assert!(filter.allows("en"));
        assert!(filter.allows("de"));
        assert!(filter.allows(""));
        assert!(!filter.allows("eng"));
    }
}
