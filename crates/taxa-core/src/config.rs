//! Engine configuration.

use std::time::Duration;

use crate::defaults;

/// Tuning for a reconciliation run.
///
/// Passed to the engine at construction; there is no ambient global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Entities read per store page.
    pub page_size: usize,
    /// Entities per resolver unit of work.
    pub resolve_batch: usize,
    /// Parallel store workers.
    pub db_concurrency: usize,
    /// Entity patches per write chunk.
    pub update_chunk: usize,
    /// Synonym rows per bulk insert.
    pub upsert_chunk: usize,
    /// Starting window for `IN`-list reads.
    pub in_list_max: usize,
    /// Scientific synonyms tried per entity after a primary miss.
    pub synonym_limit: usize,
    /// Attempts for a transiently failing chunk.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt up to `backoff_cap`.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Stop submitting new work after this many entities (None = unbounded).
    pub max_rows: Option<usize>,
    /// Overwrite display names even when already set.
    pub force: bool,
    /// Write chosen display names (synonyms are written either way).
    pub set_display: bool,
    /// Only consider entities whose canonical key matches this name.
    pub only_scientific: Option<String>,
    /// Source ids in aggregation priority order.
    pub source_priority: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            resolve_batch: defaults::RESOLVE_BATCH,
            db_concurrency: defaults::DB_CONCURRENCY,
            update_chunk: defaults::UPDATE_CHUNK,
            upsert_chunk: defaults::UPSERT_CHUNK,
            in_list_max: defaults::IN_LIST_MAX,
            synonym_limit: defaults::SYNONYM_LIMIT,
            max_retries: defaults::MAX_RETRIES,
            backoff_base: Duration::from_millis(defaults::BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(defaults::BACKOFF_CAP_MS),
            max_rows: None,
            force: false,
            set_display: true,
            only_scientific: None,
            source_priority: defaults::SOURCE_PRIORITY
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
        .max(1)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
        .unwrap_or(default)
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TAXA_PAGE_SIZE` | `20000` | Entities read per page |
    /// | `TAXA_RESOLVE_BATCH` | `250` | Entities per resolver unit |
    /// | `TAXA_DB_CONCURRENCY` | `8` | Parallel store workers |
    /// | `TAXA_UPDATE_CHUNK` | `200` | Entity patches per chunk |
    /// | `TAXA_UPSERT_CHUNK` | `1000` | Synonym rows per bulk insert |
    /// | `TAXA_IN_LIST_MAX` | `80` | Starting `IN`-list window |
    /// | `TAXA_SYNONYM_LIMIT` | `8` | Synonyms tried after a primary miss |
    /// | `TAXA_MAX_RETRIES` | `3` | Attempts for transient failures |
    /// | `TAXA_SET_DISPLAY` | `true` | Write chosen display names |
    /// | `TAXA_SOURCE_PRIORITY` | `dwca,gbif,wikidata,inat,itis,plantbook` | Tie-break order |
    pub fn from_env() -> Self {
        let base = Self::default();
        let max_retries = std::env::var("TAXA_MAX_RETRIES")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(base.max_retries)
            .max(1);
        let source_priority = std::env::var("TAXA_SOURCE_PRIORITY")
            .ok()
            .map(|v| parse_list(&v))
            .filter(|list| !list.is_empty())
            .unwrap_or(base.source_priority.clone());

        Self {
            page_size: env_usize("TAXA_PAGE_SIZE", base.page_size),
            resolve_batch: env_usize("TAXA_RESOLVE_BATCH", base.resolve_batch),
            db_concurrency: env_usize("TAXA_DB_CONCURRENCY", base.db_concurrency),
            update_chunk: env_usize("TAXA_UPDATE_CHUNK", base.update_chunk),
            upsert_chunk: env_usize("TAXA_UPSERT_CHUNK", base.upsert_chunk),
            in_list_max: env_usize("TAXA_IN_LIST_MAX", base.in_list_max),
            synonym_limit: env_usize("TAXA_SYNONYM_LIMIT", base.synonym_limit),
            max_retries,
            set_display: env_flag("TAXA_SET_DISPLAY", base.set_display),
            source_priority,
            ..base
        }
    }

    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_only_scientific(mut self, name: Option<String>) -> Self {
        self.only_scientific = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn with_db_concurrency(mut self, workers: usize) -> Self {
        self.db_concurrency = workers.max(1);
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn with_chunks(mut self, update_chunk: usize, upsert_chunk: usize) -> Self {
        self.update_chunk = update_chunk.max(1);
        self.upsert_chunk = upsert_chunk.max(1);
        self
    }

    pub fn with_synonym_limit(mut self, limit: usize) -> Self {
        self.synonym_limit = limit;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_set_display(mut self, set_display: bool) -> Self {
        self.set_display = set_display;
        self
    }

    pub fn with_source_priority(mut self, priority: Vec<String>) -> Self {
        self.source_priority = priority;
        self
    }

    /// Position of a source in the priority list; unknown sources rank last.
    pub fn priority_of(&self, source_id: &str) -> usize {
        self.source_priority
            .iter()
            .position(|s| s == source_id)
            .unwrap_or(self.source_priority.len())
    }

    /// Backoff before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

/// Split a comma-separated list, trimming and lowercasing, dropping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size, 20_000);
        assert_eq!(config.update_chunk, 200);
        assert_eq!(config.upsert_chunk, 1000);
        assert_eq!(config.in_list_max, 80);
        assert_eq!(config.synonym_limit, 8);
        assert_eq!(config.db_concurrency, 8);
        assert!(config.set_display);
        assert!(!config.force);
    }

    #[test]
    fn test_priority_of() {
        let config = EngineConfig::default();
        assert_eq!(config.priority_of("dwca"), 0);
        assert_eq!(config.priority_of("gbif"), 1);
        assert_eq!(config.priority_of("plantbook"), 5);
        assert_eq!(config.priority_of("unknown"), 6);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = EngineConfig::default()
            .with_backoff(Duration::from_millis(500), Duration::from_millis(5000));
        assert_eq!(config.backoff_for(1), Duration::from_millis(500));
        assert_eq!(config.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(config.backoff_for(5), Duration::from_millis(5000));
        assert_eq!(config.backoff_for(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_rows(Some(10))
            .with_force(true)
            .with_only_scientific(Some("  ".into()))
            .with_chunks(0, 5);
        assert_eq!(config.max_rows, Some(10));
        assert!(config.force);
        assert!(config.only_scientific.is_none());
        assert_eq!(config.update_chunk, 1);
        assert_eq!(config.upsert_chunk, 5);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" en, ENG ,,"), vec!["en", "eng"]);
        assert!(parse_list("").is_empty());
    }
}
