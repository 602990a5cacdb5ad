//! Centralized default constants for taxa.
//!
//! **This module is the single source of truth** for shared tuning values.
//! Configuration structs (`EngineConfig`, `RegistryConfig`, `PoolConfig`)
//! take their defaults from here.

// =============================================================================
// PAGING
// =============================================================================

/// Entities read from the store per page.
pub const PAGE_SIZE: usize = 20_000;

/// Entities handed to one resolver unit of work.
pub const RESOLVE_BATCH: usize = 250;

// =============================================================================
// WRITE-BACK
// =============================================================================

/// Entity patches per write chunk (each row written independently).
pub const UPDATE_CHUNK: usize = 200;

/// Synonym rows per bulk insert-ignore-conflicts request.
pub const UPSERT_CHUNK: usize = 1000;

/// Starting window size for `IN`-list reads; shrinks on payload-too-large.
pub const IN_LIST_MAX: usize = 80;

/// Parallel store workers.
pub const DB_CONCURRENCY: usize = 8;

/// Attempts for a transiently failing chunk before it is skipped.
pub const MAX_RETRIES: u32 = 3;

/// First backoff delay in milliseconds; doubles per attempt.
pub const BACKOFF_BASE_MS: u64 = 500;

/// Upper bound for any single backoff delay in milliseconds.
pub const BACKOFF_CAP_MS: u64 = 5_000;

// =============================================================================
// FALLBACK CHAIN
// =============================================================================

/// Scientific synonyms tried per entity after a primary miss.
pub const SYNONYM_LIMIT: usize = 8;

// =============================================================================
// SCORING
// =============================================================================

/// Bonus for English-language candidates.
pub const SCORE_ENGLISH: i32 = 10;

/// Bonus for candidates the source flagged as preferred.
pub const SCORE_PREFERRED: i32 = 5;

/// Bonus for candidates tagged with an English-speaking country.
pub const SCORE_ENGLISH_COUNTRY: i32 = 2;

/// Names with this many words or more get no brevity bonus.
pub const SCORE_BREVITY_WORDS: i32 = 6;

/// Penalty for names that read like a rank label ("rose family").
pub const SCORE_RANK_LABEL_PENALTY: i32 = 3;

/// Country codes that earn `SCORE_ENGLISH_COUNTRY`.
pub const ENGLISH_COUNTRIES: &[&str] = &["US", "GB", "CA", "AU", "NZ"];

/// Words that mark a name as a rank label rather than a common name.
pub const RANK_LABEL_WORDS: &[&str] = &["family", "genus", "order", "group", "aggregate", "complex"];

/// Language codes treated as English.
pub const ENGLISH_LANGUAGES: &[&str] = &["en", "eng"];

// =============================================================================
// BULK DUMPS
// =============================================================================

/// Kingdom kept when indexing a taxon dump.
pub const KINGDOM: &str = "plantae";

/// Ranks considered species-like.
pub const SPECIES_RANKS: &[&str] = &[
    "species",
    "nothospecies",
    "hybrid",
    "hybrid species",
    "species aggregate",
    "species group",
];

/// Values of a preferred-flag column read as true.
pub const TRUTHY: &[&str] = &["true", "t", "1", "yes", "y"];

// =============================================================================
// REGISTRIES
// =============================================================================

/// Per-request timeout for registry calls, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 15;

/// Concurrent in-flight calls per registry.
pub const HTTP_CONCURRENCY: usize = 8;

/// Names or keys per Wikidata SPARQL query.
pub const WIKIDATA_BATCH: usize = 200;

/// Minimum delay between Wikidata queries, in milliseconds.
pub const WIKIDATA_DELAY_MS: u64 = 150;

/// Minimum delay between Open Plantbook calls, in milliseconds.
pub const PLANTBOOK_DELAY_MS: u64 = 200;

/// Source ids in aggregation priority order.
pub const SOURCE_PRIORITY: &[&str] = &["dwca", "gbif", "wikidata", "inat", "itis", "plantbook"];
