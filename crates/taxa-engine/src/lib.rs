//! # taxa-engine
//!
//! Reconciles entity display names against naming sources and writes the
//! results back.
//!
//! A run reads entities in pages, keeps those the gating rule selects, and
//! hands them in batches to one [`SourceResolver`] per source. Each resolver
//! walks a [`FallbackChain`] per entity (primary name or cached key, then up
//! to `synonym_limit` known scientific synonyms). The [`Aggregator`] picks a
//! winner across sources and routes display changes through the approval
//! gate, and [`BatchWriteBack`] persists patches and synonyms in adaptive
//! chunks on a bounded [`WorkPool`].

pub mod aggregator;
pub mod coordinator;
pub mod fallback;
pub mod resolver;
pub mod run;
pub mod seed;
pub mod testing;
pub mod writeback;

pub use aggregator::{Aggregated, Aggregator};
pub use coordinator::{retry_transient, run_windows, Described, RowBudget, Windowed, WorkPool};
pub use fallback::{ChainState, FallbackChain};
pub use resolver::{wanted_names, Resolution, SourceResolver};
pub use run::{Engine, RunDiagnostics, RunReport};
pub use seed::{seed_entities, seed_from_bundle, SeedReport};
pub use writeback::{dedup_synonyms, merge_patches, read_scientific_synonyms, BatchWriteBack};
