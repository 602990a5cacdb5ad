//! # taxa-dump
//!
//! Streaming readers and in-memory lookup indices over tab-separated
//! taxonomic dumps: the GBIF backbone Darwin Core Archive and World Flora
//! Online bundles.
//!
//! Dumps can be gigabytes in size. Every reader makes a single pass and keeps
//! only rows for names the current run actually needs.

pub mod backbone;
pub mod taxon;
pub mod tsv;
pub mod vernacular;
pub mod wfo;

pub use backbone::{backbone_files, BackboneIndex, BackboneOptions, IndexedSource};
pub use taxon::{IndexStats, TaxonFilter, TaxonIndex, TaxonRow};
pub use tsv::{Record, TsvReader};
pub use vernacular::{LanguageFilter, VernacularIndex, VernacularRow};
pub use wfo::{read_bundle, AcceptedTaxon, WfoSeed};
