//! # taxa-core
//!
//! Core types, traits, and name algorithms for taxa.
//!
//! This crate provides the data model shared by every other taxa crate,
//! the pure functions of reconciliation (canonicalization, scoring), and
//! the trait seams for stores, naming sources, and approval.

pub mod canonical;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod scoring;
pub mod traits;

// Re-export commonly used types at crate root
pub use canonical::{canonicalize, same_binomial};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use models::*;
pub use scoring::{compare, locale_for, score, select_best};
pub use traits::*;
