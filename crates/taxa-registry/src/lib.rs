//! # taxa-registry
//!
//! Remote naming registries as `NameSource` adapters.
//!
//! Every adapter sits on [`HttpClient`], which applies a fixed timeout,
//! bounded retries with capped exponential backoff on 429/5xx and transport
//! errors, a per-registry concurrency limit, and an optional minimum delay
//! between calls. Any other non-success status is a definitive miss.
//!
//! | Id | Registry | Key learned | Notes |
//! |----|----------|-------------|-------|
//! | `gbif` | GBIF species API | yes | contributes taxonomy |
//! | `inat` | iNaturalist | no | names inline with the match |
//! | `itis` | ITIS | no | full name, then canonical binomial |
//! | `wikidata` | Wikidata SPARQL | no | batched; looks up cached GBIF keys |
//! | `plantbook` | Open Plantbook | no | all names kept as synonyms |

pub mod client;
pub mod config;
pub mod gbif;
pub mod inat;
pub mod itis;
pub mod plantbook;
pub mod wikidata;

use std::sync::Arc;

use taxa_core::{Error, NameSource, Result};

pub use client::{is_retryable, HttpClient};
pub use config::RegistryConfig;
pub use gbif::GbifSource;
pub use inat::InatSource;
pub use itis::ItisSource;
pub use plantbook::PlantbookSource;
pub use wikidata::WikidataSource;

/// Registry ids accepted by [`source_from_env`].
pub const REGISTRY_IDS: &[&str] = &[
    gbif::SOURCE_ID,
    inat::SOURCE_ID,
    itis::SOURCE_ID,
    wikidata::SOURCE_ID,
    plantbook::SOURCE_ID,
];

/// Build a registry adapter by id, configured from the environment.
pub fn source_from_env(id: &str) -> Result<Arc<dyn NameSource>> {
    let source: Arc<dyn NameSource> = match id.trim().to_lowercase().as_str() {
        gbif::SOURCE_ID => Arc::new(GbifSource::from_env()?),
        inat::SOURCE_ID => Arc::new(InatSource::from_env()?),
        itis::SOURCE_ID => Arc::new(ItisSource::from_env()?),
        wikidata::SOURCE_ID => Arc::new(WikidataSource::from_env()?),
        plantbook::SOURCE_ID => Arc::new(PlantbookSource::from_env()?),
        other => {
            return Err(Error::InvalidInput(format!(
                "unknown registry '{}' (expected one of: {})",
                other,
                REGISTRY_IDS.join(", ")
            )))
        }
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_env_known_ids() {
        for id in REGISTRY_IDS {
            let source = source_from_env(id).unwrap();
            assert_eq!(source.source_id(), *id);
        }
        assert_eq!(source_from_env(" GBIF ").unwrap().source_id(), "gbif");
    }

    #[test]
    fn test_source_from_env_unknown() {
        let err = source_from_env("usda").err().unwrap();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
