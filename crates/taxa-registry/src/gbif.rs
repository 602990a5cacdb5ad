//! GBIF species API: `/v1/species/match` then `/v1/species/{key}/vernacularNames`.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::trace;

use taxa_core::{NameCandidate, NameMatch, NameSource, Result, SourceRecord, Taxonomy};

use crate::client::{array_field, int_field, str_field, HttpClient};
use crate::config::RegistryConfig;

pub const SOURCE_ID: &str = "gbif";

const MATCH_PATH: &str = "/v1/species/match";
const VERNACULAR_LIMIT: &str = "300";

/// GBIF backbone match plus vernacular names.
///
/// The matched usage key is learned onto the entity so later runs go
/// straight to the vernacular lookup.
pub struct GbifSource {
    http: HttpClient,
}

impl GbifSource {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(SOURCE_ID, config)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(RegistryConfig::gbif_from_env())
    }
}

/// Accepted key first, so synonyms resolve to the accepted concept.
fn usage_key(matched: &JsonValue) -> Option<i64> {
    int_field(matched, &["acceptedUsageKey", "usageKey", "speciesKey"])
}

fn taxonomy(matched: &JsonValue) -> Taxonomy {
    let text = |key: &str| str_field(matched, &[key]).map(str::to_string);
    Taxonomy {
        family: text("family"),
        genus: text("genus"),
        rank: text("rank"),
        match_type: text("matchType"),
        confidence: int_field(matched, &["confidence"]).map(|c| c as i32),
    }
}

fn vernacular_candidate(row: &JsonValue) -> Option<NameCandidate> {
    let name = str_field(row, &["vernacularName"])?;
    let mut candidate = NameCandidate::new(name, SOURCE_ID)
        .preferred(row.get("preferred").and_then(JsonValue::as_bool).unwrap_or(false));
    if let Some(language) = str_field(row, &["language"]) {
        candidate = candidate.with_language(language);
    }
    if let Some(country) = str_field(row, &["country"]) {
        candidate = candidate.with_country(country);
    }
    Some(candidate)
}

#[async_trait]
impl NameSource for GbifSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn accepts_external_key(&self) -> bool {
        true
    }

    fn learns_external_key(&self) -> bool {
        true
    }

    fn batch_concurrency(&self) -> usize {
        self.http.config().concurrency
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<NameMatch>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let Some(matched) = self.http.get_json(MATCH_PATH, &[("name", name)]).await? else {
            return Ok(None);
        };
        // matchType NONE carries no key
        let Some(key) = usage_key(&matched) else {
            trace!(subsystem = "registry", component = SOURCE_ID, name, "No backbone match");
            return Ok(None);
        };

        let mut found = NameMatch::keyed(key.to_string()).with_usage_key(key);
        found.taxonomy = taxonomy(&matched);
        Ok(Some(found))
    }

    async fn lookup_by_key(&self, key: &str) -> Result<Option<SourceRecord>> {
        let Ok(key) = key.trim().parse::<i64>() else {
            return Ok(None);
        };
        let path = format!("/v1/species/{}/vernacularNames", key);
        let body = self
            .http
            .get_json(&path, &[("limit", VERNACULAR_LIMIT)])
            .await?;
        Ok(body.map(SourceRecord::Json))
    }

    fn extract_candidates(&self, record: &SourceRecord) -> Vec<NameCandidate> {
        match record {
            SourceRecord::Candidates(candidates) => candidates.clone(),
            SourceRecord::Json(body) => {
                let rows = match body {
                    JsonValue::Array(rows) => rows.as_slice(),
                    other => array_field(other, &["results"]),
                };
                rows.iter().filter_map(vernacular_candidate).collect()
            }
        }
    }
}
