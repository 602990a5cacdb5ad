//! Open Plantbook API.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;

use taxa_core::{canonicalize, NameCandidate, NameMatch, NameSource, Result, SourceRecord};

use crate::client::{array_field, single_header, str_field, HttpClient};
use crate::config::RegistryConfig;

pub const SOURCE_ID: &str = "plantbook";

const SEARCH_PATH: &str = "/api/v1/plant/search";
const DETAIL_PATH: &str = "/api/v1/plant";
const SEARCH_LIMIT: &str = "10";

/// Open Plantbook alias search plus plant detail.
///
/// Every common name it returns is kept as a synonym, not just the winner.
pub struct PlantbookSource {
    http: HttpClient,
}

impl PlantbookSource {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let http = match config.api_key.clone() {
            Some(key) => {
                HttpClient::with_headers(SOURCE_ID, config, single_header("x-api-key", &key)?)?
            }
            None => HttpClient::new(SOURCE_ID, config)?,
        };
        Ok(Self { http })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(RegistryConfig::plantbook_from_env())
    }

    async fn search(&self, alias: &str) -> Result<Vec<JsonValue>> {
        let body = self
            .http
            .get_json(
                SEARCH_PATH,
                &[("alias", alias), ("limit", SEARCH_LIMIT), ("offset", "0")],
            )
            .await?;
        Ok(match body {
            Some(JsonValue::Array(rows)) => rows,
            Some(other) => array_field(&other, &["data", "results"]).to_vec(),
            None => Vec::new(),
        })
    }

    async fn detail(&self, pid: &str) -> Result<Option<JsonValue>> {
        let path = format!("{}/{}", DETAIL_PATH, pid);
        self.http.get_json(&path, &[]).await
    }
}

fn scientific_of(row: &JsonValue) -> &str {
    str_field(
        row,
        &[
            "scientific_name",
            "scientificName",
            "binomial_name",
            "binomialName",
            "species",
            "canonicalName",
        ],
    )
    .unwrap_or("")
}

fn pid_of(row: &JsonValue) -> Option<&str> {
    str_field(row, &["display_pid", "pid", "id", "plant_id"])
}

/// Row whose scientific name canonicalizes to `canonical`, else the first row.
fn pick_row<'a>(rows: &'a [JsonValue], canonical: &str) -> Option<&'a JsonValue> {
    let wanted = canonical.to_lowercase();
    rows.iter()
        .find(|r| canonicalize(scientific_of(r)).to_lowercase() == wanted)
        .or_else(|| rows.first())
}

fn plant_candidates(detail: &JsonValue) -> Vec<NameCandidate> {
    let mut out = Vec::new();

    for item in array_field(detail, &["common_names", "commonNames"]) {
        let Some(name) = str_field(item, &["name", "value"]) else {
            continue;
        };
        let mut candidate = NameCandidate::new(name, SOURCE_ID);
        if let Some(language) = str_field(item, &["language", "lang"]) {
            candidate = candidate.with_language(language.to_lowercase());
        }
        if let Some(country) = str_field(item, &["country", "countryCode"]) {
            candidate = candidate.with_country(country);
        }
        out.push(candidate);
    }

    if let Some(single) = str_field(detail, &["common_name", "commonName"]) {
        out.push(
            NameCandidate::new(single, SOURCE_ID)
                .with_language("en")
                .preferred(true),
        );
    }

    for alias in array_field(detail, &["aliases", "synonyms"]) {
        if let Some(alias) = alias.as_str().map(str::trim).filter(|a| !a.is_empty()) {
            out.push(NameCandidate::new(alias, SOURCE_ID).with_language("en"));
        }
    }

    let mut seen = HashSet::new();
    out.retain(|c| seen.insert((c.text.to_lowercase(), c.locale().to_lowercase())));
    out
}

#[async_trait]
impl NameSource for PlantbookSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn persists_all_candidates(&self) -> bool {
        true
    }

    fn batch_concurrency(&self) -> usize {
        self.http.config().concurrency
    }

    /// Search by canonical name, then fetch the hit's detail; the search row
    /// stands in when the detail call fails.
    async fn lookup_by_name(&self, name: &str) -> Result<Option<NameMatch>> {
        let canonical = canonicalize(name);
        if canonical.is_empty() {
            return Ok(None);
        }
        let rows = self.search(&canonical).await?;
        let Some(hit) = pick_row(&rows, &canonical) else {
            return Ok(None);
        };

        let Some(pid) = pid_of(hit) else {
            return Ok(Some(
                NameMatch::keyed(canonical).with_record(SourceRecord::Json(hit.clone())),
            ));
        };
        let record = match self.detail(pid).await {
            Ok(Some(detail)) => detail,
            Ok(None) => hit.clone(),
            Err(e) => {
                warn!(
                    subsystem = "registry",
                    component = SOURCE_ID,
                    pid,
                    error = %e,
                    "Plant detail failed, using search row"
                );
                hit.clone()
            }
        };
        Ok(Some(
            NameMatch::keyed(pid).with_record(SourceRecord::Json(record)),
        ))
    }

    async fn lookup_by_key(&self, key: &str) -> Result<Option<SourceRecord>> {
        let pid = key.trim();
        if pid.is_empty() {
            return Ok(None);
        }
        Ok(self.detail(pid).await?.map(SourceRecord::Json))
    }

    fn extract_candidates(&self, record: &SourceRecord) -> Vec<NameCandidate> {
        match record {
            SourceRecord::Candidates(candidates) => candidates.clone(),
            SourceRecord::Json(detail) => plant_candidates(detail),
        }
    }
}
