//! ITIS JSON web service.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use taxa_core::{canonicalize, NameCandidate, NameMatch, NameSource, Result, SourceRecord};

use crate::client::{array_field, int_field, str_field, HttpClient};
use crate::config::RegistryConfig;

pub const SOURCE_ID: &str = "itis";

const SERVICE: &str = "/ITISWebService/jsonservice";

/// ITIS: scientific-name search for a TSN, then English common names.
pub struct ItisSource {
    http: HttpClient,
}

impl ItisSource {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(SOURCE_ID, config)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(RegistryConfig::itis_from_env())
    }

    async fn search(&self, name: &str) -> Result<Vec<JsonValue>> {
        let path = format!("{}/searchByScientificName", SERVICE);
        let body = self.http.get_json(&path, &[("srchKey", name)]).await?;
        // ITIS answers "no results" with `[null]`
        Ok(body
            .map(|b| {
                array_field(&b, &["scientificNames"])
                    .iter()
                    .filter(|r| r.is_object())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn combined_name(row: &JsonValue) -> &str {
    str_field(row, &["combinedName", "combinedname", "sciName", "scientificName"]).unwrap_or("")
}

/// Row whose canonical combined name matches `name`, else the first row.
fn pick_tsn(results: &[JsonValue], name: &str) -> Option<String> {
    let target = canonicalize(name).to_lowercase();
    let row = results
        .iter()
        .find(|r| canonicalize(combined_name(r)).to_lowercase() == target)
        .or_else(|| results.first())?;
    int_field(row, &["tsn"])
        .map(|tsn| tsn.to_string())
        .or_else(|| str_field(row, &["tsn"]).map(str::to_string))
}

#[async_trait]
impl NameSource for ItisSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn batch_concurrency(&self) -> usize {
        self.http.config().concurrency
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<NameMatch>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let mut results = self.search(name).await?;
        if results.is_empty() {
            let binomial = canonicalize(name);
            if !binomial.is_empty() && binomial != name {
                results = self.search(&binomial).await?;
            }
        }
        Ok(pick_tsn(&results, name).map(NameMatch::keyed))
    }

    async fn lookup_by_key(&self, key: &str) -> Result<Option<SourceRecord>> {
        let tsn = key.trim();
        if tsn.is_empty() {
            return Ok(None);
        }
        let path = format!("{}/getCommonNamesForTSN", SERVICE);
        let body = self.http.get_json(&path, &[("tsn", tsn)]).await?;
        Ok(body.map(SourceRecord::Json))
    }

    fn extract_candidates(&self, record: &SourceRecord) -> Vec<NameCandidate> {
        match record {
            SourceRecord::Candidates(candidates) => candidates.clone(),
            SourceRecord::Json(body) => array_field(body, &["commonNames"])
                .iter()
                .filter(|row| {
                    str_field(row, &["language"])
                        .is_some_and(|l| l.to_lowercase().starts_with("english"))
                })
                .filter_map(|row| str_field(row, &["commonName"]))
                .map(|name| NameCandidate::new(name, SOURCE_ID).with_language("en"))
                .collect(),
        }
    }
}
