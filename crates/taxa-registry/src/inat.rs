//! iNaturalist taxa API.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use taxa_core::{NameCandidate, NameMatch, NameSource, Result, SourceRecord};

use crate::client::{array_field, int_field, str_field, HttpClient};
use crate::config::RegistryConfig;

pub const SOURCE_ID: &str = "inat";

const TAXA_PATH: &str = "/v1/taxa";

/// iNaturalist taxon search. The match response already carries the
/// localized names, so the detail lookup is only used for cached ids.
pub struct InatSource {
    http: HttpClient,
}

impl InatSource {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(SOURCE_ID, config)?,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(RegistryConfig::inat_from_env())
    }

    async fn search(&self, param: &str, name: &str) -> Result<Vec<JsonValue>> {
        let body = self
            .http
            .get_json(TAXA_PATH, &[(param, name), ("locale", "en")])
            .await?;
        Ok(body
            .map(|b| array_field(&b, &["results"]).to_vec())
            .unwrap_or_default())
    }
}

/// Exact case-insensitive `name` match, else the first result.
fn pick_taxon<'a>(results: &'a [JsonValue], name: &str) -> Option<&'a JsonValue> {
    let wanted = name.trim().to_lowercase();
    results
        .iter()
        .find(|t| str_field(t, &["name"]).is_some_and(|n| n.to_lowercase() == wanted))
        .or_else(|| results.first())
}

#[async_trait]
impl NameSource for InatSource {
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
        let mut results = self.search("name", name).await?;
        if results.is_empty() {
            results = self.search("q", name).await?;
        }
        let Some(taxon) = pick_taxon(&results, name) else {
            return Ok(None);
        };
        let key = int_field(taxon, &["id"])
            .map(|id| id.to_string())
            .unwrap_or_else(|| name.to_string());
        Ok(Some(
            NameMatch::keyed(key).with_record(SourceRecord::Json(taxon.clone())),
        ))
    }

    async fn lookup_by_key(&self, key: &str) -> Result<Option<SourceRecord>> {
        let Ok(id) = key.trim().parse::<i64>() else {
            return Ok(None);
        };
        let path = format!("{}/{}", TAXA_PATH, id);
        let body = self.http.get_json(&path, &[("locale", "en")]).await?;
        Ok(body
            .and_then(|b| array_field(&b, &["results"]).first().cloned())
            .map(SourceRecord::Json))
    }

    fn extract_candidates(&self, record: &SourceRecord) -> Vec<NameCandidate> {
        let taxon = match record {
            SourceRecord::Candidates(candidates) => return candidates.clone(),
            SourceRecord::Json(taxon) => taxon,
        };

        let mut out = Vec::new();
        if let Some(common) = str_field(taxon, &["preferred_common_name"]) {
            out.push(
                NameCandidate::new(common, SOURCE_ID)
                    .with_language("en")
                    .preferred(true),
            );
        }
        let names = array_field(taxon, &["names"])
            .iter()
            .chain(array_field(taxon, &["taxon_names"]));
        for entry in names {
            let english = str_field(entry, &["lexicon"])
                .is_some_and(|l| l.eq_ignore_ascii_case("english"));
            if !english {
                continue;
            }
            if let Some(name) = str_field(entry, &["name"]) {
                out.push(NameCandidate::new(name, SOURCE_ID).with_language("en"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pick_taxon_prefers_exact_name() {
        let results = vec![
            json!({"id": 1, "name": "Rosa"}),
            json!({"id": 2, "name": "Rosa Canina"}),
        ];
        assert_eq!(pick_taxon(&results, "rosa canina").unwrap()["id"], 2);
        assert_eq!(pick_taxon(&results, "Rosa rubiginosa").unwrap()["id"], 1);
        assert!(pick_taxon(&[], "Rosa").is_none());
    }

    #[test]
    fn test_extract_preferred_and_english_lexicon() {
        let source = InatSource::new(RegistryConfig::new("http://127.0.0.1:9")).unwrap();
        let record = SourceRecord::Json(json!({
            "id": 2,
            "preferred_common_name": "Dog Rose",
            "names": [
                {"name": "Dog briar", "lexicon": "English"},
                {"name": "Hunds-Rose", "lexicon": "German"}
            ],
            "taxon_names": [{"name": "Common briar", "lexicon": "english"}]
        }));
        let texts: Vec<String> = source
            .extract_candidates(&record)
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["Dog Rose", "Dog briar", "Common briar"]);
    }
}
