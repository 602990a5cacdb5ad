//! Wikidata Query Service (SPARQL).
//!
//! English taxon common names (`P1843`) looked up either by GBIF taxon id
//! (`P846`, matching the entity's cached external key) or by exact taxon
//! name (`P225`). Lookups are batched into one query per `batch_size`
//! inputs; the client's minimum interval spaces successive queries.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;

use taxa_core::{
    canonicalize, defaults, Error, Lookup, NameCandidate, NameMatch, NameSource, Result,
    SourceRecord,
};

use crate::client::{array_field, HttpClient};
use crate::config::RegistryConfig;

pub const SOURCE_ID: &str = "wikidata";

const SPARQL_PATH: &str = "/sparql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    GbifKey,
    TaxonName,
}

impl Property {
    fn var(self) -> &'static str {
        match self {
            Property::GbifKey => "gbif",
            Property::TaxonName => "sci",
        }
    }

    fn pid(self) -> &'static str {
        match self {
            Property::GbifKey => "P846",
            Property::TaxonName => "P225",
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// SPARQL selecting `?<var> ?common` for the given values of `property`.
fn build_query(property: Property, values: &BTreeSet<String>) -> String {
    let var = property.var();
    let values = values
        .iter()
        .map(|v| format!("\"{}\"", escape(v)))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "PREFIX wdt: <http://www.wikidata.org/prop/direct/>\n\
         SELECT ?{var} ?common WHERE {{\n  \
           ?taxon wdt:{pid} ?{var} ;\n         wdt:P1843 ?common .\n  \
           FILTER(lang(?common) = \"en\")\n  \
           VALUES ?{var} {{ {values} }}\n\
         }}",
        var = var,
        pid = property.pid(),
        values = values,
    )
}

/// `value -> [common names]` from a SPARQL JSON result.
fn parse_bindings(body: &JsonValue, property: Property) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    let bindings = body
        .get("results")
        .map(|r| array_field(r, &["bindings"]))
        .unwrap_or(&[]);
    for binding in bindings {
        let value = |name: &str| {
            binding
                .get(name)
                .and_then(|b| b.get("value"))
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        if let (Some(key), Some(common)) = (value(property.var()), value("common")) {
            out.entry(key.to_string())
                .or_default()
                .push(common.to_string());
        }
    }
    out
}

fn candidates(names: impl IntoIterator<Item = String>) -> Vec<NameCandidate> {
    let mut seen = BTreeSet::new();
    names
        .into_iter()
        .filter(|n| seen.insert(n.to_lowercase()))
        .map(|n| NameCandidate::new(n, SOURCE_ID).with_language("en"))
        .collect()
}

fn batch_error(error: &Error) -> Error {
    if error.is_transient() {
        Error::Transient(error.to_string())
    } else {
        Error::Registry(error.to_string())
    }
}

/// Wikidata English labels for taxa.
pub struct WikidataSource {
    http: HttpClient,
    batch_size: usize,
}

impl WikidataSource {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(SOURCE_ID, config)?,
            batch_size: defaults::WIKIDATA_BATCH,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(RegistryConfig::wikidata_from_env())
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    async fn fetch(
        &self,
        property: Property,
        values: &BTreeSet<String>,
    ) -> Result<HashMap<String, Vec<String>>> {
        if values.is_empty() {
            return Ok(HashMap::new());
        }
        let query = build_query(property, values);
        let body = self
            .http
            .get_json(SPARQL_PATH, &[("query", query.as_str()), ("format", "json")])
            .await?;
        Ok(body
            .map(|b| parse_bindings(&b, property))
            .unwrap_or_default())
    }
}

#[async_trait]
impl NameSource for WikidataSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    /// Cached keys are GBIF taxon ids, which Wikidata indexes as `P846`.
    fn accepts_external_key(&self) -> bool {
        true
    }

    fn batch_concurrency(&self) -> usize {
        1
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<NameMatch>> {
        self.lookup_names(&[name.to_string()])
            .await
            .pop()
            .map(|(_, result)| result)
            .unwrap_or(Ok(None))
    }

    async fn lookup_by_key(&self, key: &str) -> Result<Option<SourceRecord>> {
        self.lookup_keys(&[key.to_string()])
            .await
            .pop()
            .map(|(_, result)| result)
            .unwrap_or(Ok(None))
    }

    fn extract_candidates(&self, record: &SourceRecord) -> Vec<NameCandidate> {
        match record {
            SourceRecord::Candidates(candidates) => candidates.clone(),
            SourceRecord::Json(body) => candidates(
                parse_bindings(body, Property::TaxonName)
                    .into_values()
                    .flatten(),
            ),
        }
    }

    /// One query per batch, asking for both the full and the canonical form
    /// of every name.
    async fn lookup_names(&self, names: &[String]) -> Vec<Lookup<NameMatch>> {
        let mut out = Vec::with_capacity(names.len());
        for chunk in names.chunks(self.batch_size) {
            let forms = |name: &str| {
                let full = name.trim().to_string();
                let canonical = canonicalize(&full);
                [full, canonical]
            };
            let values: BTreeSet<String> = chunk
                .iter()
                .flat_map(|n| forms(n))
                .filter(|v| !v.is_empty())
                .collect();

            match self.fetch(Property::TaxonName, &values).await {
                Ok(found) => {
                    for name in chunk {
                        let mut seen_forms = BTreeSet::new();
                        let commons = forms(name)
                            .into_iter()
                            .filter(|f| seen_forms.insert(f.clone()))
                            .filter_map(|f| found.get(&f).cloned())
                            .flatten();
                        let labels = candidates(commons);
                        let result = (!labels.is_empty()).then(|| {
                            NameMatch::keyed(name.trim())
                                .with_record(SourceRecord::Candidates(labels))
                        });
                        out.push((name.clone(), Ok(result)));
                    }
                }
                Err(e) => {
                    warn!(
                        subsystem = "registry",
                        component = SOURCE_ID,
                        op = "names",
                        batch = chunk.len(),
                        error = %e,
                        "SPARQL batch failed"
                    );
                    out.extend(chunk.iter().map(|n| (n.clone(), Err(batch_error(&e)))));
                }
            }
        }
        out
    }

    async fn lookup_keys(&self, keys: &[String]) -> Vec<Lookup<SourceRecord>> {
        let mut out = Vec::with_capacity(keys.len());
        let (valid, invalid): (Vec<&String>, Vec<&String>) = keys
            .iter()
            .partition(|k| k.trim().parse::<i64>().is_ok());
        out.extend(invalid.into_iter().map(|k| (k.clone(), Ok(None))));

        for chunk in valid.chunks(self.batch_size) {
            let values: BTreeSet<String> = chunk.iter().map(|k| k.trim().to_string()).collect();
            match self.fetch(Property::GbifKey, &values).await {
                Ok(found) => {
                    for key in chunk {
                        let record = found
                            .get(key.trim())
                            .map(|commons| candidates(commons.iter().cloned()))
                            .filter(|c| !c.is_empty())
                            .map(SourceRecord::Candidates);
                        out.push(((*key).clone(), Ok(record)));
                    }
                }
                Err(e) => {
                    warn!(
                        subsystem = "registry",
                        component = SOURCE_ID,
                        op = "keys",
                        batch = chunk.len(),
                        error = %e,
                        "SPARQL batch failed"
                    );
                    out.extend(chunk.iter().map(|k| ((*k).clone(), Err(batch_error(&e)))));
                }
            }
        }
        out
    }
}
