//! World Flora Online bundle reader (`taxon.tsv`, `name.tsv`, `synonym.tsv`).
//!
//! Produces accepted species-like scientific names to seed as entities, and
//! the scientific synonyms attached to them.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use taxa_core::{defaults, Error, Result};
use tracing::{info, warn};

use crate::tsv::{Record, TsvReader};

/// An accepted taxon to seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedTaxon {
    pub taxon_id: String,
    pub scientific_name: String,
}

/// Contents of a bundle, filtered to species-like accepted taxa.
#[derive(Debug, Default, Clone)]
pub struct WfoSeed {
    pub accepted: Vec<AcceptedTaxon>,
    /// `(accepted scientific name, synonym scientific name)`
    pub synonyms: Vec<(String, String)>,
}

fn first_existing(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    names.iter().map(|n| dir.join(n)).find(|p| p.is_file())
}

fn required(dir: &Path, names: &[&str]) -> Result<PathBuf> {
    first_existing(dir, names)
        .ok_or_else(|| Error::NotFound(format!("{} not found in {}", names[0], dir.display())))
}

/// Column positions of `name.tsv`.
struct NameColumns {
    id: Option<usize>,
    full: Option<usize>,
    genus: Option<usize>,
    epithet: Option<usize>,
    uninomial: Option<usize>,
    rank: Option<usize>,
}

impl NameColumns {
    fn resolve<R: std::io::BufRead>(reader: &TsvReader<R>) -> Self {
        Self {
            id: reader.column(&["ID", "nameID", "nameId"]),
            full: reader.column(&["fullName", "scientificName", "name", "scientific name"]),
            genus: reader.column(&["genus"]),
            epithet: reader.column(&["specificEpithet", "speciesEpithet"]),
            uninomial: reader.column(&["uninomial"]),
            rank: reader.column(&["rank", "taxonRank", "nameRank", "rankName"]),
        }
    }

    /// `(scientific name, lowercase rank)`, building the name from parts when
    /// no full-name column is filled.
    fn read(&self, record: &Record) -> Option<(String, String)> {
        let mut name = record.get(self.full).to_string();
        if name.is_empty() {
            let genus = record.get(self.genus);
            let epithet = record.get(self.epithet);
            let uninomial = record.get(self.uninomial);
            if !genus.is_empty() && !epithet.is_empty() {
                name = format!("{genus} {epithet}");
            } else if !uninomial.is_empty() {
                name = uninomial.to_string();
            }
        }
        if name.is_empty() {
            return None;
        }
        Some((name, record.get(self.rank).to_lowercase()))
    }
}

/// Names for the requested ids, in one pass over `name.tsv`.
fn read_names(path: &Path, wanted: &HashSet<String>) -> Result<HashMap<String, (String, String)>> {
    let mut reader = TsvReader::open(path)?;
    let columns = NameColumns::resolve(&reader);
    let mut names = HashMap::with_capacity(wanted.len());
    while let Some(record) = reader.next_record()? {
        let id = record.get(columns.id);
        if id.is_empty() || !wanted.contains(id) {
            continue;
        }
        if let Some(entry) = columns.read(&record) {
            names.insert(id.to_string(), entry);
        }
    }
    Ok(names)
}

fn is_species_like(rank: &str) -> bool {
    defaults::SPECIES_RANKS.contains(&rank)
}

/// Read a bundle directory. `taxon.tsv` and `name.tsv` are required;
/// `synonym.tsv` is optional. `limit` caps the accepted taxa kept.
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn read_bundle(dir: &Path, limit: Option<usize>) -> Result<WfoSeed> {
    let start = Instant::now();
    let taxon_path = required(dir, &["taxon.tsv", "taxon.txt"])?;
    let name_path = required(dir, &["name.tsv", "names.tsv"])?;

    // taxon concept id -> name id
    let mut reader = TsvReader::open(&taxon_path)?;
    let id_col = reader.column(&["ID", "taxonID", "taxonId"]);
    let name_col = reader.column(&["nameID", "nameId", "name_id"]);
    if id_col.is_none() || name_col.is_none() {
        return Err(Error::InvalidInput(format!(
            "{} has no ID/nameID columns",
            taxon_path.display()
        )));
    }
    let mut taxa: Vec<(String, String)> = Vec::new();
    while let Some(record) = reader.next_record()? {
        let (tid, nid) = (record.get(id_col), record.get(name_col));
        if !tid.is_empty() && !nid.is_empty() {
            taxa.push((tid.to_string(), nid.to_string()));
        }
    }

    let needed: HashSet<String> = taxa.iter().map(|(_, nid)| nid.clone()).collect();
    let mut names = read_names(&name_path, &needed)?;

    let mut accepted: Vec<AcceptedTaxon> = taxa
        .iter()
        .filter_map(|(tid, nid)| {
            let (name, rank) = names.get(nid)?;
            is_species_like(rank).then(|| AcceptedTaxon {
                taxon_id: tid.clone(),
                scientific_name: name.clone(),
            })
        })
        .collect();
    if let Some(limit) = limit {
        accepted.truncate(limit);
    }

    let synonyms = match first_existing(dir, &["synonym.tsv", "synonyms.tsv"]) {
        Some(path) => read_synonyms(&path, &name_path, &accepted, &mut names)?,
        None => {
            info!(
                subsystem = "dump",
                component = "wfo",
                "No synonym.tsv found, skipping synonyms"
            );
            Vec::new()
        }
    };

    info!(
        subsystem = "dump",
        component = "wfo",
        op = "read_bundle",
        taxa = taxa.len(),
        accepted = accepted.len(),
        synonyms = synonyms.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "WFO bundle read"
    );
    Ok(WfoSeed { accepted, synonyms })
}

fn read_synonyms(
    path: &Path,
    name_path: &Path,
    accepted: &[AcceptedTaxon],
    names: &mut HashMap<String, (String, String)>,
) -> Result<Vec<(String, String)>> {
    let by_taxon: HashMap<&str, &str> = accepted
        .iter()
        .map(|a| (a.taxon_id.as_str(), a.scientific_name.as_str()))
        .collect();

    let mut reader = TsvReader::open(path)?;
    let taxon_col = reader.find_column(|c| c.contains("taxon") && c.contains("id"));
    let name_col = reader.find_column(|c| c.contains("name") && c.contains("id"));
    if taxon_col.is_none() || name_col.is_none() {
        warn!(
            subsystem = "dump",
            component = "wfo",
            path = %path.display(),
            "Could not find taxon/name id columns in synonym file, skipping synonyms"
        );
        return Ok(Vec::new());
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut missing: HashSet<String> = HashSet::new();
    while let Some(record) = reader.next_record()? {
        let (tid, nid) = (record.get(taxon_col), record.get(name_col));
        if tid.is_empty() || nid.is_empty() || !by_taxon.contains_key(tid) {
            continue;
        }
        if !names.contains_key(nid) {
            missing.insert(nid.to_string());
        }
        pairs.push((tid.to_string(), nid.to_string()));
    }

    if !missing.is_empty() {
        names.extend(read_names(name_path, &missing)?);
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::with_capacity(pairs.len());
    for (tid, nid) in pairs {
        let (Some(accepted_name), Some((synonym, _))) = (by_taxon.get(tid.as_str()), names.get(&nid))
        else {
            continue;
        };
        let synonym = synonym.trim();
        if synonym.is_empty() || synonym.eq_ignore_ascii_case(accepted_name.trim()) {
            continue;
        }
        if seen.insert((accepted_name.to_string(), synonym.to_lowercase())) {
            out.push((accepted_name.to_string(), synonym.to_string()));
        }
    }
    Ok(out)
}
