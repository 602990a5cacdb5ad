//! Dump bundles on disk: backbone directory and WFO bundle.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use taxa_core::{Error, NameSource, SourceRecord};
use taxa_dump::{read_bundle, BackboneIndex, BackboneOptions, IndexedSource};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn backbone_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "Taxon.tsv",
        "taxonID\tacceptedNameUsageID\tkingdom\ttaxonRank\tcanonicalName\n\
         100\t\tPlantae\tspecies\tSaintpaulia ionantha\n\
         101\t100\tPlantae\tspecies\tSaintpaulia kewensis\n\
         200\t\tPlantae\tspecies\tRosa canina\n\
         300\t\tPlantae\tspecies\tQuercus robur\n",
    );
    write(
        dir.path(),
        "VernacularName.tsv",
        "taxonID\tvernacularName\tlanguage\tcountryCode\tisPreferredName\n\
         100\tAfrican Violet\ten\tUS\ttrue\n\
         100\tVioleta Africana\tes\t\t\n\
         200\tEglantier\tfr\t\t\n\
         300\tEnglish oak\ten\tGB\t\n",
    );
    dir
}

fn wanted(names: &[&str]) -> HashSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn test_backbone_name_lookup_picks_best_candidate() {
    let dir = backbone_dir();
    let index = BackboneIndex::load(
        dir.path(),
        &wanted(&["Saintpaulia ionantha", "Rosa canina"]),
        &BackboneOptions::default(),
    )
    .unwrap();
    let source = IndexedSource::new(Arc::new(index), false);

    let matched = source
        .lookup_by_name("Saintpaulia ionantha subsp. grandifolia")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(matched.usage_key, Some(100));
    let record = matched.record.unwrap();
    let candidates = source.extract_candidates(&record);
    assert_eq!(candidates[0].text, "African Violet");

    // only a French name, no any-language fallback
    assert!(source.lookup_by_name("Rosa canina").await.unwrap().is_none());
    // not in the wanted set, so never indexed
    assert!(source.lookup_by_name("Quercus robur").await.unwrap().is_none());
}

#[tokio::test]
async fn test_backbone_any_language_fallback() {
    let dir = backbone_dir();
    let options = BackboneOptions {
        allow_any_language: true,
        ..BackboneOptions::default()
    };
    let index = BackboneIndex::load(dir.path(), &wanted(&["rosa canina"]), &options).unwrap();
    let source = IndexedSource::new(Arc::new(index), true);

    let matched = source.lookup_by_name("Rosa canina").await.unwrap().unwrap();
    match matched.record {
        Some(SourceRecord::Candidates(c)) => assert_eq!(c[0].text, "Eglantier"),
        other => panic!("unexpected record: {other:?}"),
    }
}

#[tokio::test]
async fn test_backbone_follows_accepted_redirect_and_checks_cached_keys() {
    let dir = backbone_dir();
    let index = BackboneIndex::load(
        dir.path(),
        &wanted(&["Saintpaulia kewensis", "Rosa canina"]),
        &BackboneOptions::default(),
    )
    .unwrap();
    let source = IndexedSource::new(Arc::new(index), false);

    // 101 has no vernaculars of its own and redirects to 100
    let record = source.lookup_by_key("101").await.unwrap().unwrap();
    assert_eq!(source.extract_candidates(&record)[0].text, "African Violet");

    assert!(source.honours_key(101, "Saintpaulia kewensis"));
    assert!(!source.honours_key(200, "Saintpaulia kewensis"));
    assert!(source.lookup_by_key("not-a-key").await.unwrap().is_none());
}

#[test]
fn test_backbone_missing_vernacular_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "Taxon.tsv", "taxonID\n1\n");
    let err = BackboneIndex::load(dir.path(), &wanted(&["Rosa canina"]), &BackboneOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(ref msg) if msg.contains("VernacularName.tsv")));
}

fn wfo_dir(with_synonyms: bool) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "taxon.tsv",
        "ID\tnameID\n\
         t1\tn1\n\
         t2\tn2\n\
         t3\tn3\n\
         t4\t\n",
    );
    write(
        dir.path(),
        "name.tsv",
        "ID\tfullName\tgenus\tspecificEpithet\trank\n\
         n1\tRosa canina\t\t\tspecies\n\
         n2\t\tMentha\tpiperita\tnothospecies\n\
         n3\tRosa\t\t\tgenus\n\
         n4\tRosa lutetiana\t\t\tspecies\n\
         n5\tRosa canina\t\t\tspecies\n",
    );
    if with_synonyms {
        write(
            dir.path(),
            "synonym.tsv",
            "acceptedTaxonID\tsynonymNameID\n\
             t1\tn4\n\
             t1\tn4\n\
             t1\tn5\n\
             t3\tn4\n\
             t9\tn4\n",
        );
    }
    dir
}

#[test]
fn test_wfo_bundle_reads_species_like_accepted_and_synonyms() {
    let dir = wfo_dir(true);
    let seed = read_bundle(dir.path(), None).unwrap();

    let names: Vec<&str> = seed
        .accepted
        .iter()
        .map(|a| a.scientific_name.as_str())
        .collect();
    assert_eq!(names, vec!["Rosa canina", "Mentha piperita"]);

    // duplicates collapsed; synonym equal to the accepted name dropped;
    // genus-rank and unknown taxa ignored
    assert_eq!(
        seed.synonyms,
        vec![("Rosa canina".to_string(), "Rosa lutetiana".to_string())]
    );
}

#[test]
fn test_wfo_bundle_without_synonym_file() {
    let dir = wfo_dir(false);
    let seed = read_bundle(dir.path(), Some(1)).unwrap();
    assert_eq!(seed.accepted.len(), 1);
    assert!(seed.synonyms.is_empty());
}

#[test]
fn test_wfo_bundle_requires_name_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "taxon.tsv", "ID\tnameID\n");
    let err = read_bundle(dir.path(), None).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
