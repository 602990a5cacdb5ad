//! taxa: seed plant entities and reconcile their display names against
//! naming sources.
//!
//! Exit code is 0 whenever a run completes, even with nothing updated;
//! non-zero only for setup failures (unreachable store, missing dump files,
//! unknown source ids).

mod approval;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use taxa_core::{config::parse_list, ApprovalGate, EngineConfig, EntityStore, NameSource};
use taxa_db::{Database, PoolConfig};
use taxa_dump::{backbone_files, BackboneOptions, LanguageFilter};
use taxa_engine::{seed_from_bundle, Engine};

use crate::approval::TerminalGate;

#[derive(Parser)]
#[command(name = "taxa")]
#[command(author, version, about = "Plant name reconciliation and write-back")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (overrides RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    /// PostgreSQL connection string
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Seed entities and scientific synonyms from a World Flora Online bundle
    SeedWfo {
        /// Directory holding taxon.tsv, name.tsv and optionally synonym.tsv
        #[arg(long)]
        path: PathBuf,

        /// Stop after this many accepted taxa
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Enrich from a GBIF backbone Darwin Core Archive directory
    EnrichDwca {
        /// Directory holding Taxon.tsv and VernacularName.tsv
        #[arg(long)]
        dir: PathBuf,

        /// Accepted vernacular languages, comma-separated
        #[arg(long, default_value = "en,eng")]
        lang: String,

        /// Use the best name in any language when none matches --lang
        #[arg(long)]
        allow_any_lang_fallback: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Enrich from the GBIF species API
    EnrichGbif {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Enrich from iNaturalist
    EnrichInat {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Enrich from ITIS
    EnrichItis {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Enrich from Wikidata
    EnrichWikidata {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Enrich from Open Plantbook (PLANTBOOK_API_KEY)
    EnrichPlantbook {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Enrich from several registries at once and keep the best name
    EnrichAll {
        /// Registry ids, comma-separated
        #[arg(long, default_value = "gbif,inat,itis,wikidata,plantbook")]
        sources: String,

        #[command(flatten)]
        run: RunArgs,
    },
}

/// Flags shared by every enrichment command.
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Stop after this many entities
    #[arg(long)]
    max_rows: Option<usize>,

    /// Only consider entities with this scientific name (canonical match)
    #[arg(long = "only-sci", value_name = "NAME")]
    only_sci: Option<String>,

    /// Overwrite display names that are already set
    #[arg(long)]
    force: bool,

    /// Write synonyms only; leave display names untouched
    #[arg(long)]
    no_display: bool,

    /// Confirm each display-name change on the terminal
    #[arg(long)]
    interactive: bool,
}

impl RunArgs {
    fn engine_config(&self) -> EngineConfig {
        let base = EngineConfig::from_env();
        let set_display = base.set_display && !self.no_display;
        base.with_max_rows(self.max_rows)
            .with_force(self.force)
            .with_only_scientific(self.only_sci.clone())
            .with_set_display(set_display)
    }

    fn engine(&self, store: Arc<dyn EntityStore>) -> Engine {
        let engine = Engine::new(store, self.engine_config());
        if self.interactive {
            let gate: Arc<dyn ApprovalGate> = Arc::new(TerminalGate::new());
            engine.with_gate(gate)
        } else {
            engine
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(subsystem = "cli", error = %format!("{:#}", e), "Run failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // fail on missing inputs before touching the database
    match &cli.command {
        Commands::EnrichDwca { dir, .. } => {
            backbone_files(dir)?;
        }
        Commands::SeedWfo { path, .. } if !path.is_dir() => {
            bail!("WFO bundle directory not found: {}", path.display());
        }
        _ => {}
    }
    let sources = registry_sources(&cli.command)?;

    let database_url = cli
        .database_url
        .context("DATABASE_URL is not set (use --database-url or .env)")?;
    let workers = EngineConfig::from_env().db_concurrency;
    let db = Database::connect_with_config(&database_url, PoolConfig::for_workers(workers))
        .await
        .context("connecting to the database")?;
    let store: Arc<dyn EntityStore> = Arc::new(db.plants.clone());

    match cli.command {
        Commands::Migrate => {
            db.migrate().await.context("applying migrations")?;
            info!(subsystem = "cli", "Migrations applied");
        }
        Commands::SeedWfo { path, limit } => {
            let config = EngineConfig::from_env();
            let report = seed_from_bundle(store, &config, &path, limit).await?;
            print_report(&report)?;
        }
        Commands::EnrichDwca {
            dir,
            lang,
            allow_any_lang_fallback,
            run,
        } => {
            let options = BackboneOptions {
                languages: LanguageFilter::new(parse_list(&lang)),
                allow_any_language: allow_any_lang_fallback,
                ..BackboneOptions::default()
            };
            let report = run.engine(store).run_backbone(&dir, options).await?;
            print_report(&report)?;
        }
        Commands::EnrichGbif { run }
        | Commands::EnrichInat { run }
        | Commands::EnrichItis { run }
        | Commands::EnrichWikidata { run }
        | Commands::EnrichPlantbook { run }
        | Commands::EnrichAll { run, .. } => {
            let report = run.engine(store).run(sources).await?;
            print_report(&report)?;
        }
    }
    taxa_db::log_pool_metrics(db.pool());
    Ok(())
}

/// Registry adapters named by a registry command; empty for the others.
fn registry_sources(command: &Commands) -> anyhow::Result<Vec<Arc<dyn NameSource>>> {
    let ids: Vec<String> = match command {
        Commands::EnrichGbif { .. } => vec![taxa_registry::gbif::SOURCE_ID.into()],
        Commands::EnrichInat { .. } => vec![taxa_registry::inat::SOURCE_ID.into()],
        Commands::EnrichItis { .. } => vec![taxa_registry::itis::SOURCE_ID.into()],
        Commands::EnrichWikidata { .. } => vec![taxa_registry::wikidata::SOURCE_ID.into()],
        Commands::EnrichPlantbook { .. } => vec![taxa_registry::plantbook::SOURCE_ID.into()],
        Commands::EnrichAll { sources, .. } => {
            let mut ids = parse_list(sources);
            let mut seen = std::collections::HashSet::new();
            ids.retain(|id| seen.insert(id.clone()));
            if ids.is_empty() {
                bail!("--sources lists no registries");
            }
            ids
        }
        _ => return Ok(Vec::new()),
    };
    ids.iter()
        .map(|id| taxa_registry::source_from_env(id).map_err(anyhow::Error::from))
        .collect()
}

fn print_report<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enrich_all() {
        let cli = Cli::try_parse_from([
            "taxa",
            "enrich-all",
            "--sources",
            "gbif,wikidata",
            "--max-rows",
            "50",
            "--only-sci",
            "Rosa canina",
            "--force",
            "--debug",
        ])
        .unwrap();
        assert!(cli.debug);
        let Commands::EnrichAll { sources, run } = cli.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(sources, "gbif,wikidata");
        assert_eq!(run.max_rows, Some(50));
        assert_eq!(run.only_sci.as_deref(), Some("Rosa canina"));
        assert!(run.force);
        assert!(!run.interactive);
    }

    #[test]
    fn test_parse_enrich_dwca_defaults() {
        let cli = Cli::try_parse_from(["taxa", "enrich-dwca", "--dir", "/data/backbone"]).unwrap();
        let Commands::EnrichDwca {
            dir,
            lang,
            allow_any_lang_fallback,
            ..
        } = cli.command
        else {
            panic!("wrong subcommand");
        };
        assert_eq!(dir, PathBuf::from("/data/backbone"));
        assert_eq!(lang, "en,eng");
        assert!(!allow_any_lang_fallback);
    }

    #[test]
    fn test_registry_sources_for_commands() {
        let command = Commands::EnrichAll {
            sources: "wikidata, GBIF,wikidata".into(),
            run: RunArgs {
                max_rows: None,
                only_sci: None,
                force: false,
                no_display: false,
                interactive: false,
            },
        };
        let ids: Vec<&str> = registry_sources(&command)
            .unwrap()
            .iter()
            .map(|s| s.source_id())
            .collect();
        assert_eq!(ids, vec!["wikidata", "gbif"]);

        assert!(registry_sources(&Commands::Migrate).unwrap().is_empty());

        let unknown = Commands::EnrichAll {
            sources: "usda".into(),
            run: RunArgs {
                max_rows: None,
                only_sci: None,
                force: false,
                no_display: false,
                interactive: false,
            },
        };
        assert!(registry_sources(&unknown).is_err());
    }
}
