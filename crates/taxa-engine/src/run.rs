//! Run driver: paging, gating, budget, and the resolve/aggregate/write loop.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taxa_core::{
    canonicalize, ApprovalGate, AutoApprove, EngineConfig, Entity, EntityStore, Error, NameSource,
    Result, WriteReport,
};
use taxa_dump::{backbone_files, BackboneIndex, BackboneOptions, IndexedSource};

use crate::aggregator::Aggregator;
use crate::coordinator::{retry_transient, RowBudget};
use crate::resolver::{wanted_names, Resolution, SourceResolver};
use crate::writeback::{read_scientific_synonyms, BatchWriteBack};

/// Row counts gathered while scanning the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunDiagnostics {
    pub pages: usize,
    pub scanned: usize,
    pub with_scientific: usize,
    pub without_scientific: usize,
    pub blank_display: usize,
    /// Rows passing the gating rule.
    pub needed: usize,
    /// Needed rows actually handed to the resolvers (after the row budget).
    pub processed: usize,
}

impl RunDiagnostics {
    /// Count a page and keep only rows that need enrichment.
    fn gate(&mut self, rows: Vec<Entity>, force: bool) -> Vec<Entity> {
        self.scanned += rows.len();
        rows.into_iter()
            .filter(|e| {
                let has_scientific = !e.scientific_name.trim().is_empty();
                if has_scientific {
                    self.with_scientific += 1;
                } else {
                    self.without_scientific += 1;
                }
                if e.display_name.trim().is_empty() {
                    self.blank_display += 1;
                }
                let needed = has_scientific && e.needs_update(force);
                if needed {
                    self.needed += 1;
                }
                needed
            })
            .collect()
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub diagnostics: RunDiagnostics,
    pub decisions: usize,
    /// Decisions won per source id.
    pub wins: BTreeMap<String, usize>,
    /// Decisions that came from a synonym rather than the primary name.
    pub via_synonym: usize,
    pub displays_proposed: usize,
    pub displays_rejected: usize,
    pub writes: WriteReport,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Reconciles entities in a store against naming sources.
pub struct Engine {
    store: Arc<dyn EntityStore>,
    config: EngineConfig,
    gate: Arc<dyn ApprovalGate>,
}

/// Per-run collaborators shared by every batch.
struct RunState {
    resolvers: Vec<SourceResolver>,
    aggregator: Aggregator,
    writer: BatchWriteBack,
    report: RunReport,
}

/// Walks the store page by page, or once for a focused name.
struct Scanner {
    offset: i64,
    done: bool,
    budget: RowBudget,
}

impl Engine {
    pub fn new(store: Arc<dyn EntityStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            gate: Arc::new(AutoApprove),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enrich every entity that needs it from `sources`, one page at a time.
    ///
    /// Fails only when the store cannot be reached at startup or no source
    /// is given; every per-entity and per-chunk failure is logged and skipped.
    pub async fn run(&self, sources: Vec<Arc<dyn NameSource>>) -> Result<RunReport> {
        if sources.is_empty() {
            return Err(Error::InvalidInput("no naming sources given".into()));
        }
        self.ping().await?;

        let start = Instant::now();
        let started_at = Utc::now();
        let source_ids: Vec<&str> = sources.iter().map(|s| s.source_id()).collect();
        info!(
            subsystem = "engine",
            component = "run",
            sources = ?source_ids,
            max_rows = ?self.config.max_rows,
            force = self.config.force,
            only_scientific = ?self.config.only_scientific,
            "Run started"
        );

        let mut state = self.run_state(sources);
        let mut scanner = Scanner::new(self.config.max_rows);
        while let Some(batch) = self.next_batch(&mut scanner, &mut state.report.diagnostics).await {
            let ids: Vec<Uuid> = batch.iter().map(|e| e.id).collect();
            let synonyms = read_scientific_synonyms(&self.store, &ids, &self.config).await;
            self.process(&batch, &synonyms, &mut state).await;
        }

        self.finish(state.report, start, started_at)
    }

    /// Enrich from a Darwin Core Archive backbone directory.
    ///
    /// Collects every needed entity first so the dump is streamed once,
    /// indexing only the names this run will ask for.
    pub async fn run_backbone(&self, dir: &Path, options: BackboneOptions) -> Result<RunReport> {
        backbone_files(dir)?;
        self.ping().await?;
        let start = Instant::now();
        let started_at = Utc::now();

        let mut diagnostics = RunDiagnostics::default();
        let mut scanner = Scanner::new(self.config.max_rows);
        let mut entities = Vec::new();
        while let Some(batch) = self.next_batch(&mut scanner, &mut diagnostics).await {
            entities.extend(batch);
        }
        let ids: Vec<Uuid> = entities.iter().map(|e| e.id).collect();
        let synonyms = read_scientific_synonyms(&self.store, &ids, &self.config).await;
        let wanted = wanted_names(&entities, &synonyms);
        info!(
            subsystem = "engine",
            component = "run",
            entities = entities.len(),
            wanted_names = wanted.len(),
            dir = %dir.display(),
            "Loading backbone"
        );

        let allow_any = options.allow_any_language;
        let index = load_backbone(dir.to_path_buf(), wanted, options).await?;
        let source: Arc<dyn NameSource> = Arc::new(IndexedSource::new(Arc::new(index), allow_any));

        let mut state = self.run_state(vec![source]);
        state.report.diagnostics = diagnostics;
        for batch in entities.chunks(self.config.page_size) {
            self.process(batch, &synonyms, &mut state).await;
        }

        self.finish(state.report, start, started_at)
    }

    async fn ping(&self) -> Result<()> {
        self.store.ping().await.map_err(|e| {
            error!(
                subsystem = "engine",
                component = "run",
                error = %e,
                "Store unreachable, aborting"
            );
            match e {
                Error::StoreUnavailable(_) => e,
                other => Error::StoreUnavailable(other.to_string()),
            }
        })
    }

    fn run_state(&self, sources: Vec<Arc<dyn NameSource>>) -> RunState {
        RunState {
            resolvers: sources
                .into_iter()
                .map(|s| SourceResolver::new(s, self.config.synonym_limit))
                .collect(),
            aggregator: Aggregator::new(self.config.clone(), self.gate.clone()),
            writer: BatchWriteBack::new(self.store.clone(), self.config.clone()),
            report: RunReport::default(),
        }
    }

    /// Next batch of needed entities, or None when the scan is over.
    async fn next_batch(
        &self,
        scanner: &mut Scanner,
        diagnostics: &mut RunDiagnostics,
    ) -> Option<Vec<Entity>> {
        while !scanner.done {
            if scanner.budget.exhausted() {
                info!(
                    subsystem = "engine",
                    component = "run",
                    max_rows = ?self.config.max_rows,
                    "Row budget reached"
                );
                scanner.done = true;
                break;
            }

            let mut needed = match &self.config.only_scientific {
                Some(focus) => {
                    scanner.done = true;
                    self.focus_batch(focus, diagnostics).await
                }
                None => self.page_batch(scanner, diagnostics).await,
            };
            let granted = scanner.budget.take(needed.len());
            needed.truncate(granted);
            diagnostics.processed += needed.len();
            if !needed.is_empty() {
                return Some(needed);
            }
        }
        None
    }

    async fn page_batch(&self, scanner: &mut Scanner, diagnostics: &mut RunDiagnostics) -> Vec<Entity> {
        let limit = self.config.page_size.max(1) as i64;
        let offset = scanner.offset;
        let store = self.store.as_ref();
        let page = match retry_transient(&self.config, "fetch_page", || store.fetch_page(offset, limit)).await {
            Ok(page) => page,
            Err(e) => {
                error!(
                    subsystem = "engine",
                    component = "run",
                    offset,
                    error = %e,
                    "Page read failed, stopping scan"
                );
                scanner.done = true;
                return Vec::new();
            }
        };

        diagnostics.pages += 1;
        scanner.offset += page.len() as i64;
        if (page.len() as i64) < limit {
            scanner.done = true;
        }
        let rows = page.len();
        let needed = diagnostics.gate(page, self.config.force);
        info!(
            subsystem = "engine",
            component = "run",
            offset,
            row_count = rows,
            needed = needed.len(),
            "Page scanned"
        );
        needed
    }

    /// Entities whose canonical key equals the focus name's.
    ///
    /// Walks every page and compares canonical keys, so hybrid signs, authors
    /// and irregular spacing in stored names still match.
    async fn focus_batch(&self, focus: &str, diagnostics: &mut RunDiagnostics) -> Vec<Entity> {
        let canonical = canonicalize(focus).to_lowercase();
        if canonical.is_empty() {
            warn!(
                subsystem = "engine",
                component = "run",
                focus,
                "Focus name is empty after canonicalization"
            );
            return Vec::new();
        }

        let limit = self.config.page_size.max(1) as i64;
        let store = self.store.as_ref();
        let mut offset = 0i64;
        let mut rows_read = 0usize;
        let mut matching: Vec<Entity> = Vec::new();
        loop {
            let page = match retry_transient(&self.config, "fetch_page", || store.fetch_page(offset, limit)).await {
                Ok(page) => page,
                Err(e) => {
                    error!(
                        subsystem = "engine",
                        component = "run",
                        focus,
                        offset,
                        error = %e,
                        "Page read failed during focus scan"
                    );
                    break;
                }
            };
            diagnostics.pages += 1;
            let len = page.len();
            rows_read += len;
            offset += len as i64;
            matching.extend(
                page.into_iter()
                    .filter(|e| e.canonical_key().to_lowercase() == canonical),
            );
            if (len as i64) < limit {
                break;
            }
        }
        debug!(
            subsystem = "engine",
            component = "run",
            focus,
            canonical = %canonical,
            row_count = rows_read,
            matches = matching.len(),
            "Focus scan complete"
        );

        let candidates = matching.clone();
        let needed = diagnostics.gate(matching, self.config.force);
        if needed.is_empty() {
            if candidates.is_empty() {
                warn!(
                    subsystem = "engine",
                    component = "run",
                    focus,
                    canonical = %canonical,
                    "No entity matches the focus name"
                );
            }
            for entity in &candidates {
                info!(
                    subsystem = "engine",
                    component = "run",
                    entity_id = %entity.id,
                    scientific_name = %entity.scientific_name,
                    display_name = %entity.display_name,
                    "Gated out: display name already set (use --force to overwrite)"
                );
            }
        }
        needed
    }

    async fn process(
        &self,
        entities: &[Entity],
        synonyms: &HashMap<Uuid, Vec<String>>,
        state: &mut RunState,
    ) {
        if entities.is_empty() {
            return;
        }
        let start = Instant::now();
        let resolvers = &state.resolvers;
        let resolutions: Vec<Resolution> = stream::iter(entities.chunks(self.config.resolve_batch))
            .map(|chunk| async move {
                join_all(resolvers.iter().map(|r| r.resolve(chunk, synonyms)))
                    .await
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
            })
            .buffer_unordered(self.config.db_concurrency)
            .flat_map(stream::iter)
            .collect()
            .await;

        let aggregated = state.aggregator.aggregate(entities, resolutions);
        let report = &mut state.report;
        report.decisions += aggregated.decisions.len();
        report.displays_proposed += aggregated.displays_proposed;
        report.displays_rejected += aggregated.displays_rejected;
        for decision in &aggregated.decisions {
            *report.wins.entry(decision.source_id.clone()).or_default() += 1;
            if decision.provenance != taxa_core::Provenance::Primary {
                report.via_synonym += 1;
            }
        }

        let writes = state
            .writer
            .write(aggregated.patches, aggregated.synonyms)
            .await;
        report.writes += writes;
        debug!(
            subsystem = "engine",
            component = "run",
            entities = entities.len(),
            decisions = aggregated.decisions.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch processed"
        );
    }

    fn finish(&self, mut report: RunReport, start: Instant, started_at: DateTime<Utc>) -> Result<RunReport> {
        report.started_at = Some(started_at);
        report.finished_at = Some(Utc::now());
        info!(
            subsystem = "engine",
            component = "run",
            scanned = report.diagnostics.scanned,
            needed = report.diagnostics.needed,
            processed = report.diagnostics.processed,
            without_scientific = report.diagnostics.without_scientific,
            blank_display = report.diagnostics.blank_display,
            decisions = report.decisions,
            via_synonym = report.via_synonym,
            wins = ?report.wins,
            displays_rejected = report.displays_rejected,
            entities_updated = report.writes.entities_updated,
            synonyms_sent = report.writes.synonyms_sent,
            items_dropped = report.writes.items_dropped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Run complete"
        );
        Ok(report)
    }
}

impl Scanner {
    fn new(max_rows: Option<usize>) -> Self {
        Self {
            offset: 0,
            done: false,
            budget: RowBudget::new(max_rows),
        }
    }
}

async fn load_backbone(
    dir: PathBuf,
    wanted: std::collections::HashSet<String>,
    options: BackboneOptions,
) -> Result<BackboneIndex> {
    let start = Instant::now();
    let index = tokio::task::spawn_blocking(move || BackboneIndex::load(&dir, &wanted, &options))
        .await
        .map_err(|e| Error::Internal(format!("backbone loader panicked: {}", e)))??;
    info!(
        subsystem = "engine",
        component = "run",
        indexed_names = index.taxa.len(),
        vernacular_keys = index.vernaculars.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Backbone loaded"
    );
    Ok(index)
}
