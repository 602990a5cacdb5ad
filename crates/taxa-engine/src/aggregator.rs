//! Cross-source aggregation and display-name approval.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use taxa_core::{
    compare, ApprovalGate, Decision, EngineConfig, Entity, EntityPatch, Proposal, SynonymRecord,
    Verdict,
};

use crate::resolver::Resolution;

/// Sticky reviewer state for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApprovalMode {
    Ask,
    AcceptAll,
    RejectAll,
}

/// Everything a batch of resolutions turns into.
#[derive(Debug, Default)]
pub struct Aggregated {
    pub decisions: Vec<Decision>,
    pub patches: Vec<EntityPatch>,
    pub synonyms: Vec<SynonymRecord>,
    pub displays_proposed: usize,
    pub displays_rejected: usize,
}

pub struct Aggregator {
    config: EngineConfig,
    gate: Arc<dyn ApprovalGate>,
    mode: ApprovalMode,
}

impl Aggregator {
    pub fn new(config: EngineConfig, gate: Arc<dyn ApprovalGate>) -> Self {
        Self {
            config,
            gate,
            mode: ApprovalMode::Ask,
        }
    }

    /// Higher score, then earlier source in the priority list, then the
    /// candidate comparator. `Greater` means `a` wins.
    fn rank(&self, a: &Resolution, b: &Resolution) -> Ordering {
        match (&a.best, &b.best) {
            (Some((ca, _)), Some((cb, _))) => ca
                .score
                .cmp(&cb.score)
                .then_with(|| {
                    self.config
                        .priority_of(b.source_id)
                        .cmp(&self.config.priority_of(a.source_id))
                })
                .then_with(|| compare(ca, cb)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }

    pub fn aggregate(&mut self, entities: &[Entity], resolutions: Vec<Resolution>) -> Aggregated {
        let mut by_entity: HashMap<Uuid, Vec<Resolution>> = HashMap::new();
        for resolution in resolutions {
            by_entity
                .entry(resolution.entity_id)
                .or_default()
                .push(resolution);
        }

        let mut out = Aggregated::default();
        for entity in entities {
            let Some(mut results) = by_entity.remove(&entity.id) else {
                continue;
            };
            self.collect_synonyms(entity, &mut results, &mut out);

            let winner = results
                .into_iter()
                .filter(|r| r.best.is_some())
                .max_by(|a, b| self.rank(a, b));
            let Some(Resolution {
                source_id,
                best: Some((best, provenance)),
                ..
            }) = winner
            else {
                debug!(
                    subsystem = "engine",
                    component = "aggregator",
                    entity_id = %entity.id,
                    scientific_name = %entity.scientific_name,
                    "No usable candidate from any source"
                );
                continue;
            };

            let decision = Decision {
                entity_id: entity.id,
                display_name: best.candidate.text.trim().to_string(),
                locale: best.locale.clone(),
                source_id: source_id.to_string(),
                score: best.score,
                provenance,
            };
            debug!(
                subsystem = "engine",
                component = "aggregator",
                entity_id = %entity.id,
                scientific_name = %entity.scientific_name,
                display_name = %decision.display_name,
                locale = %decision.locale,
                source = %decision.source_id,
                score = decision.score,
                provenance = ?decision.provenance,
                "Decision"
            );

            if let Some(patch) = self.display_patch(entity, &decision, &mut out) {
                out.patches.push(patch);
            }
            out.decisions.push(decision);
        }
        out
    }

    /// Winner of every source as a common-name synonym, plus every candidate
    /// of sources that keep them all; learned keys go to the patch list.
    fn collect_synonyms(&self, entity: &Entity, results: &mut [Resolution], out: &mut Aggregated) {
        let scientific = entity.scientific_name.trim().to_lowercase();
        let keep = |text: &str| {
            let text = text.trim();
            !text.is_empty() && text.to_lowercase() != scientific
        };

        for result in results.iter_mut() {
            if let Some(learned) = result.learned.take() {
                out.patches.push(learned);
            }
            if let Some((best, _)) = &result.best {
                out.synonyms.push(SynonymRecord::common(
                    entity.id,
                    best.candidate.text.trim(),
                    best.locale.clone(),
                ));
            }
            if result.persist_all {
                out.synonyms.extend(
                    result
                        .candidates
                        .iter()
                        .filter(|c| keep(&c.candidate.text))
                        .map(|c| {
                            SynonymRecord::common(entity.id, c.candidate.text.trim(), c.locale.clone())
                        }),
                );
            }
        }
    }

    fn display_patch(
        &mut self,
        entity: &Entity,
        decision: &Decision,
        out: &mut Aggregated,
    ) -> Option<EntityPatch> {
        if !self.config.set_display || !entity.needs_update(self.config.force) {
            return None;
        }
        if decision.display_name == entity.display_name.trim() {
            return None;
        }

        let proposal = Proposal {
            entity_id: entity.id,
            scientific_name: entity.scientific_name.clone(),
            current_display: entity.display_name.clone(),
            proposed_display: decision.display_name.clone(),
            locale: decision.locale.clone(),
            source_id: decision.source_id.clone(),
            score: decision.score,
        };
        out.displays_proposed += 1;
        if !self.approve(&proposal) {
            out.displays_rejected += 1;
            return None;
        }
        Some(EntityPatch {
            display_name: Some(decision.display_name.clone()),
            ..EntityPatch::new(entity.id)
        })
    }

    fn approve(&mut self, proposal: &Proposal) -> bool {
        match self.mode {
            ApprovalMode::AcceptAll => return true,
            ApprovalMode::RejectAll => return false,
            ApprovalMode::Ask => {}
        }
        match self.gate.review(proposal) {
            Verdict::Accept => true,
            Verdict::Reject => false,
            Verdict::AcceptAll => {
                self.mode = ApprovalMode::AcceptAll;
                true
            }
            Verdict::RejectAll => {
                self.mode = ApprovalMode::RejectAll;
                false
            }
            Verdict::Quit => {
                info!(
                    subsystem = "engine",
                    component = "aggregator",
                    "Review stopped; remaining display changes will be skipped"
                );
                self.mode = ApprovalMode::RejectAll;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use taxa_core::{AutoApprove, NameCandidate, NameKind, Provenance, ScoredCandidate};

    fn scored(text: &str, source: &str, preferred: bool) -> ScoredCandidate {
        NameCandidate::new(text, source)
            .with_language("en")
            .preferred(preferred)
            .scored()
    }

    fn resolution(entity: &Entity, source: &'static str, best: Option<ScoredCandidate>) -> Resolution {
        Resolution {
            entity_id: entity.id,
            source_id: source,
            candidates: best.iter().cloned().collect(),
            best: best.map(|b| (b, Provenance::Primary)),
            persist_all: false,
            learned: None,
            attempts: 1,
        }
    }

    struct Scripted {
        answers: Mutex<Vec<Verdict>>,
        seen: Mutex<usize>,
    }

    impl Scripted {
        fn new(answers: Vec<Verdict>) -> Self {
            Self {
                answers: Mutex::new(answers),
                seen: Mutex::new(0),
            }
        }
    }

    impl ApprovalGate for Scripted {
        fn review(&self, _proposal: &Proposal) -> Verdict {
            *self.seen.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                Verdict::Reject
            } else {
                answers.remove(0)
            }
        }
    }

    #[test]
    fn test_highest_score_wins_across_sources() {
        let e = Entity::new(Uuid::new_v4(), "Rosa canina", "");
        let mut agg = Aggregator::new(EngineConfig::default(), Arc::new(AutoApprove));
        let out = agg.aggregate(
            &[e.clone()],
            vec![
                resolution(&e, "gbif", Some(scored("Dog rose", "gbif", false))),
                resolution(&e, "inat", Some(scored("Dog rose", "inat", true))),
            ],
        );
        assert_eq!(out.decisions[0].source_id, "inat");
        assert_eq!(out.patches[0].display_name.as_deref(), Some("Dog rose"));
    }

    #[test]
    fn test_score_tie_goes_to_source_priority() {
        let e = Entity::new(Uuid::new_v4(), "Rosa canina", "");
        let mut agg = Aggregator::new(EngineConfig::default(), Arc::new(AutoApprove));
        let out = agg.aggregate(
            &[e.clone()],
            vec![
                resolution(&e, "itis", Some(scored("Briar", "itis", false))),
                resolution(&e, "gbif", Some(scored("Wild", "gbif", false))),
                resolution(&e, "plantbook", None),
            ],
        );
        assert_eq!(out.decisions[0].source_id, "gbif");
        assert_eq!(out.decisions[0].display_name, "Wild");
        // one synonym per source winner
        assert_eq!(out.synonyms.len(), 2);
    }

    #[test]
    fn test_distinct_display_kept_but_synonyms_collected() {
        let e = Entity::new(Uuid::new_v4(), "Saintpaulia ionantha", "African Violet");
        let mut agg = Aggregator::new(EngineConfig::default(), Arc::new(AutoApprove));
        let out = agg.aggregate(
            &[e.clone()],
            vec![resolution(&e, "gbif", Some(scored("Usambara violet", "gbif", false)))],
        );
        assert_eq!(out.decisions.len(), 1);
        assert!(out.patches.is_empty());
        assert_eq!(out.synonyms[0].name, "Usambara violet");
        assert_eq!(out.synonyms[0].kind, NameKind::Common);

        let mut forced = Aggregator::new(EngineConfig::default().with_force(true), Arc::new(AutoApprove));
        let out = forced.aggregate(
            &[e.clone()],
            vec![resolution(&e, "gbif", Some(scored("Usambara violet", "gbif", false)))],
        );
        assert_eq!(out.patches.len(), 1);
    }

    #[test]
    fn test_persist_all_skips_scientific_echo() {
        let e = Entity::new(Uuid::new_v4(), "Rosa canina", "");
        let mut r = resolution(&e, "plantbook", Some(scored("Dog rose", "plantbook", true)));
        r.persist_all = true;
        r.candidates = vec![
            scored("Dog rose", "plantbook", true),
            scored("Briar rose", "plantbook", false),
            scored("ROSA CANINA", "plantbook", false),
        ];
        let mut agg = Aggregator::new(EngineConfig::default(), Arc::new(AutoApprove));
        let out = agg.aggregate(&[e], vec![r]);
        let names: Vec<&str> = out.synonyms.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Dog rose", "Dog rose", "Briar rose"]);
    }

    #[test]
    fn test_learned_patch_passes_through_without_display() {
        let e = Entity::new(Uuid::new_v4(), "Rosa canina", "Dog rose");
        let mut r = resolution(&e, "gbif", Some(scored("Dog rose", "gbif", false)));
        r.learned = Some(EntityPatch {
            external_key: Some(3003),
            ..EntityPatch::new(e.id)
        });
        let mut agg = Aggregator::new(EngineConfig::default(), Arc::new(AutoApprove));
        let out = agg.aggregate(&[e], vec![r]);
        assert_eq!(out.patches.len(), 1);
        assert_eq!(out.patches[0].external_key, Some(3003));
        assert!(out.patches[0].display_name.is_none());
    }

    #[test]
    fn test_accept_all_is_sticky() {
        let entities: Vec<Entity> = (0..3)
            .map(|i| Entity::new(Uuid::new_v4(), format!("Rosa s{i}"), ""))
            .collect();
        let gate = Arc::new(Scripted::new(vec![Verdict::Reject, Verdict::AcceptAll]));
        let mut agg = Aggregator::new(EngineConfig::default(), gate.clone());
        let resolutions = entities
            .iter()
            .map(|e| resolution(e, "gbif", Some(scored("Rose", "gbif", false))))
            .collect();

        let out = agg.aggregate(&entities, resolutions);
        assert_eq!(out.displays_proposed, 3);
        assert_eq!(out.displays_rejected, 1);
        assert_eq!(out.patches.len(), 2);
        assert_eq!(*gate.seen.lock().unwrap(), 2);
        // synonyms are written whatever the verdict
        assert_eq!(out.synonyms.len(), 3);
    }

    #[test]
    fn test_quit_rejects_the_rest() {
        let entities: Vec<Entity> = (0..3)
            .map(|i| Entity::new(Uuid::new_v4(), format!("Rosa s{i}"), ""))
            .collect();
        let gate = Arc::new(Scripted::new(vec![Verdict::Accept, Verdict::Quit, Verdict::Accept]));
        let mut agg = Aggregator::new(EngineConfig::default(), gate.clone());
        let resolutions = entities
            .iter()
            .map(|e| resolution(e, "gbif", Some(scored("Rose", "gbif", false))))
            .collect();

        let out = agg.aggregate(&entities, resolutions);
        assert_eq!(out.patches.len(), 1);
        assert_eq!(out.displays_rejected, 2);
        assert_eq!(*gate.seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_set_display_off_writes_only_synonyms() {
        let e = Entity::new(Uuid::new_v4(), "Rosa canina", "");
        let mut agg = Aggregator::new(
            EngineConfig::default().with_set_display(false),
            Arc::new(AutoApprove),
        );
        let out = agg.aggregate(
            &[e.clone()],
            vec![resolution(&e, "gbif", Some(scored("Dog rose", "gbif", false)))],
        );
        assert!(out.patches.is_empty());
        assert_eq!(out.displays_proposed, 0);
        assert_eq!(out.synonyms.len(), 1);
    }
}
