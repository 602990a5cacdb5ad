//! Synonym fallback chain.
//!
//! ```text
//! PRIMARY ──usable──────────────────────────────▶ EXHAUSTED(win)
//!    │ miss
//!    ▼
//! TRY_SYNONYM[0] ──usable──▶ EXHAUSTED(win, via synonym 0)
//!    │ miss
//!    ▼
//!   ...
//! TRY_SYNONYM[n-1] ──miss──▶ EXHAUSTED(none)
//! ```
//!
//! The chain only decides what to try next; the lookup itself is done by the
//! caller, which feeds each attempt's best candidate back through `advance`.

use std::collections::HashSet;

use taxa_core::{Provenance, ScoredCandidate};

/// Where a chain currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Primary,
    TrySynonym(usize),
    Exhausted,
}

/// Per-entity fallback state.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    scientific: String,
    synonyms: Vec<String>,
    state: ChainState,
    winner: Option<(ScoredCandidate, Provenance)>,
    attempts: usize,
}

impl FallbackChain {
    /// Build a chain for `scientific_name`, keeping at most `limit` synonyms.
    ///
    /// Blank synonyms, synonyms equal to the scientific name, and repeats
    /// (case-insensitive) are skipped before the cap is applied.
    pub fn new<I>(scientific_name: &str, synonyms: I, limit: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let scientific = scientific_name.trim().to_string();
        let mut seen = HashSet::from([scientific.to_lowercase()]);
        let synonyms = synonyms
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
            .take(limit)
            .collect();

        Self {
            scientific,
            synonyms,
            state: ChainState::Primary,
            winner: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == ChainState::Exhausted
    }

    pub fn scientific_name(&self) -> &str {
        &self.scientific
    }

    pub fn synonyms(&self) -> &[String] {
        &self.synonyms
    }

    /// Name to look up in the current state.
    pub fn current_name(&self) -> Option<&str> {
        match self.state {
            ChainState::Primary => Some(self.scientific.as_str()),
            ChainState::TrySynonym(i) => self.synonyms.get(i).map(String::as_str),
            ChainState::Exhausted => None,
        }
    }

    /// Non-empty and not the scientific name itself (whole string, case-insensitive).
    pub fn is_usable(&self, candidate: &ScoredCandidate) -> bool {
        let text = candidate.candidate.text.trim();
        !text.is_empty() && text.to_lowercase() != self.scientific.to_lowercase()
    }

    /// Record the outcome of the current attempt and move on.
    pub fn advance(&mut self, best: Option<ScoredCandidate>) -> ChainState {
        if self.is_exhausted() {
            return self.state;
        }
        self.attempts += 1;

        if let Some(best) = best.filter(|b| self.is_usable(b)) {
            let provenance = match self.state {
                ChainState::TrySynonym(index) => Provenance::Synonym {
                    index,
                    name: self.synonyms[index].clone(),
                },
                _ => Provenance::Primary,
            };
            self.winner = Some((best, provenance));
            self.state = ChainState::Exhausted;
            return self.state;
        }

        let next = match self.state {
            ChainState::Primary => 0,
            ChainState::TrySynonym(i) => i + 1,
            ChainState::Exhausted => return self.state,
        };
        self.state = if next < self.synonyms.len() {
            ChainState::TrySynonym(next)
        } else {
            ChainState::Exhausted
        };
        self.state
    }

    /// Lookups made so far; never more than `1 + synonyms().len()`.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn winner(&self) -> Option<&(ScoredCandidate, Provenance)> {
        self.winner.as_ref()
    }

    pub fn into_winner(self) -> Option<(ScoredCandidate, Provenance)> {
        self.winner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxa_core::NameCandidate;

    fn hit(text: &str) -> Option<ScoredCandidate> {
        Some(NameCandidate::new(text, "test").with_language("en").scored())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_primary_success() {
        let mut chain = FallbackChain::new("Rosa canina", names(&["Rosa lutetiana"]), 8);
        assert_eq!(chain.current_name(), Some("Rosa canina"));
        assert_eq!(chain.advance(hit("Dog rose")), ChainState::Exhausted);
        let (winner, provenance) = chain.into_winner().unwrap();
        assert_eq!(winner.candidate.text, "Dog rose");
        assert_eq!(provenance, Provenance::Primary);
    }

    #[test]
    fn test_identical_result_falls_through_to_synonym() {
        let mut chain = FallbackChain::new(
            "Saintpaulia ionantha",
            names(&["Saintpaulia kewensis", "Saintpaulia confusa"]),
            8,
        );
        assert_eq!(chain.advance(hit("SAINTPAULIA IONANTHA")), ChainState::TrySynonym(0));
        assert_eq!(chain.current_name(), Some("Saintpaulia kewensis"));
        assert_eq!(chain.advance(None), ChainState::TrySynonym(1));
        assert_eq!(chain.advance(hit("African violet")), ChainState::Exhausted);

        let (_, provenance) = chain.winner().unwrap();
        assert_eq!(
            provenance,
            &Provenance::Synonym {
                index: 1,
                name: "Saintpaulia confusa".into()
            }
        );
        assert_eq!(chain.attempts(), 3);
    }

    #[test]
    fn test_partial_match_is_not_identical() {
        // "Saintpaulia" only equals the first token; whole strings differ
        let mut chain = FallbackChain::new("Saintpaulia ionantha", Vec::new(), 8);
        assert_eq!(chain.advance(hit("Saintpaulia")), ChainState::Exhausted);
        assert_eq!(chain.winner().unwrap().0.candidate.text, "Saintpaulia");
    }

    #[test]
    fn test_blank_result_is_a_miss() {
        let mut chain = FallbackChain::new("Rosa canina", Vec::new(), 8);
        assert_eq!(chain.advance(hit("   ")), ChainState::Exhausted);
        assert!(chain.winner().is_none());
    }

    #[test]
    fn test_synonyms_capped_and_filtered() {
        let chain = FallbackChain::new(
            "Rosa canina",
            names(&["rosa canina", " ", "Rosa a", "ROSA A", "Rosa b", "Rosa c"]),
            2,
        );
        assert_eq!(chain.synonyms(), &["Rosa a".to_string(), "Rosa b".to_string()]);
    }

    #[test]
    fn test_chain_visits_at_most_limit_plus_one() {
        for limit in 0..5 {
            let synonyms: Vec<String> = (0..10).map(|i| format!("Rosa s{i}")).collect();
            let mut chain = FallbackChain::new("Rosa canina", synonyms, limit);
            let mut steps = 0;
            while !chain.is_exhausted() {
                chain.advance(None);
                steps += 1;
                assert!(steps <= limit + 1, "chain did not terminate");
            }
            assert_eq!(chain.attempts(), limit + 1);
        }
    }

    #[test]
    fn test_advance_after_exhaustion_is_a_no_op() {
        let mut chain = FallbackChain::new("Rosa canina", Vec::new(), 8);
        chain.advance(None);
        assert_eq!(chain.advance(hit("Dog rose")), ChainState::Exhausted);
        assert!(chain.winner().is_none());
        assert_eq!(chain.attempts(), 1);
    }
}
