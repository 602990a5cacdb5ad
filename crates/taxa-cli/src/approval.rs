//! Terminal reviewer for display-name changes.

use std::io::{BufRead, IsTerminal, Write};
use std::sync::Mutex;

use taxa_core::{ApprovalGate, Proposal, Verdict};
use tracing::warn;

/// Asks on stderr and reads answers from stdin.
///
/// Without an interactive terminal every proposal is rejected.
#[derive(Debug, Default)]
pub struct TerminalGate {
    // serialises prompts from concurrent callers
    lock: Mutex<()>,
}

impl TerminalGate {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Map one typed answer to a verdict; None asks again.
pub fn parse_answer(answer: &str) -> Option<Verdict> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(Verdict::Accept),
        "n" | "no" | "" => Some(Verdict::Reject),
        "a" | "all" => Some(Verdict::AcceptAll),
        "s" | "skip" => Some(Verdict::RejectAll),
        "q" | "quit" => Some(Verdict::Quit),
        _ => None,
    }
}

fn render(proposal: &Proposal) -> String {
    let current = if proposal.current_display.trim().is_empty() {
        "(blank)"
    } else {
        proposal.current_display.as_str()
    };
    format!(
        "\n{}\n  current:  {}\n  proposed: {} [{}] from {} (score {})\n\
         Apply? [y]es / [N]o / [a]ccept all / [s]kip all / [q]uit: ",
        proposal.scientific_name,
        current,
        proposal.proposed_display,
        proposal.locale,
        proposal.source_id,
        proposal.score
    )
}

impl ApprovalGate for TerminalGate {
    fn review(&self, proposal: &Proposal) -> Verdict {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            warn!(
                subsystem = "cli",
                entity_id = %proposal.entity_id,
                "No terminal attached, rejecting display change"
            );
            return Verdict::Reject;
        }

        let _held = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stderr = std::io::stderr();
        loop {
            if write!(stderr, "{}", render(proposal))
                .and_then(|_| stderr.flush())
                .is_err()
            {
                return Verdict::Reject;
            }
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                // EOF ends the review
                Ok(0) => return Verdict::Quit,
                Ok(_) => {
                    if let Some(verdict) = parse_answer(&line) {
                        return verdict;
                    }
                }
                Err(_) => return Verdict::Reject,
            }
        }
    }
}
