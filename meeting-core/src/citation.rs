//! Citation resolution against a run's blackboard.
//!
//! Every generated utterance, stance card, package view and vote must cite
//! only ids that exist in the blackboard it was grounded on. An id the
//! blackboard does not contain is a contract violation - the caller either
//! repairs via re-prompt or fails the stage; bad citations are never
//! silently dropped.

use std::collections::HashSet;

use crate::model::Blackboard;

/// Pre-indexed id sets for one blackboard.
pub struct CitationIndex {
    facts: HashSet<String>,
    uncertainties: HashSet<String>,
}

impl CitationIndex {
    pub fn new(blackboard: &Blackboard) -> Self {
        Self {
            facts: blackboard.facts.iter().map(|f| f.id.clone()).collect(),
            uncertainties: blackboard
                .uncertainties
                .iter()
                .map(|u| u.id.clone())
                .collect(),
        }
    }

    pub fn has_fact(&self, id: &str) -> bool {
        self.facts.contains(id)
    }

    pub fn has_uncertainty(&self, id: &str) -> bool {
        self.uncertainties.contains(id)
    }

    /// Check a citation set. `Err` carries a message naming every bad id.
    pub fn check(
        &self,
        cited_facts: &[String],
        cited_uncertainties: &[String],
    ) -> Result<(), String> {
        let bad_facts: Vec<&str> = cited_facts
            .iter()
            .filter(|id| !self.facts.contains(*id))
            .map(String::as_str)
            .collect();
        let bad_uncertainties: Vec<&str> = cited_uncertainties
            .iter()
            .filter(|id| !self.uncertainties.contains(*id))
            .map(String::as_str)
            .collect();

        if bad_facts.is_empty() && bad_uncertainties.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();
        if !bad_facts.is_empty() {
            parts.push(format!("unknown fact ids [{}]", bad_facts.join(", ")));
        }
        if !bad_uncertainties.is_empty() {
            parts.push(format!(
                "unknown uncertainty ids [{}]",
                bad_uncertainties.join(", ")
            ));
        }
        Err(parts.join("; "))
    }
}
