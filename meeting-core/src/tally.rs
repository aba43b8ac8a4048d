//! Deterministic vote tabulation.
//!
//! Pure computation over the collected votes - no generation involved, so
//! the tally can always be recomputed from the votes artifact and checked
//! against the communique.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{Dissent, Role, Tally, Vote};

/// Why tabulation refused the ballot set.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("role '{0}' has no recorded vote")]
    MissingVote(String),

    #[error("role '{0}' voted more than once")]
    DuplicateVote(String),

    #[error("vote recorded for unknown role '{0}'")]
    UnknownRole(String),
}

/// Tabulate one vote per configured role.
///
/// Majority is the delta with the highest count. Ties break by a fixed
/// priority: the status-quo delta (0) wins any tie it is part of;
/// otherwise the smallest magnitude wins, and at equal magnitude the cut
/// beats the hike. A role whose delta differs from the majority is
/// recorded as dissenting; its dissent sentence is carried into the tally
/// only when the role itself flagged dissent.
pub fn tabulate(votes: &[Vote], roles: &[Role]) -> Result<Tally, TallyError> {
    for vote in votes {
        if !roles.iter().any(|r| r.id == vote.role) {
            return Err(TallyError::UnknownRole(vote.role.clone()));
        }
        if votes.iter().filter(|v| v.role == vote.role).count() > 1 {
            return Err(TallyError::DuplicateVote(vote.role.clone()));
        }
    }
    for role in roles {
        if !votes.iter().any(|v| v.role == role.id) {
            return Err(TallyError::MissingVote(role.id.clone()));
        }
    }

    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for vote in votes {
        *counts.entry(vote.delta_bps).or_insert(0) += 1;
    }

    let top = counts.values().copied().max().unwrap_or(0);
    let majority_delta = counts
        .iter()
        .filter(|(_, n)| **n == top)
        .map(|(d, _)| *d)
        .min_by_key(|d| (d.abs(), *d))
        .unwrap_or(0);

    // Dissenters in configured role order, for stable artifacts.
    let dissenting: Vec<Dissent> = roles
        .iter()
        .filter_map(|role| {
            let vote = votes.iter().find(|v| v.role == role.id)?;
            if vote.delta_bps == majority_delta {
                return None;
            }
            Some(Dissent {
                role: role.id.clone(),
                sentence: if vote.dissent {
                    vote.dissent_sentence.clone()
                } else {
                    None
                },
            })
        })
        .collect();

    let total = votes.len() as u32;
    debug_assert_eq!(counts.values().sum::<u32>(), total);

    tracing::info!(
        majority_delta,
        total,
        dissenting = dissenting.len(),
        "votes tabulated"
    );

    Ok(Tally {
        counts,
        majority_delta,
        dissenting,
        total,
    })
}
