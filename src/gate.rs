//! Dedup/ordering gate
//!
//! Decides whether a report advances an agent's state. Replays of something
//! already applied are discarded quietly; they are redundant, not erroneous.

use std::fmt;

use serde::Serialize;

use crate::{AgentState, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Sequence number at or below the highest one already applied
    StaleSequence,
    /// No sequence number and the receipt time does not move forward
    DuplicateTimestamp,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::StaleSequence => write!(f, "stale sequence"),
            DiscardReason::DuplicateTimestamp => write!(f, "duplicate timestamp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Apply,
    Discard(DiscardReason),
}

/// Evaluate `report` against the agent's current state (`None` for an unseen agent)
pub fn evaluate(report: &Report, state: Option<&AgentState>) -> GateDecision {
    let Some(state) = state else {
        return GateDecision::Apply;
    };

    match report.effective_sequence() {
        Some(sequence) if sequence <= state.highest_sequence_seen => {
            GateDecision::Discard(DiscardReason::StaleSequence)
        }
        Some(_) => GateDecision::Apply,
        None => match state.last_accepted() {
            Some(last) if report.timestamp <= last.timestamp => {
                GateDecision::Discard(DiscardReason::DuplicateTimestamp)
            }
            _ => GateDecision::Apply,
        },
    }
}

/// Highest sequence after applying `report`; never moves backwards
pub fn advance_sequence(highest: u64, report: &Report) -> u64 {
    report
        .effective_sequence()
        .map_or(highest, |sequence| highest.max(sequence))
}
