//! # Pipeline Stages
//!
//! The eleven stages an opportunity can occupy.
//!
//! ## Stage Definitions
//!
//! | Index | Stage | Code | Kind |
//! |-------|-------|------|------|
//! | 0 | Discovery | `01_DISCOVERY` | Forward |
//! | 1 | Idea Card | `02_IDEA_CARD` | Forward |
//! | 2 | Gate1 Selection | `03_GATE1` | Forward (gate) |
//! | 3 | Mockup | `04_MOCKUP` | Forward |
//! | 4 | Gate2 Validation | `05_GATE2` | Forward (gate) |
//! | 5 | Biz Planning | `06_BIZ_PLANNING` | Forward (gate) |
//! | 6 | Pilot / PoC | `07_PILOT` | Forward |
//! | 7 | Pre-Proposal | `08_PRE_PROPOSAL` | Forward (gate) |
//! | 8 | Handoff | `09_HANDOFF` | Forward (gate) |
//! | - | Hold | `HOLD` | Absorbing, resumable |
//! | - | Drop | `DROP` | Absorbing, terminal |
//!
//! Forward stages are totally ordered. HOLD and DROP sit outside the order.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// STAGE ENUM
// =============================================================================

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "01_DISCOVERY")]
    Discovery,
    #[serde(rename = "02_IDEA_CARD")]
    IdeaCard,
    #[serde(rename = "03_GATE1")]
    Gate1Selection,
    #[serde(rename = "04_MOCKUP")]
    Mockup,
    #[serde(rename = "05_GATE2")]
    Gate2Validation,
    #[serde(rename = "06_BIZ_PLANNING")]
    BizPlanning,
    #[serde(rename = "07_PILOT")]
    Pilot,
    #[serde(rename = "08_PRE_PROPOSAL")]
    PreProposal,
    #[serde(rename = "09_HANDOFF")]
    Handoff,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "DROP")]
    Drop,
}

/// The nine forward stages in pipeline order.
pub const FORWARD_STAGES: [Stage; 9] = [
    Stage::Discovery,
    Stage::IdeaCard,
    Stage::Gate1Selection,
    Stage::Mockup,
    Stage::Gate2Validation,
    Stage::BizPlanning,
    Stage::Pilot,
    Stage::PreProposal,
    Stage::Handoff,
];

/// Every stage, forward stages first.
pub const ALL_STAGES: [Stage; 11] = [
    Stage::Discovery,
    Stage::IdeaCard,
    Stage::Gate1Selection,
    Stage::Mockup,
    Stage::Gate2Validation,
    Stage::BizPlanning,
    Stage::Pilot,
    Stage::PreProposal,
    Stage::Handoff,
    Stage::Hold,
    Stage::Drop,
];

impl Stage {
    /// Stable code used for display, parsing and gate keys.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Stage::Discovery => "01_DISCOVERY",
            Stage::IdeaCard => "02_IDEA_CARD",
            Stage::Gate1Selection => "03_GATE1",
            Stage::Mockup => "04_MOCKUP",
            Stage::Gate2Validation => "05_GATE2",
            Stage::BizPlanning => "06_BIZ_PLANNING",
            Stage::Pilot => "07_PILOT",
            Stage::PreProposal => "08_PRE_PROPOSAL",
            Stage::Handoff => "09_HANDOFF",
            Stage::Hold => "HOLD",
            Stage::Drop => "DROP",
        }
    }

    /// Position in the forward order, `None` for HOLD and DROP.
    #[must_use]
    pub fn order_index(&self) -> Option<usize> {
        FORWARD_STAGES.iter().position(|s| s == self)
    }

    /// The only stage a forward move may target from here.
    #[must_use]
    pub fn next(&self) -> Option<Stage> {
        self.order_index()
            .and_then(|i| FORWARD_STAGES.get(i.saturating_add(1)))
            .copied()
    }

    /// HOLD or DROP.
    #[must_use]
    pub fn is_absorbing(&self) -> bool {
        matches!(self, Stage::Hold | Stage::Drop)
    }

    /// DROP admits no outgoing transition.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Drop)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when a stage code is not one of the eleven known values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl std::fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid stage: {}", self.0)
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for Stage {
    type Err = UnknownStage;

    /// Accepts the stage code in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ALL_STAGES
            .iter()
            .find(|stage| stage.code().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_order_indices() {
        for (i, stage) in FORWARD_STAGES.iter().enumerate() {
            assert_eq!(stage.order_index(), Some(i));
        }
        assert_eq!(Stage::Hold.order_index(), None);
        assert_eq!(Stage::Drop.order_index(), None);
    }

    #[test]
    fn next_stage_chain() {
        assert_eq!(Stage::Discovery.next(), Some(Stage::IdeaCard));
        assert_eq!(Stage::IdeaCard.next(), Some(Stage::Gate1Selection));
        assert_eq!(Stage::PreProposal.next(), Some(Stage::Handoff));
        assert_eq!(Stage::Handoff.next(), None);
        assert_eq!(Stage::Hold.next(), None);
    }

    #[test]
    fn parse_codes() {
        assert_eq!("03_GATE1".parse::<Stage>(), Ok(Stage::Gate1Selection));
        assert_eq!("hold".parse::<Stage>(), Ok(Stage::Hold));
        assert!("10_SHIPPED".parse::<Stage>().is_err());
    }

    #[test]
    fn code_round_trips_through_display() {
        for stage in ALL_STAGES {
            assert_eq!(stage.to_string().parse::<Stage>(), Ok(stage));
        }
    }

    #[test]
    fn absorbing_states() {
        assert!(Stage::Hold.is_absorbing());
        assert!(Stage::Drop.is_absorbing());
        assert!(Stage::Drop.is_terminal());
        assert!(!Stage::Hold.is_terminal());
        assert!(!Stage::Handoff.is_absorbing());
    }
}
