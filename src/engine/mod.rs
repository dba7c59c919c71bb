//! Deterministic trial engine with replay semantics.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Sequencer   │────►│  Phase init  │────►│ Round resolve│──┐
//! │ (pid → order)│     │ (pid+phase)  │     │ (pid,ph,rnd) │◄─┘ × rounds
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//!                                           append-only data
//! ```
//!
//! Every unit of work builds its own generator from a derived seed, so a
//! session can be replayed exactly from `(participant_id, phase_order, choices)`.

pub mod draw;
pub mod phase;
pub mod sequencer;
pub mod state;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;

pub use draw::{draw_outcome, Draw, DrawSource, DrawTrace, SeededDraws};
pub use phase::{init_phase, PhaseStart};
pub use sequencer::{phase_order, phase_order_seed};
pub use state::{EngineState, RoundOutcome, TrialEngine};

/// One of the three experimental conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    /// Box A known risk, Box B ambiguity
    One,
    /// Box A known risk, Box B Rumsfeld
    Two,
    /// Box A ambiguity, Box B Rumsfeld
    Three,
}

impl Phase {
    pub const CANONICAL: [Phase; 3] = [Phase::One, Phase::Two, Phase::Three];

    pub fn number(&self) -> u8 {
        match self {
            Phase::One => 1,
            Phase::Two => 2,
            Phase::Three => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Phase::One),
            2 => Some(Phase::Two),
            3 => Some(Phase::Three),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Phase::from_number(value).ok_or_else(|| format!("unknown phase {}", value))
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.number()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// The box a participant picks in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoxChoice {
    A,
    B,
}

impl BoxChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxChoice::A => "A",
            BoxChoice::B => "B",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "A" | "a" => Some(BoxChoice::A),
            "B" | "b" => Some(BoxChoice::B),
            _ => None,
        }
    }
}

impl fmt::Display for BoxChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Colour of the ball drawn in a round. Gold and silver only come out of Rumsfeld boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Red,
    Black,
    Gold,
    Silver,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Red => "red",
            Outcome::Black => "black",
            Outcome::Gold => "gold",
            Outcome::Silver => "silver",
        }
    }

    pub fn is_special(&self) -> bool {
        matches!(self, Outcome::Gold | Outcome::Silver)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "red" => Some(Outcome::Red),
            "black" => Some(Outcome::Black),
            "gold" => Some(Outcome::Gold),
            "silver" => Some(Outcome::Silver),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Seed derivation
// =============================================================================
//
// The formulas are additive and can collide across nearby participant ids
// (e.g. pid 1 phase 2 and pid 2 phase 1 share seed 3). Recorded data depends on
// them, so they stay as they are. Wrapping arithmetic keeps them total.

/// Seed for a phase's starting probabilities: `participant_id + phase`.
pub fn phase_seed(participant_id: u64, phase: Phase) -> u64 {
    participant_id.wrapping_add(phase.number() as u64)
}

/// Seed for one round: `participant_id + phase * 1000 + round`.
pub fn round_seed(participant_id: u64, phase: Phase, round: u32) -> u64 {
    participant_id
        .wrapping_add(phase.number() as u64 * 1000)
        .wrapping_add(round as u64)
}

pub fn phase_seed_label(phase: Phase) -> String {
    format!("phase_{}", phase.number())
}

pub fn round_seed_label(phase: Phase, round: u32) -> String {
    format!("phase_{}_round_{}", phase.number(), round)
}

pub const PHASE_ORDER_LABEL: &str = "phase_order";

// =============================================================================
// Errors
// =============================================================================

/// Lifecycle violations. These are programming errors in the caller, never
/// expected runtime conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    InvalidConfig(ConfigError),
    /// Supplied phase order is not a permutation of {1, 2, 3}
    InvalidPhaseOrder(Vec<u8>),
    /// Round resolution attempted while no phase is active
    PhaseNotActive { state: &'static str },
    /// Every round of the phase has been resolved
    RoundLimitReached { phase: u8, limit: u32 },
    /// A new phase was requested before the current one finished
    PhaseStillActive { phase: u8, round: u32 },
    /// The session is over; only export remains
    SessionComplete,
    /// Session cannot finish before the last phase completes
    PhasesRemaining { completed: usize },
    /// All three phases ran; the session can only finish
    NoPhasesRemaining,
    /// Decision time must be a finite, non-negative number of seconds
    InvalidDecisionTime(f64),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidConfig(err) => write!(f, "{}", err),
            EngineError::InvalidPhaseOrder(order) => {
                write!(f, "phase order {:?} is not a permutation of [1, 2, 3]", order)
            }
            EngineError::PhaseNotActive { state } => {
                write!(f, "invalid state: no active phase (engine is {})", state)
            }
            EngineError::RoundLimitReached { phase, limit } => {
                write!(f, "invalid state: phase {} already resolved all {} rounds", phase, limit)
            }
            EngineError::PhaseStillActive { phase, round } => {
                write!(f, "invalid state: phase {} still active at round {}", phase, round)
            }
            EngineError::SessionComplete => write!(f, "invalid state: session already complete"),
            EngineError::PhasesRemaining { completed } => {
                write!(f, "invalid state: only {} of 3 phases completed", completed)
            }
            EngineError::NoPhasesRemaining => write!(f, "invalid state: all phases already ran"),
            EngineError::InvalidDecisionTime(secs) => {
                write!(f, "decision time {} is not a finite, non-negative number of seconds", secs)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::InvalidConfig(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_formulas() {
        assert_eq!(phase_seed(42, Phase::One), 43);
        assert_eq!(phase_seed(42, Phase::Three), 45);
        assert_eq!(round_seed(42, Phase::Two, 7), 2049);
        assert_eq!(round_seed(42, Phase::Three, 10), 3052);
    }

    #[test]
    fn test_seed_collisions_are_preserved() {
        // Known quirk of the additive scheme.
        assert_eq!(phase_seed(1, Phase::Two), phase_seed(2, Phase::One));
        assert_eq!(round_seed(1001, Phase::One, 1), round_seed(1, Phase::Two, 1));
    }

    #[test]
    fn test_seed_labels() {
        assert_eq!(phase_seed_label(Phase::Two), "phase_2");
        assert_eq!(round_seed_label(Phase::Three, 4), "phase_3_round_4");
    }

    #[test]
    fn test_phase_serde_as_number() {
        assert_eq!(serde_json::to_string(&Phase::Three).unwrap(), "3");
        assert_eq!(serde_json::from_str::<Phase>("2").unwrap(), Phase::Two);
        assert!(serde_json::from_str::<Phase>("4").is_err());
    }

    #[test]
    fn test_choice_and_outcome_parse() {
        assert_eq!(BoxChoice::parse("b"), Some(BoxChoice::B));
        assert_eq!(BoxChoice::parse("C"), None);
        assert_eq!(Outcome::parse("gold"), Some(Outcome::Gold));
        assert!(Outcome::Silver.is_special());
        assert!(!Outcome::Red.is_special());
    }
}
