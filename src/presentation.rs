//! Read-only data the presentation layer renders. Nothing here mutates the engine.

use serde::{Deserialize, Serialize};

use crate::config::ExperimentConfig;
use crate::engine::{BoxChoice, Outcome, Phase, RoundOutcome, TrialEngine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationView {
    pub state: String,
    pub current_phase: Option<Phase>,
    /// 1-based position of the current phase in the participant's order
    pub display_phase: Option<usize>,
    pub p_safe: f64,
    pub p_uncertain: f64,
    pub round: u32,
    pub round_limit: u32,
    pub cumulative_earnings: i64,
    pub timeline: Vec<(u32, i64)>,
    pub boxes: Option<[BoxDescription; 2]>,
}

impl PresentationView {
    pub fn from_engine(engine: &TrialEngine) -> Self {
        let current_phase = engine.current_phase();
        let cfg = engine.config();
        Self {
            state: engine.state().label().to_string(),
            current_phase,
            display_phase: engine.phase_index().map(|i| i + 1),
            p_safe: engine.p_safe(),
            p_uncertain: engine.p_uncertain(),
            round: engine.round(),
            round_limit: cfg.rounds_per_phase,
            cumulative_earnings: engine.cumulative_earnings(),
            timeline: engine.timeline().to_vec(),
            boxes: current_phase.map(|p| {
                [
                    describe_box(cfg, p, BoxChoice::A, engine.p_safe()),
                    describe_box(cfg, p, BoxChoice::B, engine.p_uncertain()),
                ]
            }),
        }
    }
}

/// What the participant is told about a box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoxDescription {
    /// Probability disclosed as a count of winning balls out of 100
    KnownRisk { win_pct: u32, win: i64, lose: i64 },
    /// Payouts disclosed, probability hidden
    Ambiguity { win: i64, lose: i64 },
    /// Nothing disclosed
    Rumsfeld,
}

impl BoxDescription {
    pub fn headline(&self) -> String {
        match self {
            BoxDescription::KnownRisk { win_pct, win, lose } => format!(
                "{}% chance of winning {}€, {}% chance of losing {}€",
                win_pct,
                win,
                100 - win_pct,
                lose.abs()
            ),
            BoxDescription::Ambiguity { win, lose } => {
                format!("Unknown probability. Win {}€ or lose {}€", win, lose.abs())
            }
            BoxDescription::Rumsfeld => "Totally different rules might apply".to_string(),
        }
    }
}

pub fn describe_box(cfg: &ExperimentConfig, phase: Phase, choice: BoxChoice, p: f64) -> BoxDescription {
    match (phase, choice) {
        (Phase::One, BoxChoice::A) | (Phase::Two, BoxChoice::A) => BoxDescription::KnownRisk {
            win_pct: (p * 100.0).round() as u32,
            win: cfg.reward_red,
            lose: cfg.reward_black,
        },
        (Phase::One, BoxChoice::B) | (Phase::Three, BoxChoice::A) => BoxDescription::Ambiguity {
            win: cfg.ambiguity_reward,
            lose: cfg.ambiguity_loss,
        },
        (Phase::Two, BoxChoice::B) | (Phase::Three, BoxChoice::B) => BoxDescription::Rumsfeld,
    }
}

/// Short instruction lines shown above the boxes.
pub fn instructions(phase: Phase) -> [&'static str; 2] {
    match phase {
        Phase::One => [
            "Box A: Known probability (risk)",
            "Box B: Unknown probability (ambiguity)",
        ],
        Phase::Two => [
            "Box A: Known probability (risk)",
            "Box B: Totally different rules might apply",
        ],
        Phase::Three => [
            "Box A: Unknown probability (ambiguity)",
            "Box B: Totally different rules might apply",
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub message: String,
    pub tone: Tone,
}

/// Message shown after a round.
pub fn feedback(outcome: &RoundOutcome) -> Feedback {
    let b = outcome.choice;
    let r = outcome.payout;
    let (message, tone) = match outcome.outcome {
        Outcome::Red => (format!("You drew a red ball from Box {} (+{} €)", b, r), Tone::Success),
        Outcome::Black => (format!("You drew a black ball from Box {} ({} €)", b, r), Tone::Error),
        Outcome::Gold => (
            format!("Surprise! You drew a gold ball from Box {} (+{} €)", b, r),
            Tone::Warning,
        ),
        Outcome::Silver => (
            format!("Oh no! You drew a silver ball from Box {} ({} €)", b, r),
            Tone::Error,
        ),
    };
    Feedback { message, tone }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DrawTrace;

    fn outcome(o: Outcome, payout: i64) -> RoundOutcome {
        RoundOutcome {
            phase: Phase::Two,
            round: 3,
            choice: BoxChoice::B,
            outcome: o,
            payout,
            special: if o.is_special() { Some(o) } else { None },
            cumulative_earnings: payout,
            seed: 2045,
            trace: DrawTrace::default(),
            phase_complete: false,
        }
    }

    #[test]
    fn test_feedback_tones() {
        assert_eq!(feedback(&outcome(Outcome::Red, 10)).tone, Tone::Success);
        assert_eq!(feedback(&outcome(Outcome::Black, -5)).tone, Tone::Error);
        assert_eq!(feedback(&outcome(Outcome::Gold, 50)).tone, Tone::Warning);
        let silver = feedback(&outcome(Outcome::Silver, -25));
        assert_eq!(silver.tone, Tone::Error);
        assert!(silver.message.contains("(-25 €)"));
    }

    #[test]
    fn test_box_descriptions_by_phase() {
        let cfg = ExperimentConfig::default();
        assert_eq!(
            describe_box(&cfg, Phase::One, BoxChoice::A, 0.7),
            BoxDescription::KnownRisk { win_pct: 70, win: 10, lose: -5 }
        );
        assert!(matches!(describe_box(&cfg, Phase::Three, BoxChoice::A, 0.4), BoxDescription::Ambiguity { .. }));
        assert_eq!(describe_box(&cfg, Phase::Two, BoxChoice::B, 0.4), BoxDescription::Rumsfeld);
        let headline = describe_box(&cfg, Phase::Two, BoxChoice::A, 0.65).headline();
        assert!(headline.starts_with("65% chance of winning 10€"));
    }
}
