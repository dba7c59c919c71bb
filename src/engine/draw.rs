//! Round resolution: which ball comes out of the chosen box, and what it pays.
//!
//! Two independent unit streams feed a round:
//! - the **gate** stream decides whether a Rumsfeld box yields a special ball;
//!   it is read once per Rumsfeld round and never otherwise
//! - the **ball** stream picks the ball; it is read exactly once per round,
//!   for gold/silver when the gate fires and for red/black when it does not

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{BoxChoice, Outcome, Phase};
use crate::config::ExperimentConfig;

/// Source of uniform draws in `[0, 1)`.
pub trait DrawSource {
    fn gate(&mut self) -> f64;
    fn ball(&mut self) -> f64;
}

/// Generators for one round, rebuilt from the round seed every time.
pub struct SeededDraws {
    gate: StdRng,
    ball: StdRng,
}

impl SeededDraws {
    pub fn new(seed: u64) -> Self {
        Self {
            gate: StdRng::from_seed(gate_key(seed)),
            ball: StdRng::seed_from_u64(seed),
        }
    }
}

/// The gate stream is keyed by `SHA-256("gate:" || seed_le)` so it never
/// mirrors the ball stream built from the same seed.
fn gate_key(seed: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"gate:");
    hasher.update(seed.to_le_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

impl DrawSource for SeededDraws {
    fn gate(&mut self) -> f64 {
        self.gate.gen()
    }

    fn ball(&mut self) -> f64 {
        self.ball.gen()
    }
}

/// Which probability drives the red/black draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbSource {
    Safe,
    Uncertain,
}

/// Which payout table a red/black ball uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutTable {
    /// `reward_red` / `reward_black`
    Plain,
    /// `ambiguity_reward` / `ambiguity_loss`
    Ambiguity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxRule {
    pub prob: ProbSource,
    pub payouts: PayoutTable,
    /// Gold/silver may replace the red/black draw
    pub rumsfeld: bool,
}

/// The experiment's behavioral design, one rule per (phase, box).
pub fn box_rule(phase: Phase, choice: BoxChoice) -> BoxRule {
    use BoxChoice::*;
    use PayoutTable::*;
    use ProbSource::*;
    let (prob, payouts, rumsfeld) = match (phase, choice) {
        (Phase::One, A) => (Safe, Plain, false),
        (Phase::One, B) => (Uncertain, Ambiguity, false),
        (Phase::Two, A) => (Safe, Plain, false),
        (Phase::Two, B) => (Uncertain, Plain, true),
        (Phase::Three, A) => (Safe, Ambiguity, false),
        (Phase::Three, B) => (Uncertain, Plain, true),
    };
    BoxRule { prob, payouts, rumsfeld }
}

/// How many values each stream gave up, and the gate value if one was read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawTrace {
    pub gate_draws: u32,
    pub ball_draws: u32,
    pub gate: Option<f64>,
    pub ball: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Draw {
    pub outcome: Outcome,
    pub payout: i64,
    /// Set when a Rumsfeld box produced gold or silver
    pub special: Option<Outcome>,
    pub trace: DrawTrace,
}

fn payout_for(cfg: &ExperimentConfig, outcome: Outcome, table: PayoutTable) -> i64 {
    match (outcome, table) {
        (Outcome::Red, PayoutTable::Plain) => cfg.reward_red,
        (Outcome::Black, PayoutTable::Plain) => cfg.reward_black,
        (Outcome::Red, PayoutTable::Ambiguity) => cfg.ambiguity_reward,
        (Outcome::Black, PayoutTable::Ambiguity) => cfg.ambiguity_loss,
        (Outcome::Gold, _) => cfg.reward_gold,
        (Outcome::Silver, _) => cfg.reward_silver,
    }
}

/// Resolve one ball draw. Pure given the draw source.
pub fn draw_outcome<D: DrawSource>(
    cfg: &ExperimentConfig,
    phase: Phase,
    choice: BoxChoice,
    p_safe: f64,
    p_uncertain: f64,
    draws: &mut D,
) -> Draw {
    let rule = box_rule(phase, choice);
    let mut trace = DrawTrace::default();

    if rule.rumsfeld {
        let g = draws.gate();
        trace.gate_draws += 1;
        trace.gate = Some(g);
        if g < cfg.special_prob {
            let u = draws.ball();
            trace.ball_draws += 1;
            trace.ball = u;
            let special = if u < 0.5 { Outcome::Gold } else { Outcome::Silver };
            return Draw {
                outcome: special,
                payout: payout_for(cfg, special, rule.payouts),
                special: Some(special),
                trace,
            };
        }
    }

    let prob = match rule.prob {
        ProbSource::Safe => p_safe,
        ProbSource::Uncertain => p_uncertain,
    };
    let u = draws.ball();
    trace.ball_draws += 1;
    trace.ball = u;
    let outcome = if u < prob { Outcome::Red } else { Outcome::Black };
    Draw {
        outcome,
        payout: payout_for(cfg, outcome, rule.payouts),
        special: None,
        trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays fixed values and counts what was consumed.
    struct ScriptedDraws {
        gates: VecDeque<f64>,
        balls: VecDeque<f64>,
        gate_reads: u32,
        ball_reads: u32,
    }

    impl ScriptedDraws {
        fn new(gates: &[f64], balls: &[f64]) -> Self {
            Self {
                gates: gates.iter().copied().collect(),
                balls: balls.iter().copied().collect(),
                gate_reads: 0,
                ball_reads: 0,
            }
        }
    }

    impl DrawSource for ScriptedDraws {
        fn gate(&mut self) -> f64 {
            self.gate_reads += 1;
            self.gates.pop_front().expect("gate stream exhausted")
        }

        fn ball(&mut self) -> f64 {
            self.ball_reads += 1;
            self.balls.pop_front().expect("ball stream exhausted")
        }
    }

    fn cfg() -> ExperimentConfig {
        ExperimentConfig::default()
    }

    #[test]
    fn test_phase1_box_a_uses_plain_payouts() {
        let cfg = cfg();
        let mut src = ScriptedDraws::new(&[], &[0.1, 0.95]);
        let red = draw_outcome(&cfg, Phase::One, BoxChoice::A, 0.7, 0.4, &mut src);
        assert_eq!(red.outcome, Outcome::Red);
        assert_eq!(red.payout, cfg.reward_red);
        let black = draw_outcome(&cfg, Phase::One, BoxChoice::A, 0.7, 0.4, &mut src);
        assert_eq!(black.outcome, Outcome::Black);
        assert_eq!(black.payout, cfg.reward_black);
        assert_eq!(src.gate_reads, 0);
    }

    #[test]
    fn test_phase1_box_b_uses_ambiguity_payouts_and_uncertain_prob() {
        let cfg = cfg();
        // 0.5 is below p_safe but above p_uncertain: only p_uncertain may decide.
        let mut src = ScriptedDraws::new(&[], &[0.5, 0.2]);
        let black = draw_outcome(&cfg, Phase::One, BoxChoice::B, 0.7, 0.4, &mut src);
        assert_eq!(black.outcome, Outcome::Black);
        assert_eq!(black.payout, cfg.ambiguity_loss);
        let red = draw_outcome(&cfg, Phase::One, BoxChoice::B, 0.7, 0.4, &mut src);
        assert_eq!(red.payout, cfg.ambiguity_reward);
    }

    #[test]
    fn test_phase3_box_a_uses_ambiguity_payouts_with_safe_prob() {
        let cfg = cfg();
        let mut src = ScriptedDraws::new(&[], &[0.5]);
        let red = draw_outcome(&cfg, Phase::Three, BoxChoice::A, 0.6, 0.2, &mut src);
        assert_eq!(red.outcome, Outcome::Red);
        assert_eq!(red.payout, cfg.ambiguity_reward);
        assert_eq!(src.gate_reads, 0);
    }

    #[test]
    fn test_forced_gate_yields_special_without_red_black_draw() {
        let cfg = cfg();
        for phase in [Phase::Two, Phase::Three] {
            // Gate below threshold; the single ball value picks gold.
            let mut src = ScriptedDraws::new(&[0.01], &[0.25, 0.0]);
            let d = draw_outcome(&cfg, phase, BoxChoice::B, 0.7, 0.5, &mut src);
            assert_eq!(d.outcome, Outcome::Gold);
            assert_eq!(d.special, Some(Outcome::Gold));
            assert_eq!(d.payout, cfg.reward_gold);
            assert_eq!(src.gate_reads, 1);
            assert_eq!(src.ball_reads, 1);
            // The would-be red/black value is still queued.
            assert_eq!(src.balls.len(), 1);
            assert_eq!(d.trace, DrawTrace { gate_draws: 1, ball_draws: 1, gate: Some(0.01), ball: 0.25 });
        }
    }

    #[test]
    fn test_forced_gate_silver() {
        let cfg = cfg();
        let mut src = ScriptedDraws::new(&[0.0], &[0.75]);
        let d = draw_outcome(&cfg, Phase::Two, BoxChoice::B, 0.7, 0.5, &mut src);
        assert_eq!(d.outcome, Outcome::Silver);
        assert_eq!(d.payout, cfg.reward_silver);
    }

    #[test]
    fn test_closed_gate_falls_back_to_plain_red_black() {
        let cfg = cfg();
        let mut src = ScriptedDraws::new(&[0.5], &[0.3]);
        let d = draw_outcome(&cfg, Phase::Two, BoxChoice::B, 0.7, 0.5, &mut src);
        assert_eq!(d.outcome, Outcome::Red);
        assert_eq!(d.payout, cfg.reward_red);
        assert_eq!(d.special, None);
        assert_eq!((src.gate_reads, src.ball_reads), (1, 1));
    }

    #[test]
    fn test_box_a_never_special() {
        let cfg = ExperimentConfig {
            special_prob: 1.0,
            ..ExperimentConfig::default()
        };
        for phase in Phase::CANONICAL {
            let mut src = ScriptedDraws::new(&[], &[0.99]);
            let d = draw_outcome(&cfg, phase, BoxChoice::A, 0.7, 0.5, &mut src);
            assert!(!d.outcome.is_special());
        }
    }

    #[test]
    fn test_seeded_streams_are_independent_and_reproducible() {
        let mut a = SeededDraws::new(2043);
        let mut b = SeededDraws::new(2043);
        let (ga, ba) = (a.gate(), a.ball());
        assert_eq!((ga, ba), (b.gate(), b.ball()));
        assert_ne!(ga, ba);
        assert!((0.0..1.0).contains(&ga));
        assert!((0.0..1.0).contains(&ba));
    }
}
