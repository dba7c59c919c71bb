//! Phase initialization: starting probabilities derived from `participant_id + phase`.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{phase_seed, Phase};
use crate::config::ExperimentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialProbs {
    pub p_safe: f64,
    pub p_uncertain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseStart {
    pub phase: Phase,
    pub seed: u64,
    pub probs: InitialProbs,
}

/// Derive a phase's starting probabilities.
///
/// Phases 1 and 2 fix Box A at `safe_prob_init` and draw Box B once.
/// Phase 3 draws Box A first, then Box B, from the same stream.
pub fn init_phase(cfg: &ExperimentConfig, participant_id: u64, phase: Phase) -> PhaseStart {
    let seed = phase_seed(participant_id, phase);
    let mut rng = StdRng::seed_from_u64(seed);
    let (p_safe, p_uncertain) = match phase {
        Phase::One => (cfg.safe_prob_init, cfg.phase1_uncertain.sample(rng.gen())),
        Phase::Two => (cfg.safe_prob_init, cfg.phase2_uncertain.sample(rng.gen())),
        Phase::Three => {
            let p_safe = cfg.phase3_safe.sample(rng.gen());
            let p_uncertain = cfg.phase3_uncertain.sample(rng.gen());
            (p_safe, p_uncertain)
        }
    };
    PhaseStart {
        phase,
        seed,
        probs: InitialProbs { p_safe, p_uncertain },
    }
}
