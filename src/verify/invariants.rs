use std::collections::HashMap;

use crate::config::ExperimentConfig;
use crate::engine::{phase_order_seed, phase_seed, round_seed, Phase, PHASE_ORDER_LABEL};
use crate::engine::state::SeedLedger;
use crate::record::TrialRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    pub msg: String,
}

fn violation(msg: String) -> Result<(), InvariantViolation> {
    Err(InvariantViolation { msg })
}

pub fn assert_probability_bounds(cfg: &ExperimentConfig, p_safe: f64, p_uncertain: f64) -> Result<(), InvariantViolation> {
    if p_safe.is_nan() || p_uncertain.is_nan() {
        return violation("NaN probability".to_string());
    }
    // Recorded probabilities are rounded to 3 decimals.
    let tol = 5e-4;
    for (name, p) in [("p_safe", p_safe), ("p_uncertain", p_uncertain)] {
        if p < cfg.prob_floor - tol || p > cfg.prob_ceiling + tol {
            return violation(format!(
                "{} = {} outside [{}, {}]",
                name, p, cfg.prob_floor, cfg.prob_ceiling
            ));
        }
    }
    Ok(())
}

/// Every recorded seed must equal the value its label derives from the participant id.
pub fn assert_seed_ledger(participant_id: u64, seeds: &SeedLedger) -> Result<(), InvariantViolation> {
    for entry in seeds.iter() {
        let expected = expected_seed(participant_id, &entry.label);
        match expected {
            Some(seed) if seed == entry.seed => {}
            Some(seed) => {
                return violation(format!(
                    "seed {} = {} but participant {} derives {}",
                    entry.label, entry.seed, participant_id, seed
                ))
            }
            None => return violation(format!("unknown seed label {}", entry.label)),
        }
    }
    Ok(())
}

/// Parse `phase_order`, `phase_<p>` or `phase_<p>_round_<r>` and derive its seed.
pub fn expected_seed(participant_id: u64, label: &str) -> Option<u64> {
    if label == PHASE_ORDER_LABEL {
        return Some(phase_order_seed(participant_id));
    }
    let rest = label.strip_prefix("phase_")?;
    let mut parts = rest.split("_round_");
    let phase = Phase::from_number(parts.next()?.parse().ok()?)?;
    match parts.next() {
        None => Some(phase_seed(participant_id, phase)),
        Some(r) => {
            let round: u32 = r.parse().ok()?;
            if round == 0 || parts.next().is_some() {
                return None;
            }
            Some(round_seed(participant_id, phase, round))
        }
    }
}

/// Rounds run 1, 2, … within each phase, each phase occupies one contiguous
/// block, and cumulative earnings are the running sum of payouts.
pub fn assert_data_sequence(cfg: &ExperimentConfig, data: &[TrialRecord]) -> Result<(), InvariantViolation> {
    let mut seen_phases: Vec<Phase> = Vec::new();
    let mut expected_round: HashMap<Phase, u32> = HashMap::new();
    let mut running = 0i64;
    for (i, rec) in data.iter().enumerate() {
        if seen_phases.last() != Some(&rec.phase) {
            if seen_phases.contains(&rec.phase) {
                return violation(format!("row {}: phase {} resumed after another phase", i, rec.phase));
            }
            seen_phases.push(rec.phase);
            running = 0;
        }
        let next = expected_round.entry(rec.phase).or_insert(1);
        if rec.round != *next {
            return violation(format!("row {}: round {} where {} expected", i, rec.round, next));
        }
        if rec.round > cfg.rounds_per_phase {
            return violation(format!("row {}: round {} beyond limit {}", i, rec.round, cfg.rounds_per_phase));
        }
        *next += 1;
        running += rec.payout;
        if rec.cumulative_earnings != running {
            return violation(format!(
                "row {}: cumulative {} but payouts sum to {}",
                i, rec.cumulative_earnings, running
            ));
        }
        assert_probability_bounds(cfg, rec.p_safe_at_draw, rec.p_uncertain_at_draw)?;
    }
    Ok(())
}
