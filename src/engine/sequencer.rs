//! Phase sequencing: a participant's phase order is a pure function of their id.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use super::Phase;

/// The sequencer seeds directly with the participant id.
pub fn phase_order_seed(participant_id: u64) -> u64 {
    participant_id
}

/// Shuffle `[1, 2, 3]` with a generator seeded from the participant id.
pub fn phase_order(participant_id: u64) -> [Phase; 3] {
    let mut rng = StdRng::seed_from_u64(phase_order_seed(participant_id));
    let mut phases = Phase::CANONICAL;
    phases.shuffle(&mut rng);
    phases
}

/// Validate a caller-supplied order as a permutation of {1, 2, 3}.
pub fn parse_phase_order(order: &[u8]) -> Option<[Phase; 3]> {
    if order.len() != 3 {
        return None;
    }
    let mut phases = [Phase::One; 3];
    let mut seen = [false; 3];
    for (slot, n) in phases.iter_mut().zip(order) {
        let phase = Phase::from_number(*n)?;
        let idx = (phase.number() - 1) as usize;
        if seen[idx] {
            return None;
        }
        seen[idx] = true;
        *slot = phase;
    }
    Some(phases)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_permutation(order: &[Phase; 3]) -> bool {
        let mut nums: Vec<u8> = order.iter().map(|p| p.number()).collect();
        nums.sort_unstable();
        nums == vec![1, 2, 3]
    }

    #[test]
    fn test_order_is_idempotent() {
        for pid in 1..500u64 {
            assert_eq!(phase_order(pid), phase_order(pid));
        }
    }

    #[test]
    fn test_order_is_permutation() {
        for pid in 1..500u64 {
            assert!(is_permutation(&phase_order(pid)), "pid {}", pid);
        }
    }

    #[test]
    fn test_orders_vary_across_participants() {
        let distinct: std::collections::HashSet<[Phase; 3]> = (1..200u64).map(phase_order).collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_parse_phase_order() {
        assert_eq!(
            parse_phase_order(&[2, 3, 1]),
            Some([Phase::Two, Phase::Three, Phase::One])
        );
        assert_eq!(parse_phase_order(&[1, 1, 2]), None);
        assert_eq!(parse_phase_order(&[1, 2]), None);
        assert_eq!(parse_phase_order(&[0, 1, 2]), None);
    }
}
