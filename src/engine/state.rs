//! The per-participant trial engine and its phase/round lifecycle.
//!
//! ```text
//! NotStarted ─begin_phase─► PhaseActive(0) ─last round─► PhaseComplete(0)
//!            ─begin_phase─► PhaseActive(1) ─ … ─► PhaseComplete(2) ─finish─► SessionComplete
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::draw::{draw_outcome, DrawTrace, SeededDraws};
use super::phase::{init_phase, InitialProbs};
use super::sequencer::{parse_phase_order, phase_order, phase_order_seed};
use super::{
    phase_seed_label, round_seed, round_seed_label, BoxChoice, EngineError, Outcome, Phase,
    PHASE_ORDER_LABEL,
};
use crate::config::ExperimentConfig;
use crate::intake::SessionInfo;
use crate::logging::{log, log_phase_order, log_phase_start, log_round, obj, v_str, Domain, Level};
use crate::record::{round3, TrialRecord};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineState {
    NotStarted,
    /// `index` points into the phase order
    PhaseActive { index: usize },
    PhaseComplete { index: usize },
    SessionComplete,
}

impl EngineState {
    pub fn label(&self) -> &'static str {
        match self {
            EngineState::NotStarted => "not_started",
            EngineState::PhaseActive { .. } => "phase_active",
            EngineState::PhaseComplete { .. } => "phase_complete",
            EngineState::SessionComplete => "session_complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub label: String,
    pub seed: u64,
}

/// Seeds actually used, in the order they were first used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedLedger {
    entries: Vec<SeedEntry>,
}

impl SeedLedger {
    pub fn record(&mut self, label: String, seed: u64) {
        match self.entries.iter_mut().find(|e| e.label == label) {
            Some(entry) => entry.seed = seed,
            None => self.entries.push(SeedEntry { label, seed }),
        }
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.entries.iter().find(|e| e.label == label).map(|e| e.seed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeedEntry> {
        self.entries.iter()
    }
}

/// What a resolved round hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub phase: Phase,
    pub round: u32,
    pub choice: BoxChoice,
    pub outcome: Outcome,
    pub payout: i64,
    pub special: Option<Outcome>,
    pub cumulative_earnings: i64,
    pub seed: u64,
    pub trace: DrawTrace,
    /// True when this was the phase's last round
    pub phase_complete: bool,
}

/// Step probabilities after a choice: picking A shifts weight from A to B,
/// picking B shifts it back. Both results are clamped.
pub fn adjust_probabilities(
    cfg: &ExperimentConfig,
    choice: BoxChoice,
    p_safe: f64,
    p_uncertain: f64,
) -> (f64, f64) {
    match choice {
        BoxChoice::A => (
            cfg.clamp(p_safe - cfg.prob_adjust),
            cfg.clamp(p_uncertain + cfg.prob_adjust),
        ),
        BoxChoice::B => (
            cfg.clamp(p_safe + cfg.prob_adjust),
            cfg.clamp(p_uncertain - cfg.prob_adjust),
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialEngine {
    cfg: ExperimentConfig,
    session: SessionInfo,
    phase_order: [Phase; 3],
    state: EngineState,
    p_safe: f64,
    p_uncertain: f64,
    round: u32,
    cumulative_earnings: i64,
    initial_probs: BTreeMap<Phase, InitialProbs>,
    seeds: SeedLedger,
    /// (round, cumulative earnings) for the current phase
    timeline: Vec<(u32, i64)>,
    data: Vec<TrialRecord>,
}

impl TrialEngine {
    /// New session with the phase order derived from the participant id.
    pub fn new(cfg: ExperimentConfig, session: SessionInfo) -> Result<Self, EngineError> {
        cfg.validate()?;
        let pid = session.participant_id.get();
        let order = phase_order(pid);
        let mut engine = Self::with_order(cfg, session, order);
        let seed = phase_order_seed(pid);
        engine.seeds.record(PHASE_ORDER_LABEL.to_string(), seed);
        log_phase_order(pid, seed, &engine.phase_numbers());
        Ok(engine)
    }

    /// New session with a caller-supplied phase order. No `phase_order` seed is recorded.
    pub fn with_phase_order(
        cfg: ExperimentConfig,
        session: SessionInfo,
        order: &[u8],
    ) -> Result<Self, EngineError> {
        cfg.validate()?;
        let phases = parse_phase_order(order).ok_or_else(|| EngineError::InvalidPhaseOrder(order.to_vec()))?;
        Ok(Self::with_order(cfg, session, phases))
    }

    fn with_order(cfg: ExperimentConfig, session: SessionInfo, phase_order: [Phase; 3]) -> Self {
        Self {
            cfg,
            session,
            phase_order,
            state: EngineState::NotStarted,
            p_safe: 0.0,
            p_uncertain: 0.0,
            round: 1,
            cumulative_earnings: 0,
            initial_probs: BTreeMap::new(),
            seeds: SeedLedger::default(),
            timeline: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Initialize the next phase in the order.
    pub fn begin_phase(&mut self) -> Result<Phase, EngineError> {
        let index = match self.state {
            EngineState::NotStarted => 0,
            EngineState::PhaseComplete { index } if index + 1 < self.phase_order.len() => index + 1,
            EngineState::PhaseComplete { .. } => return Err(EngineError::NoPhasesRemaining),
            EngineState::PhaseActive { index } => {
                return Err(EngineError::PhaseStillActive {
                    phase: self.phase_order[index].number(),
                    round: self.round,
                })
            }
            EngineState::SessionComplete => return Err(EngineError::SessionComplete),
        };
        let phase = self.phase_order[index];
        self.reset_for_phase(phase);
        self.state = EngineState::PhaseActive { index };
        Ok(phase)
    }

    fn reset_for_phase(&mut self, phase: Phase) {
        let pid = self.session.participant_id.get();
        let start = init_phase(&self.cfg, pid, phase);
        self.seeds.record(phase_seed_label(phase), start.seed);
        self.p_safe = start.probs.p_safe;
        self.p_uncertain = start.probs.p_uncertain;
        self.round = 1;
        self.cumulative_earnings = 0;
        self.timeline.clear();
        self.initial_probs.insert(phase, start.probs);
        log_phase_start(pid, phase.number(), start.seed, self.p_safe, self.p_uncertain);
    }

    /// Draw a ball from the chosen box, pay out, record, and adjust.
    pub fn resolve_round(
        &mut self,
        choice: BoxChoice,
        decision_time_secs: f64,
    ) -> Result<RoundOutcome, EngineError> {
        let index = match self.state {
            EngineState::PhaseActive { index } => index,
            EngineState::PhaseComplete { index } => {
                return Err(EngineError::RoundLimitReached {
                    phase: self.phase_order[index].number(),
                    limit: self.cfg.rounds_per_phase,
                })
            }
            EngineState::SessionComplete => return Err(EngineError::SessionComplete),
            EngineState::NotStarted => {
                return Err(EngineError::PhaseNotActive {
                    state: self.state.label(),
                })
            }
        };
        if !decision_time_secs.is_finite() || decision_time_secs < 0.0 {
            return Err(EngineError::InvalidDecisionTime(decision_time_secs));
        }
        let phase = self.phase_order[index];
        let pid = self.session.participant_id.get();
        let round = self.round;

        let seed = round_seed(pid, phase, round);
        self.seeds.record(round_seed_label(phase, round), seed);
        let mut draws = SeededDraws::new(seed);
        let draw = draw_outcome(&self.cfg, phase, choice, self.p_safe, self.p_uncertain, &mut draws);

        self.cumulative_earnings += draw.payout;
        self.data.push(TrialRecord {
            session_id: self.session.session_id.clone(),
            participant_id: self.session.participant_id,
            professional_area: self.session.professional_area,
            phase,
            round,
            chosen_option: choice,
            decision_time_seconds: round3(decision_time_secs),
            outcome: draw.outcome,
            payout: draw.payout,
            cumulative_earnings: self.cumulative_earnings,
            p_safe_at_draw: round3(self.p_safe),
            p_uncertain_at_draw: round3(self.p_uncertain),
        });
        self.timeline.push((round, self.cumulative_earnings));

        let (p_safe, p_uncertain) = adjust_probabilities(&self.cfg, choice, self.p_safe, self.p_uncertain);
        self.p_safe = p_safe;
        self.p_uncertain = p_uncertain;

        log_round(
            pid,
            phase.number(),
            round,
            seed,
            choice.as_str(),
            draw.outcome.as_str(),
            draw.payout,
            self.cumulative_earnings,
        );

        let phase_complete = round >= self.cfg.rounds_per_phase;
        if phase_complete {
            self.state = EngineState::PhaseComplete { index };
            log(
                Level::Info,
                Domain::Phase,
                "phase_complete",
                obj(&[
                    ("participant_id", json!(pid)),
                    ("phase", json!(phase.number())),
                    ("earnings", json!(self.cumulative_earnings)),
                ]),
            );
        } else {
            self.round += 1;
        }

        Ok(RoundOutcome {
            phase,
            round,
            choice,
            outcome: draw.outcome,
            payout: draw.payout,
            special: draw.special,
            cumulative_earnings: self.cumulative_earnings,
            seed,
            trace: draw.trace,
            phase_complete,
        })
    }

    /// Close the session once the last phase is complete.
    pub fn finish(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::PhaseComplete { index } if index + 1 == self.phase_order.len() => {
                self.state = EngineState::SessionComplete;
                log(
                    Level::Info,
                    Domain::Session,
                    "session_complete",
                    obj(&[
                        ("participant_id", json!(self.session.participant_id.get())),
                        ("session_id", v_str(&self.session.session_id)),
                        ("rounds", json!(self.data.len())),
                    ]),
                );
                Ok(())
            }
            EngineState::SessionComplete => Err(EngineError::SessionComplete),
            EngineState::NotStarted => Err(EngineError::PhasesRemaining { completed: 0 }),
            EngineState::PhaseActive { index } => Err(EngineError::PhaseStillActive {
                phase: self.phase_order[index].number(),
                round: self.round,
            }),
            EngineState::PhaseComplete { index } => Err(EngineError::PhasesRemaining { completed: index + 1 }),
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.cfg
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn phase_order(&self) -> [Phase; 3] {
        self.phase_order
    }

    pub fn phase_numbers(&self) -> [u8; 3] {
        [
            self.phase_order[0].number(),
            self.phase_order[1].number(),
            self.phase_order[2].number(),
        ]
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Position of the current phase in the order (0-based), if any phase has begun.
    pub fn phase_index(&self) -> Option<usize> {
        match self.state {
            EngineState::PhaseActive { index } | EngineState::PhaseComplete { index } => Some(index),
            EngineState::SessionComplete => Some(self.phase_order.len() - 1),
            EngineState::NotStarted => None,
        }
    }

    pub fn current_phase(&self) -> Option<Phase> {
        self.phase_index().map(|i| self.phase_order[i])
    }

    pub fn p_safe(&self) -> f64 {
        self.p_safe
    }

    pub fn p_uncertain(&self) -> f64 {
        self.p_uncertain
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn cumulative_earnings(&self) -> i64 {
        self.cumulative_earnings
    }

    pub fn initial_probs(&self) -> &BTreeMap<Phase, InitialProbs> {
        &self.initial_probs
    }

    pub fn seeds(&self) -> &SeedLedger {
        &self.seeds
    }

    pub fn timeline(&self) -> &[(u32, i64)] {
        &self.timeline
    }

    pub fn data(&self) -> &[TrialRecord] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::{ParticipantId, ProfessionalArea};

    fn session(pid: u64) -> SessionInfo {
        SessionInfo {
            session_id: "1700000000".to_string(),
            participant_id: ParticipantId::new(pid).unwrap(),
            professional_area: ProfessionalArea::Student,
        }
    }

    fn small_cfg(rounds: u32) -> ExperimentConfig {
        ExperimentConfig {
            rounds_per_phase: rounds,
            ..ExperimentConfig::default()
        }
    }

    #[test]
    fn test_resolve_before_begin_fails() {
        let mut engine = TrialEngine::new(small_cfg(3), session(42)).unwrap();
        let err = engine.resolve_round(BoxChoice::A, 1.0).unwrap_err();
        assert_eq!(err, EngineError::PhaseNotActive { state: "not_started" });
        assert!(engine.data().is_empty());
    }

    #[test]
    fn test_round_limit_completes_phase() {
        let mut engine = TrialEngine::new(small_cfg(3), session(42)).unwrap();
        engine.begin_phase().unwrap();
        for r in 1..=3 {
            let out = engine.resolve_round(BoxChoice::A, 0.5).unwrap();
            assert_eq!(out.round, r);
            assert_eq!(out.phase_complete, r == 3);
        }
        assert!(matches!(engine.state(), EngineState::PhaseComplete { index: 0 }));
        let err = engine.resolve_round(BoxChoice::B, 0.5).unwrap_err();
        assert!(matches!(err, EngineError::RoundLimitReached { limit: 3, .. }));
        assert_eq!(engine.data().len(), 3);
    }

    #[test]
    fn test_bad_decision_time_leaves_record_untouched() {
        let mut engine = TrialEngine::new(small_cfg(3), session(42)).unwrap();
        engine.begin_phase().unwrap();
        for secs in [f64::NAN, f64::INFINITY, -0.5] {
            let err = engine.resolve_round(BoxChoice::A, secs).unwrap_err();
            assert!(matches!(err, EngineError::InvalidDecisionTime(_)));
        }
        assert!(engine.data().is_empty());
        let phase = engine.current_phase().unwrap();
        assert!(engine.seeds().get(&round_seed_label(phase, 1)).is_none());
        let out = engine.resolve_round(BoxChoice::A, 0.0).unwrap();
        assert_eq!(out.round, 1);
        assert_eq!(engine.data().len(), 1);
    }

    #[test]
    fn test_begin_phase_while_active_fails() {
        let mut engine = TrialEngine::new(small_cfg(2), session(7)).unwrap();
        engine.begin_phase().unwrap();
        assert!(matches!(
            engine.begin_phase(),
            Err(EngineError::PhaseStillActive { round: 1, .. })
        ));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut engine = TrialEngine::new(small_cfg(2), session(9)).unwrap();
        let order = engine.phase_order();
        for (i, expected) in order.iter().enumerate() {
            assert_eq!(engine.begin_phase().unwrap(), *expected);
            assert_eq!(engine.current_phase(), Some(*expected));
            engine.resolve_round(BoxChoice::A, 1.0).unwrap();
            engine.resolve_round(BoxChoice::B, 1.0).unwrap();
            if i < 2 {
                assert_eq!(engine.finish(), Err(EngineError::PhasesRemaining { completed: i + 1 }));
            }
        }
        assert_eq!(engine.begin_phase(), Err(EngineError::NoPhasesRemaining));
        engine.finish().unwrap();
        assert_eq!(engine.state(), EngineState::SessionComplete);
        assert_eq!(engine.resolve_round(BoxChoice::A, 1.0), Err(EngineError::SessionComplete));
        assert_eq!(engine.begin_phase(), Err(EngineError::SessionComplete));
        assert_eq!(engine.data().len(), 6);
        assert_eq!(engine.initial_probs().len(), 3);
        // phase_order + 3 phases + 6 rounds
        assert_eq!(engine.seeds().len(), 10);
    }

    #[test]
    fn test_phase_reset_clears_counters() {
        let mut engine = TrialEngine::new(small_cfg(2), session(11)).unwrap();
        engine.begin_phase().unwrap();
        engine.resolve_round(BoxChoice::A, 1.0).unwrap();
        engine.resolve_round(BoxChoice::A, 1.0).unwrap();
        engine.begin_phase().unwrap();
        assert_eq!(engine.round(), 1);
        assert_eq!(engine.cumulative_earnings(), 0);
        assert!(engine.timeline().is_empty());
    }

    #[test]
    fn test_seeds_recorded_with_labels() {
        let mut engine = TrialEngine::new(small_cfg(2), session(42)).unwrap();
        let phase = engine.begin_phase().unwrap();
        let out = engine.resolve_round(BoxChoice::B, 2.0).unwrap();
        assert_eq!(engine.seeds().get(PHASE_ORDER_LABEL), Some(42));
        assert_eq!(engine.seeds().get(&phase_seed_label(phase)), Some(42 + phase.number() as u64));
        assert_eq!(engine.seeds().get(&round_seed_label(phase, 1)), Some(out.seed));
        assert_eq!(out.seed, 42 + phase.number() as u64 * 1000 + 1);
    }

    #[test]
    fn test_explicit_phase_order() {
        let engine = TrialEngine::with_phase_order(small_cfg(2), session(5), &[3, 1, 2]).unwrap();
        assert_eq!(engine.phase_order(), [Phase::Three, Phase::One, Phase::Two]);
        assert_eq!(engine.seeds().get(PHASE_ORDER_LABEL), None);
        assert!(matches!(
            TrialEngine::with_phase_order(small_cfg(2), session(5), &[1, 1, 2]),
            Err(EngineError::InvalidPhaseOrder(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = ExperimentConfig {
            prob_floor: 0.95,
            ..ExperimentConfig::default()
        };
        assert!(matches!(TrialEngine::new(cfg, session(1)), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_adjust_clamps() {
        let cfg = ExperimentConfig::default();
        let (s, u) = adjust_probabilities(&cfg, BoxChoice::A, cfg.prob_floor + 0.01, cfg.prob_ceiling - 0.01);
        assert_eq!(s, cfg.prob_floor);
        assert_eq!(u, cfg.prob_ceiling);
        let (s, u) = adjust_probabilities(&cfg, BoxChoice::B, 0.5, 0.5);
        assert!((s - 0.55).abs() < 1e-12);
        assert!((u - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_record_holds_probabilities_at_draw() {
        let mut engine = TrialEngine::with_phase_order(small_cfg(3), session(42), &[1, 2, 3]).unwrap();
        engine.begin_phase().unwrap();
        engine.resolve_round(BoxChoice::A, 1.23456).unwrap();
        let rec = &engine.data()[0];
        assert_eq!(rec.p_safe_at_draw, 0.7);
        assert_eq!(rec.decision_time_seconds, 1.235);
        assert!((engine.p_safe() - 0.65).abs() < 1e-12);
    }
}
