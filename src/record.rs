//! Trial records and their export shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::phase::InitialProbs;
use crate::engine::{BoxChoice, Outcome, Phase};
use crate::intake::{ParticipantId, ProfessionalArea};

/// Column order of the exported results table.
pub const TRIAL_COLUMNS: [&str; 14] = [
    "session_id",
    "participant_id",
    "professional_area",
    "phase",
    "round",
    "box_chosen",
    "decision_time",
    "result",
    "reward",
    "cumulative_earnings",
    "p_safe",
    "p_uncertain",
    "init_p_safe",
    "init_p_uncertain",
];

/// One resolved round. Appended once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub session_id: String,
    pub participant_id: ParticipantId,
    pub professional_area: ProfessionalArea,
    pub phase: Phase,
    pub round: u32,
    #[serde(rename = "box_chosen")]
    pub chosen_option: BoxChoice,
    /// Seconds since the previous prompt, as measured by the presentation layer
    #[serde(rename = "decision_time")]
    pub decision_time_seconds: f64,
    #[serde(rename = "result")]
    pub outcome: Outcome,
    #[serde(rename = "reward")]
    pub payout: i64,
    pub cumulative_earnings: i64,
    /// Box A probability the draw used, before adjustment
    #[serde(rename = "p_safe")]
    pub p_safe_at_draw: f64,
    #[serde(rename = "p_uncertain")]
    pub p_uncertain_at_draw: f64,
}

/// A trial record with its phase's starting probabilities merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialExportRow {
    #[serde(flatten)]
    pub record: TrialRecord,
    pub init_p_safe: Option<f64>,
    pub init_p_uncertain: Option<f64>,
}

impl TrialExportRow {
    /// Field values in [`TRIAL_COLUMNS`] order. Missing initial probabilities are blank.
    pub fn to_fields(&self) -> Vec<String> {
        let r = &self.record;
        let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        vec![
            r.session_id.clone(),
            r.participant_id.to_string(),
            r.professional_area.label().to_string(),
            r.phase.to_string(),
            r.round.to_string(),
            r.chosen_option.to_string(),
            r.decision_time_seconds.to_string(),
            r.outcome.to_string(),
            r.payout.to_string(),
            r.cumulative_earnings.to_string(),
            r.p_safe_at_draw.to_string(),
            r.p_uncertain_at_draw.to_string(),
            opt(self.init_p_safe),
            opt(self.init_p_uncertain),
        ]
    }
}

/// Merge each record with the initial probabilities of its own phase.
pub fn merge_initial_probs(
    data: &[TrialRecord],
    initial_probs: &BTreeMap<Phase, InitialProbs>,
) -> Vec<TrialExportRow> {
    data.iter()
        .map(|record| {
            let init = initial_probs.get(&record.phase);
            TrialExportRow {
                record: record.clone(),
                init_p_safe: init.map(|p| p.p_safe),
                init_p_uncertain: init.map(|p| p.p_uncertain),
            }
        })
        .collect()
}

/// Round to three decimals, the precision recorded for times and probabilities.
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(phase: Phase, round: u32) -> TrialRecord {
        TrialRecord {
            session_id: "1700000000".to_string(),
            participant_id: ParticipantId::new(42).unwrap(),
            professional_area: ProfessionalArea::Engineering,
            phase,
            round,
            chosen_option: BoxChoice::A,
            decision_time_seconds: 1.234,
            outcome: Outcome::Red,
            payout: 10,
            cumulative_earnings: 10,
            p_safe_at_draw: 0.7,
            p_uncertain_at_draw: 0.5,
        }
    }

    #[test]
    fn test_merge_matches_on_phase() {
        let mut init = BTreeMap::new();
        init.insert(Phase::Two, InitialProbs { p_safe: 0.7, p_uncertain: 0.42 });
        init.insert(Phase::Three, InitialProbs { p_safe: 0.3, p_uncertain: 0.6 });
        let rows = merge_initial_probs(&[record(Phase::Three, 1), record(Phase::Two, 1)], &init);
        assert_eq!(rows[0].init_p_safe, Some(0.3));
        assert_eq!(rows[1].init_p_uncertain, Some(0.42));
    }

    #[test]
    fn test_missing_phase_leaves_blanks() {
        let rows = merge_initial_probs(&[record(Phase::One, 3)], &BTreeMap::new());
        let fields = rows[0].to_fields();
        assert_eq!(fields.len(), TRIAL_COLUMNS.len());
        assert_eq!(fields[12], "");
        assert_eq!(fields[13], "");
    }

    #[test]
    fn test_fields_follow_column_order() {
        let mut init = BTreeMap::new();
        init.insert(Phase::One, InitialProbs { p_safe: 0.7, p_uncertain: 0.25 });
        let fields = merge_initial_probs(&[record(Phase::One, 2)], &init)[0].to_fields();
        assert_eq!(fields[1], "42");
        assert_eq!(fields[2], "Engineering");
        assert_eq!(fields[3], "1");
        assert_eq!(fields[5], "A");
        assert_eq!(fields[7], "red");
        assert_eq!(fields[13], "0.25");
    }

    #[test]
    fn test_serde_uses_export_column_names() {
        let value = serde_json::to_value(record(Phase::One, 1)).unwrap();
        assert_eq!(value["box_chosen"], "A");
        assert_eq!(value["result"], "red");
        assert_eq!(value["reward"], 10);
        assert_eq!(value["phase"], 1);
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.12345), 0.123);
        assert_eq!(round3(2.0), 2.0);
        assert_eq!(round3(0.6499999), 0.65);
    }
}
