//! Session dumps and deterministic replay.
//!
//! A dump holds everything needed to rebuild a session: participant, phase
//! order, rules, the seed ledger and the recorded choices. Replaying feeds the
//! same choices through a fresh engine and compares what comes out.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ExperimentConfig;
use crate::engine::phase::InitialProbs;
use crate::engine::state::SeedLedger;
use crate::engine::{EngineState, Phase, TrialEngine, PHASE_ORDER_LABEL};
use crate::intake::SessionInfo;
use crate::logging::{log, log_audit, obj, sha256_hex, v_str, Domain, Level};
use crate::questionnaire::QuestionnaireRow;
use crate::record::TrialRecord;
use crate::verify::invariants::{assert_data_sequence, assert_seed_ledger};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session: SessionInfo,
    pub phase_order: [u8; 3],
    pub config: ExperimentConfig,
    pub initial_probs: BTreeMap<Phase, InitialProbs>,
    pub seeds: SeedLedger,
    pub data: Vec<TrialRecord>,
    #[serde(default)]
    pub questionnaires: Vec<QuestionnaireRow>,
    /// Hex SHA-256 of `data` serialized as JSON
    pub data_digest: String,
}

impl SessionExport {
    pub fn from_engine(engine: &TrialEngine, questionnaires: &[QuestionnaireRow]) -> Self {
        let data = engine.data().to_vec();
        let data_digest = data_digest(&data);
        log_audit(
            "session_export",
            engine.session().participant_id.get(),
            &data_digest,
            engine.seeds().len(),
        );
        Self {
            session: engine.session().clone(),
            phase_order: engine.phase_numbers(),
            config: engine.config().clone(),
            initial_probs: engine.initial_probs().clone(),
            seeds: engine.seeds().clone(),
            data,
            questionnaires: questionnaires.to_vec(),
            data_digest,
        }
    }
}

pub fn data_digest(data: &[TrialRecord]) -> String {
    let encoded = serde_json::to_string(data).unwrap_or_default();
    sha256_hex(&encoded)
}

/// Write `session_pid<id>_<YYYYmmdd_HHMMSS>.json` into `dir`, creating it if needed.
pub fn write_session_dump(dir: &Path, export: &SessionExport) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let name = format!(
        "session_pid{}_{}.json",
        export.session.participant_id,
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(export)?;
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    log(
        Level::Info,
        Domain::Audit,
        "session_dump_written",
        obj(&[
            ("participant_id", json!(export.session.participant_id.get())),
            ("path", v_str(&path.display().to_string())),
        ]),
    );
    Ok(path)
}

pub fn read_session_dump(path: &Path) -> Result<SessionExport> {
    let body = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let export = serde_json::from_str(&body).with_context(|| format!("parse {}", path.display()))?;
    Ok(export)
}

/// Rebuild the engine by replaying the recorded choices.
///
/// Sessions that derived their order from the participant id are rebuilt the
/// same way; sessions without a `phase_order` seed get the recorded order.
pub fn replay(export: &SessionExport) -> Result<TrialEngine> {
    let mut engine = if export.seeds.get(PHASE_ORDER_LABEL).is_some() {
        TrialEngine::new(export.config.clone(), export.session.clone())?
    } else {
        TrialEngine::with_phase_order(export.config.clone(), export.session.clone(), &export.phase_order)?
    };
    for (i, rec) in export.data.iter().enumerate() {
        if !matches!(engine.state(), EngineState::PhaseActive { .. }) {
            let phase = engine.begin_phase()?;
            if phase != rec.phase {
                anyhow::bail!("row {}: recorded phase {} but replay began phase {}", i, rec.phase, phase);
            }
        }
        engine.resolve_round(rec.chosen_option, rec.decision_time_seconds)?;
    }
    // Phases that were begun but never played
    while engine.initial_probs().len() < export.initial_probs.len() {
        if engine.begin_phase().is_err() {
            break;
        }
    }
    Ok(engine)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub matches: bool,
    pub mismatches: Vec<String>,
    pub rounds: usize,
}

const FLOAT_TOL: f64 = 1e-9;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= FLOAT_TOL
}

fn compare_record(i: usize, want: &TrialRecord, got: &TrialRecord, out: &mut Vec<String>) {
    let same = want.session_id == got.session_id
        && want.participant_id == got.participant_id
        && want.professional_area == got.professional_area
        && want.phase == got.phase
        && want.round == got.round
        && want.chosen_option == got.chosen_option
        && want.outcome == got.outcome
        && want.payout == got.payout
        && want.cumulative_earnings == got.cumulative_earnings
        && close(want.decision_time_seconds, got.decision_time_seconds)
        && close(want.p_safe_at_draw, got.p_safe_at_draw)
        && close(want.p_uncertain_at_draw, got.p_uncertain_at_draw);
    if !same {
        out.push(format!(
            "row {} (phase {} round {}): recorded {} {} → replayed {} {}",
            i, want.phase, want.round, want.outcome, want.payout, got.outcome, got.payout
        ));
    }
}

/// Replay the dump and report every divergence from what was recorded.
pub fn verify(export: &SessionExport) -> ReplayReport {
    let mut mismatches = Vec::new();
    let pid = export.session.participant_id.get();

    let digest = data_digest(&export.data);
    if digest != export.data_digest {
        mismatches.push(format!("data digest {} does not match recorded {}", digest, export.data_digest));
    }
    if let Err(v) = assert_seed_ledger(pid, &export.seeds) {
        mismatches.push(v.msg);
    }
    if let Err(v) = assert_data_sequence(&export.config, &export.data) {
        mismatches.push(v.msg);
    }

    match replay(export) {
        Ok(engine) => {
            if engine.phase_numbers() != export.phase_order {
                mismatches.push(format!(
                    "phase order {:?} does not match recorded {:?}",
                    engine.phase_numbers(),
                    export.phase_order
                ));
            }
            if engine.data().len() != export.data.len() {
                mismatches.push(format!(
                    "replayed {} rounds, recorded {}",
                    engine.data().len(),
                    export.data.len()
                ));
            }
            for (i, (want, got)) in export.data.iter().zip(engine.data()).enumerate() {
                compare_record(i, want, got, &mut mismatches);
            }
            for (phase, want) in &export.initial_probs {
                match engine.initial_probs().get(phase) {
                    Some(got) if close(got.p_safe, want.p_safe) && close(got.p_uncertain, want.p_uncertain) => {}
                    Some(got) => mismatches.push(format!(
                        "phase {} initial probabilities {:?} replayed as {:?}",
                        phase, want, got
                    )),
                    None => mismatches.push(format!("phase {} never began on replay", phase)),
                }
            }
            if engine.seeds() != &export.seeds {
                mismatches.push(format!(
                    "seed ledger differs: {} recorded, {} replayed",
                    export.seeds.len(),
                    engine.seeds().len()
                ));
            }
        }
        Err(err) => mismatches.push(format!("replay failed: {:#}", err)),
    }

    let matches = mismatches.is_empty();
    log_audit(
        if matches { "replay_verified" } else { "replay_mismatch" },
        pid,
        &digest,
        export.seeds.len(),
    );
    ReplayReport {
        matches,
        mismatches,
        rounds: export.data.len(),
    }
}
