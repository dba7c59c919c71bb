//! Participant screen flow around one engine.
//!
//! ```text
//! Welcome → EnterId → Instructions → Rounds → Questionnaire ─┬─► Instructions (next phase)
//!                                                             └─► Debrief → ThankYou
//! ```
//!
//! Any step can leave through `exit`; `restart` goes back to Welcome with a
//! fresh session.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::config::ExperimentConfig;
use crate::engine::{BoxChoice, EngineError, EngineState, Phase, RoundOutcome, TrialEngine};
use crate::intake::{IntakeError, SessionInfo};
use crate::logging::{log, obj, ts_now, v_str, Domain, Level};
use crate::presentation::{feedback, instructions, Feedback, PresentationView};
use crate::questionnaire::{DebriefResponses, PhaseResponses, QuestionnaireRow};
use crate::sink::ExportBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Welcome,
    EnterId,
    Instructions,
    Rounds,
    Questionnaire,
    Debrief,
    ThankYou,
    Exited,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Welcome => "welcome",
            Step::EnterId => "enter_id",
            Step::Instructions => "instructions",
            Step::Rounds => "rounds",
            Step::Questionnaire => "questionnaire",
            Step::Debrief => "debrief",
            Step::ThankYou => "thank_you",
            Step::Exited => "exited",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    Intake(IntakeError),
    Engine(EngineError),
    WrongStep { expected: Step, actual: Step },
    AlreadySubmitted,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Intake(e) => write!(f, "{}", e),
            SessionError::Engine(e) => write!(f, "{}", e),
            SessionError::WrongStep { expected, actual } => write!(
                f,
                "action belongs to step {} but the session is at {}",
                expected.as_str(),
                actual.as_str()
            ),
            SessionError::AlreadySubmitted => write!(f, "final submission already recorded"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<IntakeError> for SessionError {
    fn from(e: IntakeError) -> Self {
        SessionError::Intake(e)
    }
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        SessionError::Engine(e)
    }
}

/// What the current step shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub step: Step,
    pub instructions: Option<[String; 2]>,
    pub engine: Option<PresentationView>,
    pub feedback: Option<Feedback>,
    pub exit_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    step: Step,
    engine: Option<TrialEngine>,
    /// Buffered until the debrief is submitted
    questionnaires: Vec<QuestionnaireRow>,
    last_feedback: Option<Feedback>,
    exit_time: Option<String>,
    final_submission_complete: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            step: Step::Welcome,
            engine: None,
            questionnaires: Vec::new(),
            last_feedback: None,
            exit_time: None,
            final_submission_complete: false,
        }
    }

    fn expect_step(&self, expected: Step) -> Result<(), SessionError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(SessionError::WrongStep {
                expected,
                actual: self.step,
            })
        }
    }

    fn engine_mut(&mut self) -> Result<&mut TrialEngine, SessionError> {
        let step = self.step;
        self.engine.as_mut().ok_or(SessionError::WrongStep {
            expected: Step::EnterId,
            actual: step,
        })
    }

    fn transition(&mut self, to: Step) {
        log(
            Level::Debug,
            Domain::Session,
            "step",
            obj(&[("from", v_str(self.step.as_str())), ("to", v_str(to.as_str()))]),
        );
        self.step = to;
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        self.expect_step(Step::Welcome)?;
        self.transition(Step::EnterId);
        Ok(())
    }

    /// Validate the intake form and build the engine for this participant.
    pub fn submit_intake(&mut self, cfg: &ExperimentConfig, raw_id: &str, raw_area: &str) -> Result<(), SessionError> {
        self.expect_step(Step::EnterId)?;
        let session = SessionInfo::from_form(raw_id, raw_area)?;
        log(
            Level::Info,
            Domain::Session,
            "session_start",
            obj(&[
                ("session_id", v_str(&session.session_id)),
                ("participant_id", json!(session.participant_id.get())),
                ("professional_area", v_str(session.professional_area.label())),
            ]),
        );
        self.engine = Some(TrialEngine::new(cfg.clone(), session)?);
        self.transition(Step::Instructions);
        Ok(())
    }

    pub fn begin_rounds(&mut self) -> Result<Phase, SessionError> {
        self.expect_step(Step::Instructions)?;
        let phase = self.engine_mut()?.begin_phase()?;
        self.last_feedback = None;
        self.transition(Step::Rounds);
        Ok(phase)
    }

    /// Resolve one round. The last round of a phase moves on to its questionnaire.
    pub fn choose(&mut self, choice: BoxChoice, decision_time_secs: f64) -> Result<RoundOutcome, SessionError> {
        self.expect_step(Step::Rounds)?;
        let outcome = self.engine_mut()?.resolve_round(choice, decision_time_secs)?;
        self.last_feedback = Some(feedback(&outcome));
        if outcome.phase_complete {
            self.transition(Step::Questionnaire);
        }
        Ok(outcome)
    }

    pub fn submit_questionnaire(&mut self, responses: PhaseResponses) -> Result<(), SessionError> {
        self.expect_step(Step::Questionnaire)?;
        let engine = self.engine_mut()?;
        let phase = engine.current_phase().ok_or(EngineError::PhaseNotActive {
            state: engine.state().label(),
        })?;
        let last = matches!(engine.state(), EngineState::PhaseComplete { index } if index + 1 == engine.phase_order().len());
        let row = QuestionnaireRow::for_phase(engine.session(), phase, responses);
        self.questionnaires.push(row);
        self.last_feedback = None;
        self.transition(if last { Step::Debrief } else { Step::Instructions });
        Ok(())
    }

    /// Close the session and hand back everything to persist.
    /// Questionnaires come first in the batch; an empty trial list stays empty.
    pub fn submit_debrief(&mut self, responses: DebriefResponses) -> Result<ExportBatch, SessionError> {
        if self.final_submission_complete {
            return Err(SessionError::AlreadySubmitted);
        }
        self.expect_step(Step::Debrief)?;
        let engine = self.engine_mut()?;
        engine.finish()?;
        let row = QuestionnaireRow::debrief(engine.session(), responses);
        let engine = self.engine.as_ref().ok_or(SessionError::WrongStep {
            expected: Step::Debrief,
            actual: self.step,
        })?;
        self.questionnaires.push(row);
        let batch = ExportBatch::from_engine(engine, &self.questionnaires);
        self.final_submission_complete = true;
        self.transition(Step::ThankYou);
        Ok(batch)
    }

    pub fn exit(&mut self) {
        let at = ts_now();
        log(
            Level::Info,
            Domain::Session,
            "session_exit",
            obj(&[("step", v_str(self.step.as_str())), ("at", v_str(&at))]),
        );
        self.exit_time = Some(at);
        self.transition(Step::Exited);
    }

    /// Drop everything and start over with a fresh session.
    pub fn restart(&mut self) {
        log(Level::Info, Domain::Session, "session_restart", obj(&[("step", v_str(self.step.as_str()))]));
        *self = Self::new();
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn engine(&self) -> Option<&TrialEngine> {
        self.engine.as_ref()
    }

    pub fn questionnaires(&self) -> &[QuestionnaireRow] {
        &self.questionnaires
    }

    pub fn final_submission_complete(&self) -> bool {
        self.final_submission_complete
    }

    pub fn view(&self) -> StepView {
        let phase = self.engine.as_ref().and_then(|e| e.current_phase());
        let upcoming = self.engine.as_ref().and_then(|e| match e.state() {
            EngineState::NotStarted => Some(e.phase_order()[0]),
            EngineState::PhaseComplete { index } if index + 1 < e.phase_order().len() => {
                Some(e.phase_order()[index + 1])
            }
            _ => None,
        });
        let shown = match self.step {
            Step::Instructions => upcoming,
            Step::Rounds => phase,
            _ => None,
        };
        StepView {
            step: self.step,
            instructions: shown.map(|p| {
                let [a, b] = instructions(p);
                [a.to_string(), b.to_string()]
            }),
            engine: self.engine.as_ref().map(PresentationView::from_engine),
            feedback: self.last_feedback.clone(),
            exit_time: self.exit_time.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ExperimentConfig {
        ExperimentConfig {
            rounds_per_phase: 2,
            ..ExperimentConfig::default()
        }
    }

    fn at_rounds() -> SessionState {
        let mut s = SessionState::new();
        s.start().unwrap();
        s.submit_intake(&cfg(), "42", "Engineering").unwrap();
        s.begin_rounds().unwrap();
        s
    }

    #[test]
    fn test_intake_rejects_placeholder() {
        let mut s = SessionState::new();
        s.start().unwrap();
        let err = s
            .submit_intake(&cfg(), "42", "Select your professional area")
            .unwrap_err();
        assert_eq!(err, SessionError::Intake(IntakeError::MissingProfessionalArea));
        assert_eq!(s.step(), Step::EnterId);
        assert!(s.engine().is_none());
    }

    #[test]
    fn test_choose_outside_rounds_fails() {
        let mut s = SessionState::new();
        assert!(matches!(
            s.choose(BoxChoice::A, 1.0),
            Err(SessionError::WrongStep { expected: Step::Rounds, actual: Step::Welcome })
        ));
    }

    #[test]
    fn test_last_round_moves_to_questionnaire() {
        let mut s = at_rounds();
        let first = s.choose(BoxChoice::A, 1.0).unwrap();
        assert!(!first.phase_complete);
        assert_eq!(s.step(), Step::Rounds);
        assert!(s.view().feedback.is_some());
        s.choose(BoxChoice::B, 1.0).unwrap();
        assert_eq!(s.step(), Step::Questionnaire);
        s.submit_questionnaire(PhaseResponses::default()).unwrap();
        assert_eq!(s.step(), Step::Instructions);
        assert_eq!(s.questionnaires().len(), 1);
    }

    #[test]
    fn test_bad_decision_time_keeps_round_open() {
        let mut s = at_rounds();
        let err = s.choose(BoxChoice::A, f64::NAN).unwrap_err();
        assert!(matches!(err, SessionError::Engine(EngineError::InvalidDecisionTime(_))));
        assert!(s.choose(BoxChoice::B, -1.0).is_err());
        assert_eq!(s.step(), Step::Rounds);
        assert!(s.view().feedback.is_none());
        assert!(s.engine().unwrap().data().is_empty());
        assert_eq!(s.choose(BoxChoice::A, 2.5).unwrap().round, 1);
    }

    #[test]
    fn test_debrief_refused_until_engine_finishes() {
        let mut s = at_rounds();
        s.choose(BoxChoice::A, 1.0).unwrap();
        s.choose(BoxChoice::A, 1.0).unwrap();
        s.submit_questionnaire(PhaseResponses::default()).unwrap();
        // Force the debrief step while two phases are still unplayed.
        s.step = Step::Debrief;
        assert!(matches!(
            s.submit_debrief(DebriefResponses::default()),
            Err(SessionError::Engine(EngineError::PhasesRemaining { completed: 1 }))
        ));
        assert!(!s.final_submission_complete());
        assert_eq!(s.step(), Step::Debrief);
        assert_eq!(s.questionnaires().len(), 1);
    }

    #[test]
    fn test_instructions_show_upcoming_phase() {
        let mut s = SessionState::new();
        s.start().unwrap();
        s.submit_intake(&cfg(), "42", "Engineering").unwrap();
        let first = s.engine().unwrap().phase_order()[0];
        let view = s.view();
        let expected = instructions(first);
        assert_eq!(view.instructions.unwrap()[0], expected[0]);
    }

    #[test]
    fn test_debrief_only_once() {
        let mut s = at_rounds();
        for _ in 0..3 {
            if s.step() == Step::Instructions {
                s.begin_rounds().unwrap();
            }
            s.choose(BoxChoice::A, 1.0).unwrap();
            s.choose(BoxChoice::A, 1.0).unwrap();
            s.submit_questionnaire(PhaseResponses::default()).unwrap();
        }
        assert_eq!(s.step(), Step::Debrief);
        let batch = s.submit_debrief(DebriefResponses::default()).unwrap();
        assert_eq!(batch.trials.len(), 6);
        assert_eq!(batch.questionnaires.len(), 4);
        assert_eq!(s.step(), Step::ThankYou);
        assert_eq!(
            s.submit_debrief(DebriefResponses::default()),
            Err(SessionError::AlreadySubmitted)
        );
    }

    #[test]
    fn test_exit_and_restart() {
        let mut s = at_rounds();
        s.exit();
        assert_eq!(s.step(), Step::Exited);
        assert!(s.view().exit_time.is_some());
        s.restart();
        assert_eq!(s.step(), Step::Welcome);
        assert!(s.engine().is_none());
    }
}
