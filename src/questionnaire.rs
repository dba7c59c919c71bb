//! Post-phase and debrief questionnaire rows.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::engine::Phase;
use crate::intake::SessionInfo;

pub const QUESTIONNAIRE_COLUMNS: [&str; 15] = [
    "session_id",
    "participant_id",
    "professional_area",
    "phase",
    "reason",
    "pattern",
    "stress",
    "confidence",
    "perceived_control",
    "strategy",
    "overall_stress",
    "overall_confidence",
    "phase_preference",
    "final_strategy",
    "comments",
];

/// A 1–5 rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Likert(u8);

impl Likert {
    pub const MIDPOINT: Likert = Likert(3);

    pub fn new(v: u8) -> Option<Self> {
        (1..=5).contains(&v).then_some(Self(v))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for Likert {
    fn default() -> Self {
        Self::MIDPOINT
    }
}

impl TryFrom<u8> for Likert {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Likert::new(v).ok_or_else(|| format!("rating {} outside 1..=5", v))
    }
}

impl From<Likert> for u8 {
    fn from(l: Likert) -> Self {
        l.0
    }
}

impl fmt::Display for Likert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Answers collected after each phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseResponses {
    pub reason: String,
    pub pattern: String,
    pub stress: Likert,
    pub confidence: Likert,
    pub perceived_control: Likert,
    pub strategy: String,
}

/// Answers collected once, after the last phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebriefResponses {
    pub overall_stress: Likert,
    pub overall_confidence: Likert,
    pub phase_preference: String,
    pub final_strategy: String,
    pub comments: String,
}

/// Which questionnaire a row belongs to: a phase number or `"debrief"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionnaireStage {
    Phase(Phase),
    Debrief,
}

impl Serialize for QuestionnaireStage {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            QuestionnaireStage::Phase(p) => p.serialize(s),
            QuestionnaireStage::Debrief => s.serialize_str("debrief"),
        }
    }
}

impl<'de> Deserialize<'de> for QuestionnaireStage {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(d)? {
            serde_json::Value::String(s) if s == "debrief" => Ok(QuestionnaireStage::Debrief),
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .and_then(Phase::from_number)
                .map(QuestionnaireStage::Phase)
                .ok_or_else(|| de::Error::custom(format!("unknown phase {}", n))),
            other => Err(de::Error::custom(format!("unknown questionnaire stage {}", other))),
        }
    }
}

impl fmt::Display for QuestionnaireStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionnaireStage::Phase(p) => write!(f, "{}", p),
            QuestionnaireStage::Debrief => f.write_str("debrief"),
        }
    }
}

/// One questionnaire row. Fields that don't apply to the stage stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireRow {
    pub session_id: String,
    pub participant_id: u64,
    pub professional_area: String,
    pub phase: QuestionnaireStage,
    pub reason: Option<String>,
    pub pattern: Option<String>,
    pub stress: Option<Likert>,
    pub confidence: Option<Likert>,
    pub perceived_control: Option<Likert>,
    pub strategy: Option<String>,
    pub overall_stress: Option<Likert>,
    pub overall_confidence: Option<Likert>,
    pub phase_preference: Option<String>,
    pub final_strategy: Option<String>,
    pub comments: Option<String>,
}

impl QuestionnaireRow {
    fn blank(session: &SessionInfo, phase: QuestionnaireStage) -> Self {
        Self {
            session_id: session.session_id.clone(),
            participant_id: session.participant_id.get(),
            professional_area: session.professional_area.label().to_string(),
            phase,
            reason: None,
            pattern: None,
            stress: None,
            confidence: None,
            perceived_control: None,
            strategy: None,
            overall_stress: None,
            overall_confidence: None,
            phase_preference: None,
            final_strategy: None,
            comments: None,
        }
    }

    pub fn for_phase(session: &SessionInfo, phase: Phase, r: PhaseResponses) -> Self {
        Self {
            reason: Some(r.reason),
            pattern: Some(r.pattern),
            stress: Some(r.stress),
            confidence: Some(r.confidence),
            perceived_control: Some(r.perceived_control),
            strategy: Some(r.strategy),
            ..Self::blank(session, QuestionnaireStage::Phase(phase))
        }
    }

    pub fn debrief(session: &SessionInfo, r: DebriefResponses) -> Self {
        Self {
            overall_stress: Some(r.overall_stress),
            overall_confidence: Some(r.overall_confidence),
            phase_preference: Some(r.phase_preference),
            final_strategy: Some(r.final_strategy),
            comments: Some(r.comments),
            ..Self::blank(session, QuestionnaireStage::Debrief)
        }
    }

    /// Field values in [`QUESTIONNAIRE_COLUMNS`] order; `None` is blank.
    pub fn to_fields(&self) -> Vec<String> {
        let s = |v: &Option<String>| v.clone().unwrap_or_default();
        let l = |v: &Option<Likert>| v.map(|x| x.to_string()).unwrap_or_default();
        vec![
            self.session_id.clone(),
            self.participant_id.to_string(),
            self.professional_area.clone(),
            self.phase.to_string(),
            s(&self.reason),
            s(&self.pattern),
            l(&self.stress),
            l(&self.confidence),
            l(&self.perceived_control),
            s(&self.strategy),
            l(&self.overall_stress),
            l(&self.overall_confidence),
            s(&self.phase_preference),
            s(&self.final_strategy),
            s(&self.comments),
        ]
    }
}
