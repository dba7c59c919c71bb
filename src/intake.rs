//! Participant intake: the only place raw user input is validated.
//!
//! Anything that reaches the engine has already passed through here, so the
//! engine never sees a zero or non-numeric participant id.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// Participant id empty, non-numeric, zero or too long
    InvalidParticipantId(String),
    /// No professional area selected, or an unknown one
    MissingProfessionalArea,
}

impl fmt::Display for IntakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeError::InvalidParticipantId(raw) => {
                write!(f, "please enter a valid numeric participant id (got {:?})", raw)
            }
            IntakeError::MissingProfessionalArea => write!(f, "please select your professional area"),
        }
    }
}

impl std::error::Error for IntakeError {}

/// Maximum number of digits the intake form accepts.
pub const PARTICIPANT_ID_MAX_DIGITS: usize = 5;

/// A validated, strictly positive participant id. Seed root for every draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ParticipantId(u64);

impl ParticipantId {
    pub fn new(id: u64) -> Result<Self, IntakeError> {
        if id == 0 {
            return Err(IntakeError::InvalidParticipantId(id.to_string()));
        }
        Ok(Self(id))
    }

    /// Parse form input: digits only, at most [`PARTICIPANT_ID_MAX_DIGITS`].
    pub fn parse(raw: &str) -> Result<Self, IntakeError> {
        let trimmed = raw.trim();
        let invalid = || IntakeError::InvalidParticipantId(raw.to_string());
        if trimmed.is_empty()
            || trimmed.len() > PARTICIPANT_ID_MAX_DIGITS
            || !trimmed.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let id: u64 = trimmed.parse().map_err(|_| invalid())?;
        Self::new(id).map_err(|_| invalid())
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for ParticipantId {
    type Error = IntakeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ParticipantId> for u64 {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfessionalArea {
    #[serde(rename = "Student")]
    Student,
    #[serde(rename = "Financial/Banking")]
    FinancialBanking,
    #[serde(rename = "Social Sciences")]
    SocialSciences,
    #[serde(rename = "Information Technology")]
    InformationTechnology,
    #[serde(rename = "Engineering")]
    Engineering,
    #[serde(rename = "Healthcare/Medicine")]
    HealthcareMedicine,
    #[serde(rename = "Education")]
    Education,
    #[serde(rename = "Business/Management")]
    BusinessManagement,
    #[serde(rename = "Law/Legal")]
    LawLegal,
    #[serde(rename = "Arts/Creative")]
    ArtsCreative,
    #[serde(rename = "Science/Research")]
    ScienceResearch,
    #[serde(rename = "Other")]
    Other,
}

impl ProfessionalArea {
    pub const ALL: [ProfessionalArea; 12] = [
        ProfessionalArea::Student,
        ProfessionalArea::FinancialBanking,
        ProfessionalArea::SocialSciences,
        ProfessionalArea::InformationTechnology,
        ProfessionalArea::Engineering,
        ProfessionalArea::HealthcareMedicine,
        ProfessionalArea::Education,
        ProfessionalArea::BusinessManagement,
        ProfessionalArea::LawLegal,
        ProfessionalArea::ArtsCreative,
        ProfessionalArea::ScienceResearch,
        ProfessionalArea::Other,
    ];

    /// Text shown in the selection list before the participant picks an area.
    pub const PLACEHOLDER: &'static str = "Select your professional area";

    pub fn label(&self) -> &'static str {
        match self {
            ProfessionalArea::Student => "Student",
            ProfessionalArea::FinancialBanking => "Financial/Banking",
            ProfessionalArea::SocialSciences => "Social Sciences",
            ProfessionalArea::InformationTechnology => "Information Technology",
            ProfessionalArea::Engineering => "Engineering",
            ProfessionalArea::HealthcareMedicine => "Healthcare/Medicine",
            ProfessionalArea::Education => "Education",
            ProfessionalArea::BusinessManagement => "Business/Management",
            ProfessionalArea::LawLegal => "Law/Legal",
            ProfessionalArea::ArtsCreative => "Arts/Creative",
            ProfessionalArea::ScienceResearch => "Science/Research",
            ProfessionalArea::Other => "Other",
        }
    }

    /// Case-insensitive match on the label. The placeholder is rejected.
    pub fn parse(raw: &str) -> Result<Self, IntakeError> {
        let trimmed = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|area| area.label().eq_ignore_ascii_case(trimmed))
            .ok_or(IntakeError::MissingProfessionalArea)
    }
}

impl fmt::Display for ProfessionalArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of one participant session, stamped onto every exported row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub participant_id: ParticipantId,
    pub professional_area: ProfessionalArea,
}

impl SessionInfo {
    /// Session ids are the epoch second at which the session started.
    pub fn new(participant_id: ParticipantId, professional_area: ProfessionalArea) -> Self {
        Self {
            session_id: chrono::Utc::now().timestamp().to_string(),
            participant_id,
            professional_area,
        }
    }

    /// Validate raw form input and open a session.
    pub fn from_form(raw_id: &str, raw_area: &str) -> Result<Self, IntakeError> {
        let participant_id = ParticipantId::parse(raw_id)?;
        let professional_area = ProfessionalArea::parse(raw_area)?;
        Ok(Self::new(participant_id, professional_area))
    }
}
