pub mod config;
pub mod engine;
pub mod intake;
pub mod logging;
pub mod presentation;
pub mod questionnaire;
pub mod record;
pub mod replay;
pub mod session;
pub mod sink;
pub mod verify;
