//! Experiment rules and runtime configuration, both overridable from the environment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed interval `[min, max]` that a starting probability is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbRange {
    pub min: f64,
    pub max: f64,
}

impl ProbRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Map a unit draw `u ∈ [0, 1)` onto the range: `min + (max - min) * u`.
    pub fn sample(&self, u: f64) -> f64 {
        self.min + (self.max - self.min) * u
    }

    pub fn contains(&self, p: f64) -> bool {
        p >= self.min && p <= self.max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub msg: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid experiment config: {}", self.msg)
    }
}

impl std::error::Error for ConfigError {}

/// The behavioral design of the experiment: round limits, starting
/// probability ranges, adjustment step, clamp bounds and payouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub rounds_per_phase: u32,
    /// Box A's starting probability in phases 1 and 2
    pub safe_prob_init: f64,
    pub phase1_uncertain: ProbRange,
    pub phase2_uncertain: ProbRange,
    pub phase3_safe: ProbRange,
    pub phase3_uncertain: ProbRange,
    pub prob_adjust: f64,
    pub prob_floor: f64,
    pub prob_ceiling: f64,
    pub reward_red: i64,
    pub reward_black: i64,
    pub ambiguity_reward: i64,
    pub ambiguity_loss: i64,
    pub reward_gold: i64,
    pub reward_silver: i64,
    /// Chance that a Rumsfeld box yields a gold/silver ball instead of red/black
    pub special_prob: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            rounds_per_phase: 10,
            safe_prob_init: 0.7,
            phase1_uncertain: ProbRange::new(0.1, 0.9),
            phase2_uncertain: ProbRange::new(0.3, 0.7),
            phase3_safe: ProbRange::new(0.2, 0.8),
            phase3_uncertain: ProbRange::new(0.3, 0.7),
            prob_adjust: 0.05,
            prob_floor: 0.1,
            prob_ceiling: 0.9,
            reward_red: 10,
            reward_black: -5,
            ambiguity_reward: 15,
            ambiguity_loss: -10,
            reward_gold: 50,
            reward_silver: -25,
            special_prob: 0.1,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl ExperimentConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            rounds_per_phase: env_or("ROUNDS_PER_PHASE", d.rounds_per_phase),
            safe_prob_init: env_or("SAFE_PROB_INIT", d.safe_prob_init),
            phase1_uncertain: ProbRange::new(
                env_or("UNCERTAIN_PROB_MIN", d.phase1_uncertain.min),
                env_or("UNCERTAIN_PROB_MAX", d.phase1_uncertain.max),
            ),
            phase2_uncertain: ProbRange::new(
                env_or("PHASE2_UNCERTAIN_MIN", d.phase2_uncertain.min),
                env_or("PHASE2_UNCERTAIN_MAX", d.phase2_uncertain.max),
            ),
            phase3_safe: ProbRange::new(
                env_or("PHASE3_SAFE_MIN", d.phase3_safe.min),
                env_or("PHASE3_SAFE_MAX", d.phase3_safe.max),
            ),
            phase3_uncertain: ProbRange::new(
                env_or("PHASE3_UNCERTAIN_MIN", d.phase3_uncertain.min),
                env_or("PHASE3_UNCERTAIN_MAX", d.phase3_uncertain.max),
            ),
            prob_adjust: env_or("PROB_ADJUST", d.prob_adjust),
            prob_floor: env_or("PROB_LIMIT_MIN", d.prob_floor),
            prob_ceiling: env_or("PROB_LIMIT_MAX", d.prob_ceiling),
            reward_red: env_or("REWARD_RED", d.reward_red),
            reward_black: env_or("REWARD_BLACK", d.reward_black),
            ambiguity_reward: env_or("AMBIGUITY_REWARD", d.ambiguity_reward),
            ambiguity_loss: env_or("AMBIGUITY_LOSS", d.ambiguity_loss),
            reward_gold: env_or("REWARD_GOLD", d.reward_gold),
            reward_silver: env_or("REWARD_SILVER", d.reward_silver),
            special_prob: env_or("RUMSFELD_SPECIAL_PROB", d.special_prob),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |msg: String| Err(ConfigError { msg });
        if self.rounds_per_phase == 0 {
            return err("rounds_per_phase must be at least 1".to_string());
        }
        let probs = [
            ("safe_prob_init", self.safe_prob_init),
            ("prob_adjust", self.prob_adjust),
            ("prob_floor", self.prob_floor),
            ("prob_ceiling", self.prob_ceiling),
            ("special_prob", self.special_prob),
        ];
        for (name, p) in probs {
            if !(0.0..=1.0).contains(&p) {
                return err(format!("{} = {} outside [0, 1]", name, p));
            }
        }
        if self.prob_floor > self.prob_ceiling {
            return err(format!(
                "prob_floor {} above prob_ceiling {}",
                self.prob_floor, self.prob_ceiling
            ));
        }
        let clamp = ProbRange::new(self.prob_floor, self.prob_ceiling);
        if !clamp.contains(self.safe_prob_init) {
            return err(format!(
                "safe_prob_init {} outside [{}, {}]",
                self.safe_prob_init, clamp.min, clamp.max
            ));
        }
        // Starting probabilities are recorded unclamped, so each range must sit inside the clamp.
        let ranges = [
            ("phase1_uncertain", self.phase1_uncertain),
            ("phase2_uncertain", self.phase2_uncertain),
            ("phase3_safe", self.phase3_safe),
            ("phase3_uncertain", self.phase3_uncertain),
        ];
        for (name, r) in ranges {
            if !r.min.is_finite() || !r.max.is_finite() || r.min > r.max {
                return err(format!("{} = [{}, {}] is not a valid range", name, r.min, r.max));
            }
            if !clamp.contains(r.min) || !clamp.contains(r.max) {
                return err(format!(
                    "{} = [{}, {}] is not a sub-range of [{}, {}]",
                    name, r.min, r.max, clamp.min, clamp.max
                ));
            }
        }
        Ok(())
    }

    /// Keep a probability inside `[prob_floor, prob_ceiling]`.
    pub fn clamp(&self, p: f64) -> f64 {
        p.max(self.prob_floor).min(self.prob_ceiling)
    }
}

/// Runtime configuration: experiment rules plus storage destinations.
#[derive(Debug, Clone)]
pub struct Config {
    pub experiment: ExperimentConfig,
    pub trials_csv: String,
    pub questionnaire_csv: String,
    /// Empty disables the SQLite sink
    pub sqlite_path: String,
    /// Spreadsheet bridge endpoint; `None` disables remote export
    pub remote_sink_url: Option<String>,
    pub remote_timeout_secs: u64,
    pub remote_max_retries: u32,
    pub session_export_dir: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            experiment: ExperimentConfig::from_env(),
            trials_csv: std::env::var("TRIALS_CSV").unwrap_or_else(|_| "experiment_data_all.csv".to_string()),
            questionnaire_csv: std::env::var("QUESTIONNAIRE_CSV")
                .unwrap_or_else(|_| "questionnaire_data_all.csv".to_string()),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./experiment.sqlite".to_string()),
            remote_sink_url: std::env::var("REMOTE_SINK_URL").ok().filter(|v| !v.trim().is_empty()),
            remote_timeout_secs: env_or("REMOTE_TIMEOUT_SECS", 10),
            remote_max_retries: env_or("REMOTE_MAX_RETRIES", 3),
            session_export_dir: std::env::var("SESSION_EXPORT_DIR").unwrap_or_else(|_| "out/sessions".to_string()),
        }
    }
}
