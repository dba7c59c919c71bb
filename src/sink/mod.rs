//! Persistence: append-only row sinks and the exporter that feeds them.
//!
//! Local sinks are always written. Remote sinks are best-effort: a failure is
//! logged and reported, never propagated, and the engine's data stays intact
//! so the export can be retried.

pub mod csv;
pub mod remote;
pub mod retry;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::engine::TrialEngine;
use crate::logging::{log, log_export, obj, v_str, Domain, Level};
use crate::questionnaire::QuestionnaireRow;
use crate::record::{merge_initial_probs, TrialExportRow};

#[async_trait]
pub trait RowSink: Send {
    fn name(&self) -> &str;

    fn is_remote(&self) -> bool {
        false
    }

    async fn append_trials(&mut self, rows: &[TrialExportRow]) -> Result<()>;

    async fn append_questionnaires(&mut self, rows: &[QuestionnaireRow]) -> Result<()>;
}

/// Everything one session hands to persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportBatch {
    pub trials: Vec<TrialExportRow>,
    pub questionnaires: Vec<QuestionnaireRow>,
}

impl ExportBatch {
    pub fn from_engine(engine: &TrialEngine, questionnaires: &[QuestionnaireRow]) -> Self {
        Self {
            trials: merge_initial_probs(engine.data(), engine.initial_probs()),
            questionnaires: questionnaires.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkOutcome {
    pub sink: String,
    pub remote: bool,
    /// `None` when the batch had no rows of that kind
    pub questionnaires: Option<Result<usize, String>>,
    pub trials: Option<Result<usize, String>>,
}

impl SinkOutcome {
    pub fn ok(&self) -> bool {
        !matches!(self.questionnaires, Some(Err(_))) && !matches!(self.trials, Some(Err(_)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportReport {
    pub outcomes: Vec<SinkOutcome>,
}

impl ExportReport {
    pub fn local_ok(&self) -> bool {
        self.outcomes.iter().filter(|o| !o.remote).all(SinkOutcome::ok)
    }

    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(SinkOutcome::ok)
    }

    pub fn failures(&self) -> Vec<&SinkOutcome> {
        self.outcomes.iter().filter(|o| !o.ok()).collect()
    }
}

/// A configured sink that could not be opened.
#[derive(Debug, Clone, PartialEq)]
struct Unavailable {
    sink: String,
    remote: bool,
    error: String,
}

pub struct Exporter {
    sinks: Vec<Box<dyn RowSink>>,
    unavailable: Vec<Unavailable>,
}

impl Exporter {
    pub fn new(sinks: Vec<Box<dyn RowSink>>) -> Self {
        Self {
            sinks,
            unavailable: Vec::new(),
        }
    }

    /// CSV always; SQLite unless its path is empty; remote when a URL is configured.
    ///
    /// A sink that fails to open is left out and shows up as a failed outcome
    /// in every report, so the remaining sinks still run.
    pub fn from_config(cfg: &Config) -> Self {
        let mut exporter = Self::new(vec![Box::new(csv::CsvSink::new(
            &cfg.trials_csv,
            &cfg.questionnaire_csv,
        ))]);
        if !cfg.sqlite_path.is_empty() {
            let opened = sqlite::SqliteSink::new(&cfg.sqlite_path).and_then(|mut store| {
                store.init()?;
                Ok(store)
            });
            match opened {
                Ok(store) => exporter.sinks.push(Box::new(store)),
                Err(err) => exporter.mark_unavailable("sqlite", false, err),
            }
        }
        if let Some(url) = &cfg.remote_sink_url {
            let retry = retry::RetryConfig {
                max_retries: cfg.remote_max_retries,
                ..Default::default()
            };
            match remote::RemoteSink::new(url, cfg.remote_timeout_secs, retry) {
                Ok(sink) => exporter.sinks.push(Box::new(sink)),
                Err(err) => exporter.mark_unavailable("remote", true, err),
            }
        }
        exporter
    }

    fn mark_unavailable(&mut self, sink: &str, remote: bool, err: anyhow::Error) {
        let error = format!("{:#}", err);
        log(
            Level::Error,
            Domain::Export,
            "sink_unavailable",
            obj(&[("sink", v_str(sink)), ("remote", json!(remote)), ("error", v_str(&error))]),
        );
        self.unavailable.push(Unavailable {
            sink: sink.to_string(),
            remote,
            error,
        });
    }

    /// Write the batch to every sink, local ones first. Questionnaires go
    /// before trials; empty halves are skipped.
    pub async fn export(&mut self, batch: &ExportBatch) -> ExportReport {
        let mut report = ExportReport::default();
        self.sinks.sort_by_key(|s| s.is_remote());
        for sink in self.sinks.iter_mut() {
            let questionnaires = if batch.questionnaires.is_empty() {
                None
            } else {
                let result = sink.append_questionnaires(&batch.questionnaires).await;
                Some(finish(sink.name(), "questionnaires", batch.questionnaires.len(), result))
            };
            let trials = if batch.trials.is_empty() {
                None
            } else {
                let result = sink.append_trials(&batch.trials).await;
                Some(finish(sink.name(), "trials", batch.trials.len(), result))
            };
            report.outcomes.push(SinkOutcome {
                sink: sink.name().to_string(),
                remote: sink.is_remote(),
                questionnaires,
                trials,
            });
        }
        for missing in &self.unavailable {
            report.outcomes.push(SinkOutcome {
                sink: missing.sink.clone(),
                remote: missing.remote,
                questionnaires: Some(Err(missing.error.clone())),
                trials: Some(Err(missing.error.clone())),
            });
        }
        report.outcomes.sort_by_key(|o| o.remote);
        report
    }
}

fn finish(sink: &str, kind: &str, rows: usize, result: Result<()>) -> Result<usize, String> {
    match result {
        Ok(()) => {
            log_export(sink, kind, rows, Ok(()));
            Ok(rows)
        }
        Err(err) => {
            let msg = format!("{:#}", err);
            log_export(sink, kind, rows, Err(&msg));
            Err(msg)
        }
    }
}
