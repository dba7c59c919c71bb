//! Headless participant driver.
//!
//! Reads one command per line from stdin and answers with one JSON line on
//! stdout. Logs go to stderr and the run directory.
//!
//! ```text
//! start <participant_id> <professional area>
//! begin
//! choose A|B [decision_seconds]
//! questionnaire {"reason": "...", "stress": 3, ...}
//! debrief {"overall_stress": 2, ...}
//! view | exit | restart
//! ```

use anyhow::{bail, Result};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Instant;

use uncertainty_trials::config::Config;
use uncertainty_trials::engine::BoxChoice;
use uncertainty_trials::logging::{log, obj, v_str, Domain, Level};
use uncertainty_trials::questionnaire::{DebriefResponses, PhaseResponses};
use uncertainty_trials::replay::{write_session_dump, SessionExport};
use uncertainty_trials::session::{SessionState, Step};
use uncertainty_trials::sink::{ExportReport, Exporter};

struct Driver {
    cfg: Config,
    session: SessionState,
    /// When the current choice was first shown
    prompt_at: Instant,
    export_failed: bool,
}

impl Driver {
    fn new(cfg: Config) -> Self {
        Self {
            cfg,
            session: SessionState::new(),
            prompt_at: Instant::now(),
            export_failed: false,
        }
    }

    async fn handle(&mut self, line: &str) -> Result<Value> {
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };
        match cmd {
            "start" => {
                if self.session.step() == Step::Welcome {
                    self.session.start()?;
                }
                let (raw_id, raw_area) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                self.session.submit_intake(&self.cfg.experiment, raw_id, raw_area.trim())?;
                let order = self.session.engine().map(|e| e.phase_numbers());
                Ok(json!({ "phase_order": order }))
            }
            "begin" => {
                let phase = self.session.begin_rounds()?;
                self.prompt_at = Instant::now();
                Ok(json!({ "phase": phase }))
            }
            "choose" => {
                let mut parts = rest.split_whitespace();
                let choice = parts
                    .next()
                    .and_then(BoxChoice::parse)
                    .ok_or_else(|| anyhow::anyhow!("choose needs A or B"))?;
                let secs = match parts.next() {
                    Some(raw) => raw.parse::<f64>()?,
                    None => self.prompt_at.elapsed().as_secs_f64(),
                };
                let outcome = self.session.choose(choice, secs)?;
                self.prompt_at = Instant::now();
                Ok(json!({ "outcome": outcome, "feedback": self.session.view().feedback }))
            }
            "questionnaire" => {
                let responses: PhaseResponses = if rest.is_empty() {
                    PhaseResponses::default()
                } else {
                    serde_json::from_str(rest)?
                };
                self.session.submit_questionnaire(responses)?;
                Ok(json!({}))
            }
            "debrief" => {
                let responses: DebriefResponses = if rest.is_empty() {
                    DebriefResponses::default()
                } else {
                    serde_json::from_str(rest)?
                };
                let batch = self.session.submit_debrief(responses)?;
                let mut exporter = Exporter::from_config(&self.cfg);
                let report = exporter.export(&batch).await;
                let dump = self.write_dump();
                self.export_failed |= !report.local_ok() || dump.is_none();
                Ok(export_summary(&report, dump))
            }
            "view" => Ok(json!({})),
            "exit" => {
                self.session.exit();
                Ok(json!({}))
            }
            "restart" => {
                self.session.restart();
                Ok(json!({}))
            }
            other => bail!("unknown command {:?}", other),
        }
    }

    fn write_dump(&self) -> Option<String> {
        let engine = self.session.engine()?;
        let export = SessionExport::from_engine(engine, self.session.questionnaires());
        match write_session_dump(Path::new(&self.cfg.session_export_dir), &export) {
            Ok(path) => Some(path.display().to_string()),
            Err(err) => {
                log(
                    Level::Error,
                    Domain::Audit,
                    "session_dump_failed",
                    obj(&[("error", v_str(&format!("{:#}", err)))]),
                );
                None
            }
        }
    }
}

fn export_summary(report: &ExportReport, dump: Option<String>) -> Value {
    json!({
        "export": report,
        "local_ok": report.local_ok(),
        "all_ok": report.all_ok(),
        "session_dump": dump,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    cfg.experiment.validate()?;
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("rules", serde_json::to_value(&cfg.experiment)?),
            ("trials_csv", v_str(&cfg.trials_csv)),
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("remote", json!(cfg.remote_sink_url.is_some())),
        ]),
    );

    let mut driver = Driver::new(cfg);
    let stdin = io::stdin();
    let stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut reply = match driver.handle(line).await {
            Ok(extra) => json!({ "ok": true, "result": extra }),
            Err(err) => json!({ "ok": false, "error": format!("{:#}", err) }),
        };
        reply["step"] = json!(driver.session.step());
        reply["view"] = serde_json::to_value(driver.session.view())?;
        let mut out = stdout.lock();
        writeln!(out, "{}", reply)?;
        out.flush()?;
    }

    log(Level::Info, Domain::System, "shutdown", obj(&[("step", v_str(driver.session.step().as_str()))]));
    if driver.export_failed {
        bail!("local export failed; see the export log for which sink or session dump did not land");
    }
    Ok(())
}
