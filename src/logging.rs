//! Structured logging for experiment sessions.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Domain-specific categories for filtering
//! 3. Replay/audit support via seeds and data digests
//!
//! Every record is one JSON object per line. Records go to the run directory
//! (`$LOG_DIR/$RUN_ID/events.jsonl`, or `trace.jsonl` for trace/debug) and are
//! mirrored on stderr so stdout stays free for the session driver.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Session, // Intake, screen flow, restarts
    Phase,   // Phase order, phase initialization
    Round,   // Draws, payouts, probability adjustment
    Export,  // Sink writes, remote retries
    Audit,   // Seeds, digests, replay verification
    System,  // Startup, shutdown, configuration
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Session => "session",
            Domain::Phase => "phase",
            Domain::Round => "round",
            Domain::Export => "export",
            Domain::Audit => "audit",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS is a comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

type Sink = Mutex<BufWriter<Box<dyn Write + Send>>>;

struct RunContext {
    run_id: String,
    events: Sink,
    trace: Sink,
}

fn open_or_discard(path: PathBuf) -> Sink {
    let writer: Box<dyn Write + Send> = match File::create(&path) {
        Ok(file) => Box::new(file),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            Box::new(io::sink())
        }
    };
    Mutex::new(BufWriter::new(writer))
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_or_discard(run_dir.join("events.jsonl")),
            trace: open_or_discard(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["session_id", "participant_id", "phase", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Sink, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    eprintln!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_phase_order(participant_id: u64, seed: u64, order: &[u8]) {
    log(
        Level::Info,
        Domain::Phase,
        "phase_order",
        obj(&[
            ("participant_id", json!(participant_id)),
            ("seed", json!(seed)),
            ("order", json!(order)),
        ]),
    );
}

pub fn log_phase_start(participant_id: u64, phase: u8, seed: u64, p_safe: f64, p_uncertain: f64) {
    log(
        Level::Info,
        Domain::Phase,
        "phase_start",
        obj(&[
            ("participant_id", json!(participant_id)),
            ("phase", json!(phase)),
            ("seed", json!(seed)),
            ("p_safe", v_num(p_safe)),
            ("p_uncertain", v_num(p_uncertain)),
        ]),
    );
}

#[allow(clippy::too_many_arguments)]
pub fn log_round(
    participant_id: u64,
    phase: u8,
    round: u32,
    seed: u64,
    choice: &str,
    outcome: &str,
    payout: i64,
    cumulative: i64,
) {
    log(
        Level::Debug,
        Domain::Round,
        "round_resolved",
        obj(&[
            ("participant_id", json!(participant_id)),
            ("phase", json!(phase)),
            ("round", json!(round)),
            ("seed", json!(seed)),
            ("choice", v_str(choice)),
            ("outcome", v_str(outcome)),
            ("payout", json!(payout)),
            ("cumulative", json!(cumulative)),
        ]),
    );
}

pub fn log_export(sink: &str, kind: &str, rows: usize, result: Result<(), &str>) {
    let (level, status, error) = match result {
        Ok(()) => (Level::Info, "ok", Value::Null),
        Err(err) => (Level::Warn, "failed", v_str(err)),
    };
    log(
        level,
        Domain::Export,
        "sink_write",
        obj(&[
            ("sink", v_str(sink)),
            ("kind", v_str(kind)),
            ("rows", json!(rows)),
            ("status", v_str(status)),
            ("error", error),
        ]),
    );
}

/// Log an audit entry for replay verification
pub fn log_audit(event_type: &str, participant_id: u64, data_digest: &str, seeds: usize) {
    log(
        Level::Info,
        Domain::Audit,
        event_type,
        obj(&[
            ("participant_id", json!(participant_id)),
            ("data_digest", v_str(data_digest)),
            ("seeds", json!(seeds)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Hex SHA-256 of a string, used for data digests in audit records.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_sha256_hex_deterministic() {
        assert_eq!(sha256_hex("session"), sha256_hex("session"));
        assert_ne!(sha256_hex("input-a"), sha256_hex("input-b"));
        assert_eq!(sha256_hex("").len(), 64);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_split_fields_lifts_identifiers() {
        let fields = obj(&[
            ("participant_id", json!(7)),
            ("phase", json!(2)),
            ("seed", json!(2009)),
        ]);
        let (top, data) = split_fields(fields);
        assert!(top.contains_key("participant_id"));
        assert!(top.contains_key("phase"));
        assert!(data.contains_key("seed"));
        assert!(!data.contains_key("phase"));
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
