use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::RowSink;
use crate::questionnaire::QuestionnaireRow;
use crate::record::TrialExportRow;

pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS trials (
                session_id TEXT NOT NULL,
                participant_id INTEGER NOT NULL,
                professional_area TEXT NOT NULL,
                phase INTEGER NOT NULL,
                round INTEGER NOT NULL,
                box_chosen TEXT NOT NULL,
                decision_time REAL NOT NULL,
                result TEXT NOT NULL,
                reward INTEGER NOT NULL,
                cumulative_earnings INTEGER NOT NULL,
                p_safe REAL NOT NULL,
                p_uncertain REAL NOT NULL,
                init_p_safe REAL,
                init_p_uncertain REAL
            );
            CREATE TABLE IF NOT EXISTS questionnaires (
                session_id TEXT NOT NULL,
                participant_id INTEGER NOT NULL,
                professional_area TEXT NOT NULL,
                phase TEXT NOT NULL,
                reason TEXT,
                pattern TEXT,
                stress INTEGER,
                confidence INTEGER,
                perceived_control INTEGER,
                strategy TEXT,
                overall_stress INTEGER,
                overall_confidence INTEGER,
                phase_preference TEXT,
                final_strategy TEXT,
                comments TEXT
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        let table = match table {
            "trials" => "trials",
            "questionnaires" => "questionnaires",
            other => anyhow::bail!("unknown table {}", other),
        };
        let n = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n)
    }
}

#[async_trait]
impl RowSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append_trials(&mut self, rows: &[TrialExportRow]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for row in rows {
            let r = &row.record;
            tx.execute(
                "INSERT INTO trials (session_id, participant_id, professional_area, phase, round,
                    box_chosen, decision_time, result, reward, cumulative_earnings, p_safe,
                    p_uncertain, init_p_safe, init_p_uncertain)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    r.session_id,
                    r.participant_id.get() as i64,
                    r.professional_area.label(),
                    r.phase.number() as i64,
                    r.round as i64,
                    r.chosen_option.as_str(),
                    r.decision_time_seconds,
                    r.outcome.as_str(),
                    r.payout,
                    r.cumulative_earnings,
                    r.p_safe_at_draw,
                    r.p_uncertain_at_draw,
                    row.init_p_safe,
                    row.init_p_uncertain
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn append_questionnaires(&mut self, rows: &[QuestionnaireRow]) -> Result<()> {
        let likert = |v: &Option<crate::questionnaire::Likert>| v.map(|l| l.get() as i64);
        let tx = self.conn.transaction()?;
        for q in rows {
            tx.execute(
                "INSERT INTO questionnaires (session_id, participant_id, professional_area, phase,
                    reason, pattern, stress, confidence, perceived_control, strategy,
                    overall_stress, overall_confidence, phase_preference, final_strategy, comments)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    q.session_id,
                    q.participant_id as i64,
                    q.professional_area,
                    q.phase.to_string(),
                    q.reason,
                    q.pattern,
                    likert(&q.stress),
                    likert(&q.confidence),
                    likert(&q.perceived_control),
                    q.strategy,
                    likert(&q.overall_stress),
                    likert(&q.overall_confidence),
                    q.phase_preference,
                    q.final_strategy,
                    q.comments
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
