use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::RowSink;
use crate::questionnaire::{QuestionnaireRow, QUESTIONNAIRE_COLUMNS};
use crate::record::{TrialExportRow, TRIAL_COLUMNS};

/// Append-only CSV files shared by every session on this machine.
pub struct CsvSink {
    trials_path: PathBuf,
    questionnaires_path: PathBuf,
}

impl CsvSink {
    pub fn new(trials_path: impl Into<PathBuf>, questionnaires_path: impl Into<PathBuf>) -> Self {
        Self {
            trials_path: trials_path.into(),
            questionnaires_path: questionnaires_path.into(),
        }
    }
}

/// Quote a field when it contains a separator, quote or line break.
pub fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

pub fn csv_line(fields: &[String]) -> String {
    fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",")
}

/// Append rows, writing the header only when the file is new or empty.
pub fn append_csv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let write_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let mut out = String::new();
    if write_header {
        out.push_str(&header.join(","));
        out.push('\n');
    }
    for row in rows {
        out.push_str(&csv_line(row));
        out.push('\n');
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(out.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[async_trait]
impl RowSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn append_trials(&mut self, rows: &[TrialExportRow]) -> Result<()> {
        let rows: Vec<Vec<String>> = rows.iter().map(|r| r.to_fields()).collect();
        append_csv(&self.trials_path, &TRIAL_COLUMNS, &rows)
    }

    async fn append_questionnaires(&mut self, rows: &[QuestionnaireRow]) -> Result<()> {
        let rows: Vec<Vec<String>> = rows.iter().map(|r| r.to_fields()).collect();
        append_csv(&self.questionnaires_path, &QUESTIONNAIRE_COLUMNS, &rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("rows.csv");
        append_csv(&path, &["a", "b"], &[vec!["1".into(), "2".into()]]).unwrap();
        append_csv(&path, &["a", "b"], &[vec!["3".into(), "x,y".into()]]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "a,b\n1,2\n3,\"x,y\"\n");
    }

    #[test]
    fn test_empty_file_gets_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(&path, "").unwrap();
        append_csv(&path, &["a"], &[vec!["1".into()]]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\n1\n");
    }
}
