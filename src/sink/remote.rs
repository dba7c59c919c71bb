use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::retry::{is_retryable_http_error, retry_async, RetryConfig};
use super::RowSink;
use crate::questionnaire::QuestionnaireRow;
use crate::record::TrialExportRow;

pub const RESULTS_WORKSHEET: &str = "Results";
pub const QUESTIONNAIRES_WORKSHEET: &str = "Questionnaires";

/// Spreadsheet bridge reached over HTTP. Each batch is one JSON POST:
/// `{"worksheet": "...", "rows": [...]}`.
pub struct RemoteSink {
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl RemoteSink {
    pub fn new(url: &str, timeout_secs: u64, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            retry,
        })
    }

    async fn post_rows<T: Serialize>(&self, worksheet: &str, rows: &[T]) -> Result<()> {
        let payload = worksheet_payload(worksheet, rows);
        let rejected = retry_async(&self.retry, "remote_append", || {
            let request = self.client.post(&self.url).json(&payload);
            async move {
                let resp = request.send().await?;
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    Ok(None)
                } else if is_retryable_http_error(status) {
                    Err(anyhow!("remote sink returned {}", status))
                } else {
                    Ok(Some(status))
                }
            }
        })
        .await?;
        if let Some(status) = rejected {
            bail!("remote sink rejected {} rows with status {}", worksheet, status);
        }
        Ok(())
    }
}

/// The payload body for a worksheet append, exposed for bridge implementers.
pub fn worksheet_payload<T: Serialize>(worksheet: &str, rows: &[T]) -> Value {
    json!({ "worksheet": worksheet, "rows": rows })
}

#[async_trait]
impl RowSink for RemoteSink {
    fn name(&self) -> &str {
        "remote"
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn append_trials(&mut self, rows: &[TrialExportRow]) -> Result<()> {
        self.post_rows(RESULTS_WORKSHEET, rows).await
    }

    async fn append_questionnaires(&mut self, rows: &[QuestionnaireRow]) -> Result<()> {
        self.post_rows(QUESTIONNAIRES_WORKSHEET, rows).await
    }
}
