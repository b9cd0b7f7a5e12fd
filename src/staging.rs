//! Filesystem input preparer.
//!
//! Raw review exports live under `<data_dir>/<game>/jobs/<job>/raw-data/` as
//! CSV files with `id` and `review` columns. Preparation turns every row into
//! one JSONL model invocation record and stages the file under a time-stamped
//! prefix next to an empty output directory for the batch service.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::StepError;
use crate::ports::InputPreparer;
use crate::workflow::{StagedLocations, check_path_id};

const RAW_DATA_DIR: &str = "raw-data";
const MESSAGES_API_VERSION: &str = "bedrock-2023-05-31";

/// Model parameters and prompt applied to every staged record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadTemplate {
    pub model_id: String,
    pub prompt: String,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_tokens: u32,
}

/// Request body layout expected by the model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Legacy `Human:/Assistant:` text completion.
    TextCompletion,
    /// Messages API with a single user turn.
    Messages,
}

impl PayloadFormat {
    pub fn for_model(model_id: &str) -> Result<Self, StepError> {
        if model_id == "anthropic.claude-v2:1" {
            Ok(PayloadFormat::TextCompletion)
        } else if model_id.contains("anthropic.claude-3") {
            Ok(PayloadFormat::Messages)
        } else {
            Err(StepError::Preparation(format!(
                "unsupported model id: {model_id}"
            )))
        }
    }
}

impl PayloadTemplate {
    /// Build the model input for a single review.
    pub fn model_input(&self, review: &str) -> Result<Value, StepError> {
        let text = format!("{}{review}", self.prompt);
        let input = match PayloadFormat::for_model(&self.model_id)? {
            PayloadFormat::TextCompletion => json!({
                "prompt": format!("Human: {text}\n\nAssistant:"),
                "temperature": self.temperature,
                "top_k": self.top_k,
                "top_p": self.top_p,
                "max_tokens_to_sample": self.max_tokens,
            }),
            PayloadFormat::Messages => json!({
                "anthropic_version": MESSAGES_API_VERSION,
                "temperature": self.temperature,
                "top_k": self.top_k,
                "top_p": self.top_p,
                "max_tokens": self.max_tokens,
                "messages": [{
                    "role": "user",
                    "content": [{"type": "text", "text": text}],
                }],
            }),
        };
        Ok(input)
    }
}

/// One line of the staged JSONL input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedRecord {
    pub record_id: String,
    pub model_input: Value,
}

/// Parse a review export and build one staged record per row.
pub fn build_records(csv_data: &[u8], template: &PayloadTemplate) -> Result<Vec<StagedRecord>, StepError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(csv_data);
    let headers = reader
        .headers()
        .map_err(|e| StepError::Preparation(format!("unreadable CSV header: {e}")))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (Some(id_col), Some(review_col)) = (column("id"), column("review")) else {
        return Err(StepError::Preparation(
            "invalid CSV file, missing 'id' or 'review' columns".into(),
        ));
    };

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| {
            StepError::Preparation(format!("malformed CSV row {}: {e}", line + 2))
        })?;
        let (Some(id), Some(review)) = (row.get(id_col), row.get(review_col)) else {
            return Err(StepError::Preparation(format!(
                "CSV row {} is missing 'id' or 'review'",
                line + 2
            )));
        };
        records.push(StagedRecord {
            record_id: id.to_string(),
            model_input: template.model_input(review)?,
        });
    }

    if records.is_empty() {
        return Err(StepError::Preparation("CSV file contains no reviews".into()));
    }
    Ok(records)
}

/// Stages review exports found on the local filesystem.
pub struct FsPreparer {
    data_dir: PathBuf,
    template: PayloadTemplate,
}

impl FsPreparer {
    pub fn new(data_dir: impl Into<PathBuf>, template: PayloadTemplate) -> Self {
        Self {
            data_dir: data_dir.into(),
            template,
        }
    }

    fn job_dir(&self, game_id: &str, job_id: &str) -> Result<PathBuf, StepError> {
        let game_id = check_path_id(game_id).map_err(StepError::Preparation)?;
        let job_id = check_path_id(job_id).map_err(StepError::Preparation)?;
        Ok(self.data_dir.join(game_id).join("jobs").join(job_id))
    }

    /// Copy a review export into the job's raw-data directory.
    pub async fn import_source(
        &self,
        game_id: &str,
        job_id: &str,
        source: &Path,
    ) -> Result<PathBuf, StepError> {
        let file_name = source.file_name().ok_or_else(|| {
            StepError::Preparation(format!("not a file: {}", source.display()))
        })?;
        let raw_dir = self.job_dir(game_id, job_id)?.join(RAW_DATA_DIR);
        tokio::fs::create_dir_all(&raw_dir).await?;
        let target = raw_dir.join(file_name);
        tokio::fs::copy(source, &target).await.map_err(|e| {
            StepError::Preparation(format!("cannot read {}: {e}", source.display()))
        })?;
        Ok(target)
    }

    /// First CSV file (by name) in the job's raw-data directory.
    async fn find_source(&self, game_id: &str, job_id: &str) -> Result<PathBuf, StepError> {
        let raw_dir = self.job_dir(game_id, job_id)?.join(RAW_DATA_DIR);
        let mut entries = tokio::fs::read_dir(&raw_dir).await.map_err(|e| {
            StepError::Preparation(format!("no raw data at {}: {e}", raw_dir.display()))
        })?;

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
                candidates.push(path);
            }
        }
        candidates.sort();
        candidates.into_iter().next().ok_or_else(|| {
            StepError::Preparation(format!("no CSV file in {}", raw_dir.display()))
        })
    }

    async fn stage(
        &self,
        game_id: &str,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StagedLocations, StepError> {
        let source = self.find_source(game_id, job_id).await?;
        debug!(source = %source.display(), "reading review export");
        let csv_data = tokio::fs::read(&source).await?;
        let records = build_records(&csv_data, &self.template)?;

        let prefix = self
            .job_dir(game_id, job_id)?
            .join(now.format("%Y/%m/%d/%H").to_string());
        let input_dir = prefix.join("input");
        let output_dir = prefix.join("output");
        tokio::fs::create_dir_all(&input_dir).await?;
        tokio::fs::create_dir_all(&output_dir).await?;

        let input_file = input_dir.join(format!(
            "{game_id}_{job_id}_{}.jsonl",
            now.format("%Y%m%d%H%M%S")
        ));
        let mut body = String::new();
        for record in &records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        tokio::fs::write(&input_file, body).await?;
        info!(records = records.len(), input = %input_file.display(), "reviews staged");

        Ok(StagedLocations {
            input: input_file.display().to_string(),
            output: format!("{}/", output_dir.display()),
        })
    }
}

#[async_trait]
impl InputPreparer for FsPreparer {
    async fn prepare(&self, game_id: &str, job_id: &str) -> Result<StagedLocations, StepError> {
        self.stage(game_id, job_id, Utc::now()).await
    }
}
