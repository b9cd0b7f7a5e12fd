//! Filesystem result persister.
//!
//! Reads the `*.jsonl.out` file the batch service wrote to the job's output
//! location, extracts the classification each model response carries between
//! `<result>` tags, and upserts one review record per line into
//! `<results_dir>/<game>/<job>.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StepError;
use crate::ports::ResultPersister;
use crate::workflow::{JobContext, check_path_id};

const OUTPUT_SUFFIX: &str = ".jsonl.out";

static RESULT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<result>(.*?)</result>").expect("valid regex"));
static GAME_REVIEW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Game Review:\s*(.*)").expect("valid regex"));

/// A classified review as stored for the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub pk: String,
    pub sk: String,
    pub record_id: String,
    pub overall_sentiment: Value,
    pub classifications: Value,
    pub model_input: Value,
    pub original_review: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputLine {
    record_id: String,
    #[serde(default)]
    model_input: Value,
    #[serde(default)]
    model_output: Value,
}

#[derive(Debug, Deserialize)]
struct Classification {
    overall_sentiment: Value,
    #[serde(default)]
    classifications: Value,
}

/// Turn one line of batch output into a review record.
///
/// Returns `Ok(None)` when the model response has no `<result>` block; the
/// line is skipped rather than failing the whole job.
pub fn parse_output_line(
    line: &str,
    game_id: &str,
    job_id: &str,
) -> Result<Option<ReviewRecord>, StepError> {
    let parsed: OutputLine = serde_json::from_str(line)?;
    let text = response_text(&parsed.model_output).unwrap_or_default();

    let Some(captures) = RESULT_BLOCK.captures(text) else {
        warn!(record_id = %parsed.record_id, "no <result> block in model output");
        return Ok(None);
    };
    let classification: Classification = serde_json::from_str(&captures[1]).map_err(|e| {
        StepError::Persist(format!(
            "record {}: invalid result JSON: {e}",
            parsed.record_id
        ))
    })?;

    let original_review = prompt_text(&parsed.model_input)
        .and_then(|prompt| GAME_REVIEW.captures(prompt))
        .map(|c| c[1].trim().to_string());

    Ok(Some(ReviewRecord {
        pk: format!("GAME#{game_id}"),
        sk: format!("REVIEW#{job_id}#{}", parsed.record_id),
        record_id: parsed.record_id,
        overall_sentiment: classification.overall_sentiment,
        classifications: classification.classifications,
        model_input: parsed.model_input,
        original_review,
    }))
}

// Messages API responses put text in content[0].text; text completions in
// `completion`.
fn response_text(output: &Value) -> Option<&str> {
    output
        .pointer("/content/0/text")
        .or_else(|| output.get("completion"))
        .and_then(Value::as_str)
}

fn prompt_text(input: &Value) -> Option<&str> {
    input
        .pointer("/messages/0/content/0/text")
        .or_else(|| input.get("prompt"))
        .and_then(Value::as_str)
}

/// Stores review records as one JSON document per job.
pub struct FsResultStore {
    results_dir: PathBuf,
}

impl FsResultStore {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn job_file(&self, game_id: &str, job_id: &str) -> Result<PathBuf, StepError> {
        let game_id = check_path_id(game_id).map_err(StepError::Persist)?;
        let job_id = check_path_id(job_id).map_err(StepError::Persist)?;
        Ok(self.results_dir.join(game_id).join(format!("{job_id}.json")))
    }

    /// All stored records of a job, keyed by sort key.
    pub async fn load(
        &self,
        game_id: &str,
        job_id: &str,
    ) -> Result<BTreeMap<String, ReviewRecord>, StepError> {
        let path = self.job_file(game_id, job_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(
        &self,
        game_id: &str,
        job_id: &str,
        records: &BTreeMap<String, ReviewRecord>,
    ) -> Result<PathBuf, StepError> {
        let path = self.job_file(game_id, job_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }
}

/// Find the batch output file. The service nests output under a directory
/// named after the job id, so look there first.
async fn find_output_file(output_dir: &Path, job_short_id: &str) -> Result<PathBuf, StepError> {
    for dir in [output_dir.join(job_short_id), output_dir.to_path_buf()] {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(OUTPUT_SUFFIX))
            {
                found.push(path);
            }
        }
        found.sort();
        if let Some(path) = found.pop() {
            return Ok(path);
        }
    }
    Err(StepError::Persist(format!(
        "no {OUTPUT_SUFFIX} file under {}",
        output_dir.display()
    )))
}

#[async_trait]
impl ResultPersister for FsResultStore {
    async fn persist(&self, context: &JobContext) -> Result<usize, StepError> {
        let output = context
            .output_location()
            .ok_or_else(|| StepError::Persist("job has no output location".into()))?;
        let handle = context
            .job_handle()
            .ok_or_else(|| StepError::Persist("job has no handle".into()))?;
        let (game_id, job_id) = (context.game_id(), context.job_id());

        let output_file = find_output_file(Path::new(output), handle.short_id()).await?;
        debug!(file = %output_file.display(), "reading batch output");
        let data = tokio::fs::read_to_string(&output_file).await?;

        let mut stored = self.load(game_id, job_id).await?;
        let mut written = 0;
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            if let Some(record) = parse_output_line(line, game_id, job_id)? {
                stored.insert(record.sk.clone(), record);
                written += 1;
            }
        }
        let file = self.save(game_id, job_id, &stored).await?;
        info!(records = written, file = %file.display(), "review records stored");
        Ok(written)
    }
}
