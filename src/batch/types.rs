//! Tipos de dados para requisições e respostas do serviço de inferência em lote.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` e usam os nomes de
//! campo em camelCase esperados pela API de jobs de invocação de modelo.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Corpo da requisição que cria um job de invocação de modelo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub job_name: String,
    pub model_id: String,
    /// Papel que o serviço assume para ler a entrada e gravar a saída.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    pub input_data_config: InputDataConfig,
    pub output_data_config: OutputDataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDataConfig {
    pub uri: String,
    /// Formato dos registros de entrada; sempre `JSONL`.
    pub input_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDataConfig {
    pub uri: String,
}

/// Resposta da criação de job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_arn: String,
}

/// Descrição de um job retornada pela consulta de status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescription {
    #[serde(default)]
    pub job_arn: Option<String>,
    /// Status bruto; ausente ou `null` é tratado como "em andamento".
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub submit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_time: Option<DateTime<Utc>>,
}

/// Corpo de erro retornado pela API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default, rename = "__type", alias = "code")]
    pub code: Option<String>,
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
}

impl JobDescription {
    /// Status para roteamento; ausente vira string vazia.
    pub fn status_or_empty(&self) -> &str {
        self.status.as_deref().unwrap_or_default()
    }
}

impl ApiErrorBody {
    pub fn is_quota_exceeded(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| code.contains("ServiceQuotaExceeded"))
    }
}
