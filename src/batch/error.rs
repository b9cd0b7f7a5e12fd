//! Tipos de erro para o cliente do serviço de inferência em lote.
//!
//! Define [`BatchError`] com variantes para cota excedida, erros da API
//! e erros de rede, e a conversão para [`StepError`] conforme a etapa.

use thiserror::Error;

use crate::error::StepError;

/// Erros que podem ocorrer ao interagir com o serviço de inferência em lote.
#[derive(Debug, Error)]
pub enum BatchError {
    /// O serviço recusou o job por limite de cota ou capacidade (HTTP 429 ou
    /// código `ServiceQuotaExceededException`).
    #[error("service quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// Qualquer outro erro retornado pela API (4xx/5xx).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// URL base inválida na configuração.
    #[error("invalid service URL: {0}")]
    InvalidUrl(String),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl BatchError {
    /// Erro da etapa de submissão. Só a cota excedida continua retentável.
    pub fn into_dispatch_error(self) -> StepError {
        match self {
            BatchError::QuotaExceeded { message } => StepError::QuotaExceeded(message),
            other => StepError::Dispatch(other.to_string()),
        }
    }

    pub fn into_probe_error(self) -> StepError {
        StepError::Probe(self.to_string())
    }
}
