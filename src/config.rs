//! Configuração do reviewflow carregada a partir de `reviewflow.toml`.
//!
//! A struct [`ReviewflowConfig`] contém todos os parâmetros configuráveis,
//! agrupados por seção. Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `REVIEWFLOW_API_KEY` e `REVIEWFLOW_BATCH_URL` têm
//! precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::staging::PayloadTemplate;
use crate::workflow::RetryPolicy;

pub const CONFIG_FILE: &str = "reviewflow.toml";

/// Configuração de nível superior carregada de `reviewflow.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReviewflowConfig {
    pub batch: BatchSettings,
    pub retry: RetrySettings,
    pub poll: PollSettings,
    pub staging: StagingSettings,
    pub store: StoreSettings,
    pub notify: NotifySettings,
}

/// Serviço de inferência em lote.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// URL base da API de jobs.
    pub base_url: String,
    /// Chave da API; vazia desativa o cabeçalho de autenticação.
    pub api_key: String,
    /// Modelo usado na invocação em lote.
    pub model_id: String,
    /// Papel assumido pelo serviço para ler a entrada e gravar a saída.
    pub role_arn: Option<String>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            model_id: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            role_arn: None,
        }
    }
}

/// Retentativas da submissão quando a cota do serviço é excedida.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total de tentativas, incluindo a primeira.
    pub max_attempts: u32,
    /// Espera, em segundos, após a primeira falha.
    pub initial_wait_secs: u64,
    /// Multiplicador aplicado à espera a cada nova falha.
    pub backoff_rate: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_wait_secs: 6 * 60,
            backoff_rate: 2.0,
        }
    }
}

/// Consulta periódica de status.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Intervalo entre consultas, em segundos.
    pub interval_secs: u64,
    /// Limite opcional do tempo total de consulta. Ausente = sem limite.
    pub max_wait_secs: Option<u64>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_wait_secs: None,
        }
    }
}

/// Preparação da entrada.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagingSettings {
    pub data_dir: PathBuf,
    /// Prompt prefixado a cada review.
    pub prompt: String,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            prompt: default_prompt(),
            temperature: 0.5,
            top_k: 250,
            top_p: 1.0,
            max_tokens: 1024,
        }
    }
}

// Prompt padrão: classifica a review e devolve JSON entre tags <result>.
fn default_prompt() -> String {
    "Classify the sentiment of the game review below. Reply with a JSON object \
     inside <result></result> tags with the keys \"overall_sentiment\" \
     (positive, negative, neutral or mixed) and \"classifications\" (a list of \
     {\"category\", \"sentiment\"} objects for the aspects mentioned).\n\nGame Review: "
        .to_string()
}

/// Armazenamento dos resultados.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub results_dir: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
        }
    }
}

/// Webhooks de notificação. Sem ambos, as notificações vão só para o log.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
}

impl ReviewflowConfig {
    /// Carrega a configuração de `reviewflow.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<ReviewflowConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        // Variáveis de ambiente têm precedência sobre o arquivo.
        if let Ok(key) = std::env::var("REVIEWFLOW_API_KEY")
            && !key.is_empty()
        {
            config.batch.api_key = key;
        }
        if let Ok(url) = std::env::var("REVIEWFLOW_BATCH_URL")
            && !url.is_empty()
        {
            config.batch.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejeita valores que tornariam o workflow inútil ou infinito de forma acidental.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if !self.retry.backoff_rate.is_finite() || self.retry.backoff_rate < 1.0 {
            bail!("retry.backoff_rate must be a finite number >= 1.0");
        }
        if self.poll.interval_secs == 0 {
            bail!("poll.interval_secs must be greater than 0");
        }
        if self.poll.max_wait_secs == Some(0) {
            bail!("poll.max_wait_secs must be greater than 0 when set");
        }
        if self.notify.success_url.is_some() != self.notify.failure_url.is_some() {
            bail!("notify.success_url and notify.failure_url must be set together");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_wait: Duration::from_secs(self.retry.initial_wait_secs),
            backoff_rate: self.retry.backoff_rate,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.poll.max_wait_secs.map(Duration::from_secs)
    }

    pub fn payload_template(&self) -> PayloadTemplate {
        PayloadTemplate {
            model_id: self.batch.model_id.clone(),
            prompt: self.staging.prompt.clone(),
            temperature: self.staging.temperature,
            top_k: self.staging.top_k,
            top_p: self.staging.top_p,
            max_tokens: self.staging.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = ReviewflowConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_wait_secs, 360);
        assert_eq!(config.retry.backoff_rate, 2.0);
        assert_eq!(config.poll.interval_secs, 30);
        assert!(config.poll.max_wait_secs.is_none());
        assert!(config.batch.api_key.is_empty());
        assert!(config.staging.prompt.ends_with("Game Review: "));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            [batch]
            base_url = "https://batch.example.com"
            model_id = "anthropic.claude-v2:1"

            [poll]
            interval_secs = 10
            max_wait_secs = 7200
        "#;
        let config: ReviewflowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.batch.base_url, "https://batch.example.com");
        assert_eq!(config.batch.model_id, "anthropic.claude-v2:1");
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.max_wait(), Some(Duration::from_secs(7200)));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.store.results_dir, PathBuf::from("results"));
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = ReviewflowConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ReviewflowConfig::default();
        config.retry.backoff_rate = 0.5;
        assert!(config.validate().is_err());

        let mut config = ReviewflowConfig::default();
        config.retry.backoff_rate = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = ReviewflowConfig::default();
        config.retry.backoff_rate = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = ReviewflowConfig::default();
        config.poll.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ReviewflowConfig::default();
        config.notify.success_url = Some("http://hooks/success".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
            [retry]
            max_attempts = 5

            [store]
            results_dir = "out"
            "#,
        )
        .unwrap();
        let config = ReviewflowConfig::load_from(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.store.results_dir, PathBuf::from("out"));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ReviewflowConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[retry]\nmax_attempts = \"three\"").unwrap();
        assert!(ReviewflowConfig::load_from(&path).is_err());
    }
}
