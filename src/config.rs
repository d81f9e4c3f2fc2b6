//! Configuração do feira carregada a partir de `feira.toml`.
//!
//! A struct [`FeiraConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ANTHROPIC_API_KEY` tem precedência sobre o arquivo.

use std::path::Path;

use serde::Deserialize;

use crate::error::FeiraError;

/// Configuração de nível superior carregada de `feira.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeiraConfig {
    /// Chave da API do serviço de inferência.
    #[serde(default)]
    pub api_key: String,

    /// Modelo usado nas chamadas de extração.
    #[serde(default = "default_model")]
    pub model: String,

    /// URL base do serviço de detecção de texto (OCR).
    #[serde(default = "default_ocr_base_url")]
    pub ocr_base_url: String,

    /// Máximo de retentativas do estágio de OCR antes de falhar o run.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Janela de suspensão, em segundos, aguardando o sinal de conclusão.
    #[serde(default = "default_suspension_timeout_secs")]
    pub suspension_timeout_secs: u64,

    /// Entregas permitidas antes de um job ir para a fila de mortos.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    /// Dias de retenção dos registros na fila de mortos.
    #[serde(default = "default_dead_letter_retention_days")]
    pub dead_letter_retention_days: i64,

    /// Número de workers de extração.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

// Modelo padrão para extração.
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

// Serviço de OCR local por padrão.
fn default_ocr_base_url() -> String {
    "http://localhost:8020".to_string()
}

// Valor padrão para retentativas máximas: 3.
fn default_max_retries() -> u32 {
    3
}

// Valor padrão para o atraso base: 1000ms.
fn default_base_delay_ms() -> u64 {
    1000
}

// Cinco minutos de suspensão por padrão.
fn default_suspension_timeout_secs() -> u64 {
    300
}

// Três entregas antes da fila de mortos.
fn default_max_receive_count() -> u32 {
    3
}

// Duas semanas de retenção para inspeção.
fn default_dead_letter_retention_days() -> i64 {
    14
}

fn default_worker_count() -> usize {
    2
}

impl Default for FeiraConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            ocr_base_url: default_ocr_base_url(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            suspension_timeout_secs: default_suspension_timeout_secs(),
            max_receive_count: default_max_receive_count(),
            dead_letter_retention_days: default_dead_letter_retention_days(),
            worker_count: default_worker_count(),
        }
    }
}

impl FeiraConfig {
    /// Carrega a configuração de `feira.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self, FeiraError> {
        Self::load_from(Path::new("feira.toml"))
    }

    /// Carrega a configuração do caminho fornecido, com defaults e
    /// precedência da variável de ambiente para a chave da API.
    pub fn load_from(path: &Path) -> Result<Self, FeiraError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<FeiraConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a chave API.
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = FeiraConfig::default();
        assert!(config.api_key.is_empty());
        assert_eq!(config.model, "claude-sonnet-4-5-20250929");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.suspension_timeout_secs, 300);
        assert_eq!(config.max_receive_count, 3);
        assert_eq!(config.dead_letter_retention_days, 14);
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_key = "sk-test-123"
            max_receive_count = 5
        "#;
        let config: FeiraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_key, "sk-test-123");
        assert_eq!(config.max_receive_count, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.suspension_timeout_secs, 300);
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feira.toml");
        std::fs::write(
            &path,
            "ocr_base_url = \"http://ocr.internal:9000\"\nsuspension_timeout_secs = 60\n",
        )
        .unwrap();

        let config = FeiraConfig::load_from(&path).unwrap();
        assert_eq!(config.ocr_base_url, "http://ocr.internal:9000");
        assert_eq!(config.suspension_timeout_secs, 60);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn load_from_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FeiraConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feira.toml");
        std::fs::write(&path, "max_retries = \"three\"\n").unwrap();
        assert!(FeiraConfig::load_from(&path).is_err());
    }
}
