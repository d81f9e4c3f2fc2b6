use thiserror::Error;

use crate::inference::InferenceError;
use crate::ocr::OcrError;

#[derive(Debug, Error)]
pub enum FeiraError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("Inference API error: {0}")]
    Inference(#[from] InferenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
