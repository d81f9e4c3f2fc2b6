use thiserror::Error;

/// Errors from the text-detection service. All of them are transient from
/// the pipeline's point of view and feed the OCR stage's retry budget.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The service answered with a non-success status.
    #[error("OCR service error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Underlying network failure (DNS, refused connection, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = OcrError::Api {
            status: 503,
            message: "throttled".into(),
        };
        assert_eq!(err.to_string(), "OCR service error (status 503): throttled");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OcrError>();
    }
}
