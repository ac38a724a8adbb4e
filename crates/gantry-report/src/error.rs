use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Report rejected: {0}")]
    Rejected(String),
}

impl From<ReportError> for gantry_core::Error {
    fn from(err: ReportError) -> Self {
        gantry_core::Error::Reporting(err.to_string())
    }
}
