use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed for {subject}: {details}")]
    Validation { subject: String, details: String },

    #[error("Duplicate variant fingerprint '{0}' in catalog")]
    DuplicateFingerprint(String),

    #[error("Invalid percentage {value} for '{field}': must be between 0 and 100")]
    InvalidPercentage { field: String, value: f64 },

    #[error("Source '{name}' unavailable: {details}")]
    SourceUnavailable { name: String, details: String },

    #[error("Tracking lookup failed for '{0}'")]
    TrackingFailed(String),

    #[error("No data available: every configured source returned zero records")]
    NoData,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
