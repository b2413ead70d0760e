pub mod key;
pub mod models;

pub use key::{canonical_key, IdKey};
pub use models::{FeatureVector, GroupKey, OfferFeature, RankedRow, RecordRow, ScoredRow};

#[derive(Debug, thiserror::Error)]
pub enum PromoError {
    #[error("Schema error in {table} table: {reason}")]
    SchemaError { table: String, reason: String },
    #[error(
        "Join key mismatch: {matched} of {total} records matched an offer \
         (required match rate {min_rate})"
    )]
    JoinKeyMismatch {
        matched: usize,
        total: usize,
        min_rate: f64,
    },
    #[error("Invalid training data: {0}")]
    InvalidTrainingData(String),
    #[error("Dimension mismatch: model expects {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

impl PromoError {
    pub fn schema(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaError {
            table: table.into(),
            reason: reason.into(),
        }
    }
}

pub type PromoResult<T> = Result<T, PromoError>;
