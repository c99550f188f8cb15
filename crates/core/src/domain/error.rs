// Domain Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

/// Typed failure of a compliance pipeline stage.
///
/// Every variant is terminal for the job that hit it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("unknown country: {0}")]
    UnknownCountry(String),

    #[error("failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("background removal failed: {0}")]
    BackgroundRemovalFailed(String),

    #[error("no head found: {0}")]
    NoHeadFound(String),

    #[error("multiple heads detected: {0}")]
    MultipleHeadsAmbiguous(String),

    #[error("insufficient margin around head: {0}")]
    InsufficientMargin(String),

    #[error("selection out of bounds: {0}")]
    SelectionOutOfBounds(String),

    #[error("size limit unreachable: {0}")]
    SizeLimitUnreachable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::UnknownCountry(_) => ErrorKind::UnknownCountry,
            PipelineError::DecodeFailed(_) => ErrorKind::DecodeFailed,
            PipelineError::BackgroundRemovalFailed(_) => ErrorKind::BackgroundRemovalFailed,
            PipelineError::NoHeadFound(_) => ErrorKind::NoHeadFound,
            PipelineError::MultipleHeadsAmbiguous(_) => ErrorKind::MultipleHeadsAmbiguous,
            PipelineError::InsufficientMargin(_) => ErrorKind::InsufficientMargin,
            PipelineError::SelectionOutOfBounds(_) => ErrorKind::SelectionOutOfBounds,
            PipelineError::SizeLimitUnreachable(_) => ErrorKind::SizeLimitUnreachable,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Human-readable detail without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            PipelineError::UnknownCountry(d)
            | PipelineError::DecodeFailed(d)
            | PipelineError::BackgroundRemovalFailed(d)
            | PipelineError::NoHeadFound(d)
            | PipelineError::MultipleHeadsAmbiguous(d)
            | PipelineError::InsufficientMargin(d)
            | PipelineError::SelectionOutOfBounds(d)
            | PipelineError::SizeLimitUnreachable(d)
            | PipelineError::Internal(d) => d,
        }
    }
}

/// Serializable failure tag stored on failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnknownCountry,
    DecodeFailed,
    BackgroundRemovalFailed,
    NoHeadFound,
    MultipleHeadsAmbiguous,
    InsufficientMargin,
    SelectionOutOfBounds,
    SizeLimitUnreachable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownCountry => "UNKNOWN_COUNTRY",
            ErrorKind::DecodeFailed => "DECODE_FAILED",
            ErrorKind::BackgroundRemovalFailed => "BACKGROUND_REMOVAL_FAILED",
            ErrorKind::NoHeadFound => "NO_HEAD_FOUND",
            ErrorKind::MultipleHeadsAmbiguous => "MULTIPLE_HEADS_AMBIGUOUS",
            ErrorKind::InsufficientMargin => "INSUFFICIENT_MARGIN",
            ErrorKind::SelectionOutOfBounds => "SELECTION_OUT_OF_BOUNDS",
            ErrorKind::SizeLimitUnreachable => "SIZE_LIMIT_UNREACHABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "UNKNOWN_COUNTRY" => ErrorKind::UnknownCountry,
            "DECODE_FAILED" => ErrorKind::DecodeFailed,
            "BACKGROUND_REMOVAL_FAILED" => ErrorKind::BackgroundRemovalFailed,
            "NO_HEAD_FOUND" => ErrorKind::NoHeadFound,
            "MULTIPLE_HEADS_AMBIGUOUS" => ErrorKind::MultipleHeadsAmbiguous,
            "INSUFFICIENT_MARGIN" => ErrorKind::InsufficientMargin,
            "SELECTION_OUT_OF_BOUNDS" => ErrorKind::SelectionOutOfBounds,
            "SIZE_LIMIT_UNREACHABLE" => ErrorKind::SizeLimitUnreachable,
            "INTERNAL" => ErrorKind::Internal,
            other => {
                return Err(DomainError::ValidationError(format!(
                    "unknown error kind: {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

/// Failure reason attached verbatim to a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, detail)
    }
}

impl From<&PipelineError> for JobError {
    fn from(err: &PipelineError) -> Self {
        Self::new(err.kind(), err.detail())
    }
}

impl From<PipelineError> for JobError {
    fn from(err: PipelineError) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrips_through_str() {
        for kind in [
            ErrorKind::UnknownCountry,
            ErrorKind::NoHeadFound,
            ErrorKind::SizeLimitUnreachable,
            ErrorKind::Internal,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("NOPE".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_job_error_keeps_detail_verbatim() {
        let err = PipelineError::InsufficientMargin("head too close to top edge".to_string());
        let job_err = JobError::from(&err);
        assert_eq!(job_err.kind, ErrorKind::InsufficientMargin);
        assert_eq!(job_err.detail, "head too close to top edge");
    }
}
