// Job Domain Model - lifecycle of one photo compliance request

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, JobError, Result};
use crate::domain::geometry::SelectionRect;
use crate::domain::spec::{CountryId, PhotoSpec};

/// Job ID (UUID v4)
pub type JobId = String;

/// Opaque reference to a stored blob (input upload or rendered output)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job Status
///
/// `Pending -> Processing -> {Completed, Failed}`; terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Processing => write!(f, "PROCESSING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(DomainError::ValidationError(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

/// How the job's crop is determined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JobMode {
    /// Detect the head and compute the crop automatically
    Auto,
    /// Render a caller-supplied selection over an already background-removed image
    Manual { selection: SelectionRect },
}

/// Rendered, stored output of a completed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub location: ArtifactRef,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub country_id: CountryId,
    /// Snapshot of the spec at submission time
    pub spec: PhotoSpec,
    pub mode: JobMode,
    pub input: ArtifactRef,

    pub status: JobStatus,
    pub created_at: i64, // epoch ms
    pub updated_at: i64,
    pub expires_at: i64,

    /// Present only when completed
    pub result: Option<OutputArtifact>,
    /// Present only when failed
    pub error: Option<JobError>,
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `retention_ms` - How long the job stays retrievable after creation
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        retention_ms: i64,
        spec: PhotoSpec,
        mode: JobMode,
        input: ArtifactRef,
    ) -> Self {
        Self {
            id: id.into(),
            country_id: spec.country_id.clone(),
            spec,
            mode,
            input,
            status: JobStatus::Pending,
            created_at,
            updated_at: created_at,
            expires_at: created_at + retention_ms,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }

    /// Worker claim: Pending -> Processing
    pub fn claim(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Pending, JobStatus::Processing, now_millis)
    }

    /// Processing -> Completed, storing the artifact
    pub fn complete(&mut self, artifact: OutputArtifact, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Processing, JobStatus::Completed, now_millis)?;
        self.result = Some(artifact);
        Ok(())
    }

    /// Processing -> Failed, storing the typed reason
    pub fn fail(&mut self, error: JobError, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Processing, JobStatus::Failed, now_millis)?;
        self.error = Some(error);
        Ok(())
    }

    fn transition(&mut self, from: JobStatus, to: JobStatus, now_millis: i64) -> Result<()> {
        if self.status != from {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = now_millis;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    fn sample_job() -> Job {
        Job::new(
            "job-1",
            1_000,
            24 * 3_600_000,
            PhotoSpec::new("FI", "Finland", 500, 653, 0.724),
            JobMode::Auto,
            ArtifactRef::new("inputs/job-1.jpg"),
        )
    }

    fn artifact() -> OutputArtifact {
        OutputArtifact {
            location: ArtifactRef::new("outputs/job-1.jpg"),
            byte_size: 42_000,
            width: 500,
            height: 653,
            quality: 95,
        }
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.country_id, "FI");
        assert_eq!(job.updated_at, 1_000);
        assert_eq!(job.expires_at, 1_000 + 24 * 3_600_000);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let mut job = sample_job();
        job.claim(2_000).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        job.complete(artifact(), 3_000).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.updated_at, 3_000);
        assert_eq!(job.result, Some(artifact()));
    }

    #[test]
    fn test_claim_is_not_repeatable() {
        let mut job = sample_job();
        job.claim(2_000).unwrap();
        assert!(job.claim(2_500).is_err());
        assert_eq!(job.updated_at, 2_000);
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let mut job = sample_job();
        job.claim(2_000).unwrap();
        job.fail(JobError::new(ErrorKind::NoHeadFound, "nothing"), 3_000)
            .unwrap();

        assert!(job.complete(artifact(), 4_000).is_err());
        assert!(job.fail(JobError::internal("again"), 4_000).is_err());
        assert!(job.claim(4_000).is_err());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::NoHeadFound);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_cannot_complete_pending_job() {
        let mut job = sample_job();
        assert!(job.complete(artifact(), 2_000).is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_expiry() {
        let job = sample_job();
        assert!(!job.is_expired(job.expires_at - 1));
        assert!(job.is_expired(job.expires_at));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("PROCESSING".parse::<JobStatus>().unwrap(), JobStatus::Processing);
        assert!("RUNNING".parse::<JobStatus>().is_err());
    }
}
