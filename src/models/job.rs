use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a generation job in the async pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    ProcessingBackgroundRemoval,
    #[serde(rename = "processing_3d_generation")]
    #[strum(serialize = "processing_3d_generation")]
    Processing3dGeneration,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the lifecycle. Both terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::ProcessingBackgroundRemoval => 1,
            JobStatus::Processing3dGeneration => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job currently in `self` may move to `next`.
    ///
    /// Stages only advance one step at a time; `failed` is reachable from
    /// any non-terminal state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::ProcessingBackgroundRemoval) => true,
            (JobStatus::ProcessingBackgroundRemoval, JobStatus::Processing3dGeneration) => true,
            (JobStatus::Processing3dGeneration, JobStatus::Completed) => true,
            (from, JobStatus::Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Every status from which `self` can be entered.
    pub fn predecessors(self) -> Vec<JobStatus> {
        ALL_STATUSES
            .iter()
            .copied()
            .filter(|from| from.can_transition_to(self))
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::ProcessingBackgroundRemoval => "processing_background_removal",
            JobStatus::Processing3dGeneration => "processing_3d_generation",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

const ALL_STATUSES: [JobStatus; 5] = [
    JobStatus::Queued,
    JobStatus::ProcessingBackgroundRemoval,
    JobStatus::Processing3dGeneration,
    JobStatus::Completed,
    JobStatus::Failed,
];

/// A mutation the worker applies to a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// Enter an intermediate processing stage.
    Stage(JobStatus),
    Complete { output_key: String },
    Fail { error: String },
}

impl JobUpdate {
    pub fn target(&self) -> JobStatus {
        match self {
            JobUpdate::Stage(status) => *status,
            JobUpdate::Complete { .. } => JobStatus::Completed,
            JobUpdate::Fail { .. } => JobStatus::Failed,
        }
    }

    /// Statuses a record may be in for this update to apply.
    ///
    /// A terminal status is only entered through `Complete` or `Fail`, which
    /// carry the output or error that goes with it.
    pub fn allowed_from(&self) -> Vec<JobStatus> {
        match self {
            JobUpdate::Stage(status) if status.is_terminal() => Vec::new(),
            _ => self.target().predecessors(),
        }
    }
}

/// A 3D generation job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub prompt: String,
    /// Input store keys of the source images, in submission order.
    pub input_keys: Vec<String>,
    /// File name of the artifact, as requested or `{id}.glb`.
    pub output_name: String,
    /// Set once the artifact has been written (status `completed`).
    pub output_key: Option<String>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    /// Without an explicit `output_name` the artifact is named `{id}.glb`.
    pub fn new(prompt: String, input_keys: Vec<String>, output_name: Option<String>) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Self {
            id,
            status: JobStatus::Queued,
            prompt,
            input_keys,
            output_name: output_name.unwrap_or_else(|| format!("{id}.glb")),
            output_key: None,
            error: None,
            submitted_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Output store key of this job's artifact. Scoped by id so jobs sharing
    /// an output name never overwrite each other.
    pub fn artifact_key(&self) -> String {
        format!("{}/{}", self.id, self.output_name)
    }

    /// Apply `update` in place, rejecting anything but a forward transition.
    ///
    /// The record is left untouched when the transition is not allowed.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let next = update.target();
        if !update.allowed_from().contains(&self.status) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        match update {
            JobUpdate::Stage(status) => self.status = status,
            JobUpdate::Complete { output_key } => {
                self.status = JobStatus::Completed;
                self.output_key = Some(output_key);
                self.completed_at = Some(now);
            }
            JobUpdate::Fail { error } => {
                self.status = JobStatus::Failed;
                self.error = Some(error);
                self.completed_at = Some(now);
            }
        }
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("cannot move job from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}
