use std::sync::Arc;
use std::time::Duration;

use polychat_llm::{
    CredentialHooks, ModelDescriptor, VideoBackend, VideoJobConfig, VideoJobHandle,
    VideoJobRequest,
};

use super::attachment::Attachment;
use super::blob::BlobStore;
use super::error::{ChatError, ChatResult, FailureKind};
use super::scheduler::Scheduler;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub const INITIAL_STATUS: &str = "Initializing...";
pub const SUBMITTING_STATUS: &str = "Starting video generation...";
pub const DOWNLOADING_STATUS: &str = "Downloading video...";

/// Shown one after another while the job is polled; wraps around.
pub const VIDEO_STATUS_PHRASES: [&str; 5] = [
    "Warming up the virtual cameras...",
    "Choreographing pixels...",
    "Rendering digital starlight...",
    "Teaching polygons to dance...",
    "Assembling the final cut...",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoFailure {
    CredentialInvalid,
    Transient,
}

/// Lifecycle of one video job. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoJobState {
    Idle,
    Submitting,
    Polling,
    Downloading,
    Succeeded,
    Failed(VideoFailure),
}

impl VideoJobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Submitting)
            | (Self::Submitting, Self::Polling)
            | (Self::Polling, Self::Downloading)
            | (Self::Downloading, Self::Succeeded) => true,
            (Self::Submitting | Self::Polling | Self::Downloading, Self::Failed(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoProgress {
    pub state: VideoJobState,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    /// Locally playable URL returned by the blob store.
    pub url: String,
    pub result_uri: String,
    pub polls: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSettings {
    pub poll_interval: Duration,
    pub job: VideoJobConfig,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            job: VideoJobConfig::default(),
        }
    }
}

struct VideoJob {
    state: VideoJobState,
    rotation: usize,
    polls: u32,
}

impl VideoJob {
    fn new() -> Self {
        Self {
            state: VideoJobState::Idle,
            rotation: 0,
            polls: 0,
        }
    }

    fn transition(&mut self, next: VideoJobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal video job transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(from = ?self.state, to = ?next, "video job transition");
        self.state = next;
    }

    fn progress(&self, status: impl Into<String>) -> VideoProgress {
        VideoProgress {
            state: self.state,
            status: status.into(),
        }
    }

    fn rotation_status(&self) -> &'static str {
        VIDEO_STATUS_PHRASES[self.rotation % VIDEO_STATUS_PHRASES.len()]
    }

    fn advance_rotation(&mut self) {
        self.rotation = (self.rotation + 1) % VIDEO_STATUS_PHRASES.len();
    }
}

/// Submits a long-running video job, polls it to completion and stores the result.
pub struct VideoJobOrchestrator {
    backend: Arc<dyn VideoBackend>,
    credentials: Arc<dyn CredentialHooks>,
    blobs: Arc<dyn BlobStore>,
    scheduler: Arc<dyn Scheduler>,
    settings: VideoSettings,
}

impl VideoJobOrchestrator {
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        credentials: Arc<dyn CredentialHooks>,
        blobs: Arc<dyn BlobStore>,
        scheduler: Arc<dyn Scheduler>,
        settings: VideoSettings,
    ) -> Self {
        Self {
            backend,
            credentials,
            blobs,
            scheduler,
            settings,
        }
    }

    /// Runs the job to a terminal state.
    ///
    /// The first rotating status is reported as soon as submission succeeds; the first poll
    /// waits one interval. Dropping the returned future cancels the pending timer and poll.
    pub async fn generate_video<F>(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        attachment: Option<&Attachment>,
        mut on_progress: F,
    ) -> ChatResult<VideoArtifact>
    where
        F: FnMut(&VideoProgress),
    {
        let mut job = VideoJob::new();
        on_progress(&job.progress(INITIAL_STATUS));

        if !self.credentials.has_credential() {
            tracing::info!("no credential selected; asking host before submitting video job");
            self.credentials.prompt_for_credential();
        }

        job.transition(VideoJobState::Submitting);
        on_progress(&job.progress(SUBMITTING_STATUS));

        let request = VideoJobRequest {
            backend_model: model.backend_model.clone(),
            prompt: prompt.to_string(),
            image: attachment.map(Attachment::to_inline_data),
            config: self.settings.job.clone(),
        };
        let mut handle = match self.backend.submit_video_job(request).await {
            Ok(handle) => handle,
            Err(source) => {
                return Err(self.fail(
                    &mut job,
                    ChatError::VideoSubmit {
                        stage: "submit-video-job",
                        source,
                    },
                ));
            }
        };
        tracing::info!(operation = %handle.name, model = %model.backend_model, "video job submitted");

        job.transition(VideoJobState::Polling);
        on_progress(&job.progress(job.rotation_status()));

        while !handle.done {
            self.scheduler.sleep(self.settings.poll_interval).await;
            handle = match self.backend.poll_video_job(&handle).await {
                Ok(next) => next,
                Err(source) => {
                    return Err(self.fail(
                        &mut job,
                        ChatError::VideoPoll {
                            stage: "poll-video-job",
                            source,
                        },
                    ));
                }
            };
            job.polls += 1;
            tracing::debug!(operation = %handle.name, polls = job.polls, done = handle.done, "polled video job");

            if !handle.done {
                job.advance_rotation();
                on_progress(&job.progress(job.rotation_status()));
            }
        }

        let result_uri = match finished_result(handle) {
            Ok(uri) => uri,
            Err(error) => return Err(self.fail(&mut job, error)),
        };

        job.transition(VideoJobState::Downloading);
        on_progress(&job.progress(DOWNLOADING_STATUS));

        let bytes = match self.backend.fetch_artifact(&result_uri).await {
            Ok(bytes) => bytes,
            Err(source) => {
                return Err(self.fail(
                    &mut job,
                    ChatError::VideoDownload {
                        stage: "fetch-video-artifact",
                        source,
                    },
                ));
            }
        };
        let url = match self.blobs.put(bytes, "video/mp4").await {
            Ok(url) => url,
            Err(error) => return Err(self.fail(&mut job, error)),
        };

        job.transition(VideoJobState::Succeeded);
        tracing::info!(polls = job.polls, %url, "video job succeeded");
        Ok(VideoArtifact {
            url,
            result_uri,
            polls: job.polls,
        })
    }

    fn fail(&self, job: &mut VideoJob, error: ChatError) -> ChatError {
        let failure = if error.failure_kind() == FailureKind::CredentialInvalid {
            self.credentials.prompt_for_credential();
            VideoFailure::CredentialInvalid
        } else {
            VideoFailure::Transient
        };
        job.transition(VideoJobState::Failed(failure));
        tracing::warn!(stage = error.stage(), polls = job.polls, error = %error, "video job failed");
        error
    }
}

fn finished_result(mut handle: VideoJobHandle) -> ChatResult<String> {
    if let Some(message) = handle.error.take() {
        return Err(ChatError::VideoOperation {
            stage: "finished-video-job",
            message,
        });
    }
    handle
        .result_uri
        .filter(|uri| !uri.is_empty())
        .ok_or(ChatError::VideoResultMissing {
            stage: "finished-video-job",
        })
}
