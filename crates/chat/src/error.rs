use std::path::PathBuf;

use polychat_llm::{BackendError, BackendErrorKind};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("text stream failed on `{stage}`, {source}"))]
    TextStream {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("image request failed on `{stage}`, {source}"))]
    ImageRequest {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("image response carried no image on `{stage}`"))]
    NoImageProduced { stage: &'static str },
    #[snafu(display("video job submission failed on `{stage}`, {source}"))]
    VideoSubmit {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("video job poll failed on `{stage}`, {source}"))]
    VideoPoll {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("video operation reported an error on `{stage}`: {message}"))]
    VideoOperation {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("finished video job has no result uri on `{stage}`"))]
    VideoResultMissing { stage: &'static str },
    #[snafu(display("video download failed on `{stage}`, {source}"))]
    VideoDownload {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("failed to store artifact at {} on `{stage}`, {source}", path.display()))]
    StoreArtifact {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;

/// User-facing failure classes. Decided from error variants, never from message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    CredentialMissing,
    CredentialInvalid,
    PermissionDenied,
    NoImageProduced,
    VideoResultMissing,
    Transient,
}

impl FailureKind {
    /// Follow-up guidance shown next to the error, when there is any.
    pub fn troubleshooting_hint(self) -> Option<&'static str> {
        match self {
            Self::PermissionDenied => Some(
                "Open the Google Cloud console for the key's project, enable the \
                 \"Generative Language API\", then retry.",
            ),
            Self::CredentialMissing => {
                Some("Set GEMINI_API_KEY or run `/key <value>` to configure a key.")
            }
            Self::CredentialInvalid => {
                Some("Run `/key <value>` with a key from a project that has billing enabled.")
            }
            Self::NoImageProduced | Self::VideoResultMissing | Self::Transient => None,
        }
    }
}

impl From<BackendErrorKind> for FailureKind {
    fn from(kind: BackendErrorKind) -> Self {
        match kind {
            BackendErrorKind::CredentialMissing => Self::CredentialMissing,
            BackendErrorKind::CredentialInvalid => Self::CredentialInvalid,
            BackendErrorKind::PermissionDenied => Self::PermissionDenied,
            BackendErrorKind::Other => Self::Transient,
        }
    }
}

impl ChatError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::TextStream { source, .. }
            | Self::ImageRequest { source, .. }
            | Self::VideoSubmit { source, .. }
            | Self::VideoPoll { source, .. } => source.kind().into(),
            Self::NoImageProduced { .. } => FailureKind::NoImageProduced,
            Self::VideoResultMissing { .. } => FailureKind::VideoResultMissing,
            // Download failures are transient whatever the backend reported.
            Self::VideoDownload { .. }
            | Self::VideoOperation { .. }
            | Self::StoreArtifact { .. } => FailureKind::Transient,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::TextStream { stage, .. }
            | Self::ImageRequest { stage, .. }
            | Self::NoImageProduced { stage }
            | Self::VideoSubmit { stage, .. }
            | Self::VideoPoll { stage, .. }
            | Self::VideoOperation { stage, .. }
            | Self::VideoResultMissing { stage }
            | Self::VideoDownload { stage, .. }
            | Self::StoreArtifact { stage, .. } => stage,
        }
    }
}
