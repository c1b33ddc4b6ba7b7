use snafu::Snafu;

/// Coarse classification decided at the backend boundary.
///
/// Orchestration code branches on this instead of inspecting error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// No usable API key was configured, or the backend reported it as absent/unknown.
    CredentialMissing,
    /// The backend answered with an "entity not found" class error for the credential's project.
    CredentialInvalid,
    PermissionDenied,
    Other,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' does not accept attachments"))]
    AttachmentUnsupported {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("API key was rejected on `{stage}`: {message}"))]
    ApiKeyNotFound {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("requested entity was not found on `{stage}`: {message}"))]
    EntityNotFound {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("permission denied on `{stage}`: {message}"))]
    PermissionDenied {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("backend returned status {status} on `{stage}`: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("http request failed on `{stage}`, {source}"))]
    Http {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode backend payload on `{stage}`, {source}"))]
    DecodePayload {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to decode inline data on `{stage}`, {source}"))]
    DecodeInlineData {
        stage: &'static str,
        source: base64::DecodeError,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    RigHttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

impl BackendError {
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            Self::MissingApiKey { .. } | Self::ApiKeyNotFound { .. } => {
                BackendErrorKind::CredentialMissing
            }
            Self::EntityNotFound { .. } => BackendErrorKind::CredentialInvalid,
            Self::PermissionDenied { .. } => BackendErrorKind::PermissionDenied,
            Self::UnsupportedProvider { .. }
            | Self::AttachmentUnsupported { .. }
            | Self::Status { .. }
            | Self::Http { .. }
            | Self::DecodePayload { .. }
            | Self::DecodeInlineData { .. }
            | Self::RigHttpClient { .. }
            | Self::CompletionsFailed { .. } => BackendErrorKind::Other,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingApiKey { stage, .. }
            | Self::UnsupportedProvider { stage, .. }
            | Self::AttachmentUnsupported { stage, .. }
            | Self::ApiKeyNotFound { stage, .. }
            | Self::EntityNotFound { stage, .. }
            | Self::PermissionDenied { stage, .. }
            | Self::Status { stage, .. }
            | Self::Http { stage, .. }
            | Self::DecodePayload { stage, .. }
            | Self::DecodeInlineData { stage, .. }
            | Self::RigHttpClient { stage, .. }
            | Self::CompletionsFailed { stage, .. } => stage,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
