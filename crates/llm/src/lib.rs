//! Backend collaborators for generative text, image and video models.
use std::sync::Arc;

mod credential;
mod error;
mod gemini;
mod model;
mod provider;
mod rig_adapter;

pub use credential::{CredentialHooks, SharedApiKey};
pub use error::{BackendError, BackendErrorKind, BackendResult};
pub use gemini::{DEFAULT_GEMINI_ENDPOINT, GEMINI_PROVIDER_ID, GeminiClient};
pub use model::{
    DEFAULT_MODEL_ID, MODEL_CATEGORIES_ORDER, ModelCategory, ModelDescriptor, ModelProvider,
    default_catalog, find_model,
};
pub use provider::{
    BoxFuture, GroundingSource, ImageBackend, ImageRequest, ImageResponse, InlineData,
    PromptPart, ResponsePart, TextBackend, TextChunk, TextChunkStream, TextRequest,
    VideoBackend, VideoJobConfig, VideoJobHandle, VideoJobRequest,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigTextBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
        }
    }
}

/// Picks the text streaming backend for a provider id; Gemini also serves image and video.
pub fn create_text_backend(
    mut config: ProviderConfig,
    gemini: Arc<GeminiClient>,
) -> BackendResult<Arc<dyn TextBackend>> {
    if config.provider_id.is_empty() {
        config.provider_id = GEMINI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "gemini" | "google" => Ok(gemini),
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigTextBackend::new(config)?))
        }
        _ => Err(BackendError::UnsupportedProvider {
            stage: "create-text-backend",
            provider_id: config.provider_id,
        }),
    }
}
