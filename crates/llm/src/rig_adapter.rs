use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};

use super::error::{
    AttachmentUnsupportedSnafu, BackendError, BackendResult, CompletionsFailedSnafu,
    MissingApiKeySnafu, RigHttpClientSnafu,
};
use super::provider::{
    BoxFuture, PromptPart, TextBackend, TextChunk, TextChunkStream, TextRequest,
};
use super::ProviderConfig;

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

/// Text-only streaming through rig's OpenAI client. Does not produce grounding sources.
pub struct RigTextBackend {
    config: ProviderConfig,
}

impl RigTextBackend {
    pub fn new(config: ProviderConfig) -> BackendResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &ProviderConfig) -> BackendResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(RigHttpClientSnafu {
            stage: "build-client",
        })
    }

    fn prompt_text(&self, request: &TextRequest) -> BackendResult<String> {
        let mut texts = Vec::with_capacity(request.parts.len());
        for part in &request.parts {
            match part {
                PromptPart::Text(text) => texts.push(text.as_str()),
                PromptPart::InlineData(_) => {
                    return AttachmentUnsupportedSnafu {
                        stage: "rig-prompt-parts",
                        provider_id: self.config.provider_id.clone(),
                    }
                    .fail();
                }
            }
        }
        Ok(texts.join("\n\n"))
    }

    fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<TextChunk>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) if !text.text.is_empty() => {
                Some(TextChunk::delta(text.text))
            }
            StreamedAssistantContent::Text(_)
            | StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }
}

impl TextBackend for RigTextBackend {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn stream_text<'a>(
        &'a self,
        request: TextRequest,
    ) -> BoxFuture<'a, BackendResult<TextChunkStream>> {
        Box::pin(async move {
            let prompt = self.prompt_text(&request)?;
            if request.search_grounding {
                tracing::debug!(
                    provider_id = %self.config.provider_id,
                    "search grounding is unavailable through rig; streaming without it"
                );
            }

            let client = Self::build_client(&self.config)?;
            let model = client.completion_model(request.backend_model.clone());
            let stream = model
                .completion_request(RigMessage::user(prompt))
                .stream()
                .await
                .context(CompletionsFailedSnafu {
                    stage: "open-stream",
                })?;

            let chunks = stream.filter_map(|item| async move {
                match item {
                    Ok(item) => Self::map_stream_item(item).map(Ok),
                    Err(source) => {
                        tracing::warn!(error = %source, "provider stream emitted an error chunk");
                        Some(Err(BackendError::CompletionsFailed {
                            stage: "stream-chunk",
                            source,
                        }))
                    }
                }
            });

            Ok(chunks.boxed())
        })
    }
}
