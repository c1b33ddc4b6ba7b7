use std::sync::Arc;

use futures::StreamExt;
use polychat_llm::{GroundingSource, ModelDescriptor, TextBackend, TextRequest};
use snafu::ResultExt;

use super::attachment::{Attachment, prompt_parts};
use super::error::{ChatResult, TextStreamSnafu};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextOutcome {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

/// Drives one streamed text answer, folding deltas into a cumulative string.
pub struct TextStreamOrchestrator {
    backend: Arc<dyn TextBackend>,
    search_grounding: bool,
}

impl TextStreamOrchestrator {
    pub fn new(backend: Arc<dyn TextBackend>, search_grounding: bool) -> Self {
        Self {
            backend,
            search_grounding,
        }
    }

    /// Calls `on_chunk` with the full text so far after every non-empty delta.
    ///
    /// Sources: the last chunk carrying a non-empty set wins. An error mid-stream discards
    /// what was accumulated; the caller decides what the message shows instead.
    pub async fn stream_text<F>(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        attachment: Option<&Attachment>,
        mut on_chunk: F,
    ) -> ChatResult<TextOutcome>
    where
        F: FnMut(&str),
    {
        let request = TextRequest {
            backend_model: model.backend_model.clone(),
            parts: prompt_parts(prompt, attachment),
            search_grounding: self.search_grounding,
        };
        tracing::debug!(
            backend = self.backend.id(),
            model = %model.backend_model,
            grounding = self.search_grounding,
            "opening text stream"
        );

        let mut stream = self
            .backend
            .stream_text(request)
            .await
            .context(TextStreamSnafu {
                stage: "open-text-stream",
            })?;

        let mut outcome = TextOutcome::default();
        let mut chunks = 0_usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context(TextStreamSnafu {
                stage: "read-text-chunk",
            })?;
            chunks += 1;

            if let Some(delta) = chunk.delta.filter(|delta| !delta.is_empty()) {
                outcome.text.push_str(&delta);
                on_chunk(&outcome.text);
            }
            if !chunk.sources.is_empty() {
                outcome.sources = chunk.sources;
            }
        }

        tracing::debug!(
            chunks,
            chars = outcome.text.len(),
            sources = outcome.sources.len(),
            "text stream finished"
        );
        Ok(outcome)
    }
}
