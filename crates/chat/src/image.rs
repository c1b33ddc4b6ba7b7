use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use polychat_llm::{ImageBackend, ImageRequest, ModelDescriptor, ResponsePart};
use snafu::ResultExt;

use super::attachment::{Attachment, prompt_parts};
use super::error::{ChatResult, ImageRequestSnafu, NoImageProducedSnafu};

/// Generated image bytes are always presented as PNG.
const IMAGE_DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// `data:image/png` URL with the image embedded.
    pub image_url: String,
    pub caption: Option<String>,
}

pub struct ImageRequestOrchestrator {
    backend: Arc<dyn ImageBackend>,
    aspect_ratio: String,
}

impl ImageRequestOrchestrator {
    pub fn new(backend: Arc<dyn ImageBackend>, aspect_ratio: impl Into<String>) -> Self {
        Self {
            backend,
            aspect_ratio: aspect_ratio.into(),
        }
    }

    pub async fn generate_image(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> ChatResult<GeneratedImage> {
        let request = ImageRequest {
            backend_model: model.backend_model.clone(),
            parts: prompt_parts(prompt, attachment),
            aspect_ratio: self.aspect_ratio.clone(),
        };
        let response = self
            .backend
            .generate_image(request)
            .await
            .context(ImageRequestSnafu {
                stage: "generate-image",
            })?;

        let mut image = None;
        let mut caption = None;
        let mut extra_images = 0_usize;
        for part in response.parts {
            match part {
                ResponsePart::InlineData(data) if image.is_none() => image = Some(data),
                ResponsePart::InlineData(_) => extra_images += 1,
                ResponsePart::Text(text) if !text.trim().is_empty() => caption = Some(text),
                ResponsePart::Text(_) => {}
            }
        }
        if extra_images > 0 {
            tracing::warn!(extra_images, "image response had several images; keeping the first");
        }

        let image = image.ok_or_else(|| {
            NoImageProducedSnafu {
                stage: "select-image-part",
            }
            .build()
        })?;
        if image.mime_type != "image/png" {
            tracing::debug!(mime_type = %image.mime_type, "presenting image part as png");
        }
        let image_url = format!("{IMAGE_DATA_URL_PREFIX}{}", STANDARD.encode(&image.data));

        Ok(GeneratedImage { image_url, caption })
    }
}
