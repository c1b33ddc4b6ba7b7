use std::sync::Arc;

use polychat_llm::{InlineData, PromptPart};

/// One uploaded file, already read into memory by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    bytes: Arc<[u8]>,
    mime_type: String,
    name: String,
    size: u64,
}

/// Metadata kept on the user message after the payload itself has been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSummary {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

impl Attachment {
    pub fn new(
        bytes: impl Into<Arc<[u8]>>,
        mime_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            size: bytes.len() as u64,
            bytes,
            mime_type: mime_type.into(),
            name: name.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn summary(&self) -> AttachmentSummary {
        AttachmentSummary {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
        }
    }

    pub fn to_inline_data(&self) -> InlineData {
        InlineData::new(self.mime_type.clone(), Arc::clone(&self.bytes))
    }
}

/// Builds request parts: the attachment first, then the prompt text.
pub(crate) fn prompt_parts(prompt: &str, attachment: Option<&Attachment>) -> Vec<PromptPart> {
    let mut parts = Vec::with_capacity(2);
    if let Some(attachment) = attachment {
        parts.push(PromptPart::InlineData(attachment.to_inline_data()));
    }
    // An attachment-only request carries no text part.
    if !prompt.is_empty() || parts.is_empty() {
        parts.push(PromptPart::Text(prompt.to_string()));
    }
    parts
}
