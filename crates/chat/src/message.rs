use std::fmt;

use polychat_llm::{GroundingSource, ModelDescriptor};

use super::attachment::AttachmentSummary;

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    /// Full text so far; only ever replaced with a longer cumulative string while streaming.
    pub text: String,
    pub attachment: Option<AttachmentSummary>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub model: Option<ModelDescriptor>,
    pub sources: Vec<GroundingSource>,
    pub is_streaming: bool,
    pub is_error: bool,
}

impl Message {
    /// Creates a user message as submitted.
    pub fn user(
        id: MessageId,
        text: impl Into<String>,
        attachment: Option<AttachmentSummary>,
    ) -> Self {
        Self {
            attachment,
            text: text.into(),
            ..Self::blank(id, Role::User)
        }
    }

    /// Creates an empty model response, the base an upsert builds on when the id is new.
    pub fn response(id: MessageId) -> Self {
        Self::blank(id, Role::Model)
    }

    fn blank(id: MessageId, role: Role) -> Self {
        Self {
            id,
            role,
            text: String::new(),
            attachment: None,
            image_url: None,
            video_url: None,
            model: None,
            sources: Vec::new(),
            is_streaming: false,
            is_error: false,
        }
    }

    /// Merges every field present in the patch; absent fields are left untouched.
    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(text) = patch.text {
            self.text = text;
        }
        if let Some(image_url) = patch.image_url {
            self.image_url = Some(image_url);
        }
        if let Some(video_url) = patch.video_url {
            self.video_url = Some(video_url);
        }
        if let Some(model) = patch.model {
            self.model = Some(model);
        }
        if let Some(sources) = patch.sources {
            self.sources = sources;
        }
        if let Some(is_streaming) = patch.is_streaming {
            self.is_streaming = is_streaming;
        }
        if let Some(is_error) = patch.is_error {
            self.is_error = is_error;
        }
    }
}

/// Partial update for one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePatch {
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub model: Option<ModelDescriptor>,
    pub sources: Option<Vec<GroundingSource>>,
    pub is_streaming: Option<bool>,
    pub is_error: Option<bool>,
}

impl MessagePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal error state: replaces the text and clears streaming.
    pub fn failed(text: impl Into<String>) -> Self {
        Self::new().text(text).streaming(false).error(true)
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn video_url(mut self, video_url: impl Into<String>) -> Self {
        self.video_url = Some(video_url.into());
        self
    }

    pub fn model(mut self, model: ModelDescriptor) -> Self {
        self.model = Some(model);
        self
    }

    pub fn sources(mut self, sources: Vec<GroundingSource>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = Some(is_streaming);
        self
    }

    pub fn error(mut self, is_error: bool) -> Self {
        self.is_error = Some(is_error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_only_touches_present_fields() {
        let mut message = Message::response(MessageId::new(7));
        message.apply(MessagePatch::new().text("partial").streaming(true));
        message.apply(MessagePatch::new().sources(vec![GroundingSource::new("u", "t")]));

        assert_eq!(message.text, "partial");
        assert!(message.is_streaming);
        assert_eq!(message.sources.len(), 1);
        assert_eq!(message.role, Role::Model);
    }

    #[test]
    fn failed_patch_finalizes_message() {
        let mut message = Message::response(MessageId::new(1));
        message.apply(MessagePatch::new().streaming(true));
        message.apply(MessagePatch::failed("boom"));

        assert_eq!(message.text, "boom");
        assert!(!message.is_streaming);
        assert!(message.is_error);
    }
}
