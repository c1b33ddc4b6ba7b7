use std::fmt;

use serde::{Deserialize, Serialize};

/// Vendor a catalog entry is presented under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelProvider {
    Google,
    OpenAI,
    Anthropic,
    Other,
}

/// Capability group used for routing a request to an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelCategory {
    Text,
    Image,
    Code,
    Document,
    Video,
}

impl ModelCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "Text & Chat",
            Self::Image => "Image Generation",
            Self::Code => "Code Generation",
            Self::Document => "Document & PDF",
            Self::Video => "Video Generation",
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Display order for catalog listings.
pub const MODEL_CATEGORIES_ORDER: [ModelCategory; 5] = [
    ModelCategory::Text,
    ModelCategory::Image,
    ModelCategory::Code,
    ModelCategory::Document,
    ModelCategory::Video,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub provider: ModelProvider,
    pub category: ModelCategory,
    /// Identifier sent to the backend, which may differ from the catalog id.
    pub backend_model: String,
    pub supports_attachment: bool,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        provider: ModelProvider,
        category: ModelCategory,
        backend_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            provider,
            category,
            backend_model: backend_model.into(),
            supports_attachment: false,
        }
    }

    pub fn with_attachments(mut self) -> Self {
        self.supports_attachment = true;
        self
    }
}

pub const DEFAULT_MODEL_ID: &str = "gemini-2.5-flash";

pub fn default_catalog() -> Vec<ModelDescriptor> {
    use ModelCategory::{Code, Document, Image, Text, Video};
    use ModelProvider::{Anthropic, Google, OpenAI, Other};

    vec![
        ModelDescriptor::new(
            "gemini-2.5-flash",
            "Gemini 2.5 Flash",
            Google,
            Text,
            "gemini-2.5-flash",
        )
        .with_attachments(),
        ModelDescriptor::new(
            "gemini-3-pro",
            "Gemini 3 Pro",
            Google,
            Text,
            "gemini-3-pro-preview",
        )
        .with_attachments(),
        ModelDescriptor::new(
            "gpt-5",
            "ChatGPT 5 (Mock)",
            OpenAI,
            Text,
            "gemini-3-pro-preview",
        )
        .with_attachments(),
        ModelDescriptor::new(
            "claude-3",
            "Claude 3 (Mock)",
            Anthropic,
            Text,
            "gemini-3-pro-preview",
        )
        .with_attachments(),
        ModelDescriptor::new(
            "gemini-2.5-flash-image",
            "Gemini 2.5 Flash Image",
            Google,
            Image,
            "gemini-2.5-flash-image",
        ),
        ModelDescriptor::new(
            "gemini-code",
            "Gemini Code Assistant",
            Google,
            Code,
            "gemini-3-pro-preview",
        ),
        ModelDescriptor::new(
            "notebook-llm",
            "NotebookLM (Mock)",
            Google,
            Document,
            "gemini-3-pro-preview",
        )
        .with_attachments(),
        ModelDescriptor::new(
            "pdf-maker",
            "PDF Content Creator",
            Other,
            Document,
            "gemini-3-pro-preview",
        ),
        ModelDescriptor::new(
            "veo-3.1-fast",
            "Veo 3.1 Fast",
            Google,
            Video,
            "veo-3.1-fast-generate-preview",
        )
        .with_attachments(),
    ]
}

/// Looks up a catalog entry by id, falling back to the first entry like the model picker does.
pub fn find_model<'a>(catalog: &'a [ModelDescriptor], id: &str) -> Option<&'a ModelDescriptor> {
    catalog
        .iter()
        .find(|model| model.id == id)
        .or_else(|| catalog.first())
}
