use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::BoxStream;

use super::error::BackendResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Finite, non-restartable sequence of text chunks. The end of the stream is the final marker.
pub type TextChunkStream = BoxStream<'static, BackendResult<TextChunk>>;

/// Binary payload sent to or received from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    pub mime_type: String,
    pub data: Arc<[u8]>,
}

impl InlineData {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    InlineData(InlineData),
}

/// One web citation attached to a grounded text response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

impl GroundingSource {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextChunk {
    pub delta: Option<String>,
    /// Grounding citations carried by this chunk; empty when the chunk has none.
    pub sources: Vec<GroundingSource>,
}

impl TextChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<GroundingSource>) -> Self {
        self.sources = sources;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRequest {
    pub backend_model: String,
    pub parts: Vec<PromptPart>,
    pub search_grounding: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub backend_model: String,
    pub parts: Vec<PromptPart>,
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    InlineData(InlineData),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageResponse {
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJobConfig {
    pub count: u32,
    pub resolution: String,
    pub aspect_ratio: String,
}

impl Default for VideoJobConfig {
    fn default() -> Self {
        Self {
            count: 1,
            resolution: "720p".to_string(),
            aspect_ratio: "16:9".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJobRequest {
    pub backend_model: String,
    pub prompt: String,
    pub image: Option<InlineData>,
    pub config: VideoJobConfig,
}

/// Observable projection of a backend long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJobHandle {
    /// Backend-assigned operation reference, opaque to callers.
    pub name: String,
    pub done: bool,
    pub result_uri: Option<String>,
    /// Failure reported by a finished operation.
    pub error: Option<String>,
}

impl VideoJobHandle {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            result_uri: None,
            error: None,
        }
    }

    pub fn finished(name: impl Into<String>, result_uri: Option<String>) -> Self {
        Self {
            name: name.into(),
            done: true,
            result_uri,
            error: None,
        }
    }
}

pub trait TextBackend: Send + Sync {
    fn id(&self) -> &str;
    fn stream_text<'a>(&'a self, request: TextRequest)
    -> BoxFuture<'a, BackendResult<TextChunkStream>>;
}

pub trait ImageBackend: Send + Sync {
    fn generate_image<'a>(
        &'a self,
        request: ImageRequest,
    ) -> BoxFuture<'a, BackendResult<ImageResponse>>;
}

pub trait VideoBackend: Send + Sync {
    fn submit_video_job<'a>(
        &'a self,
        request: VideoJobRequest,
    ) -> BoxFuture<'a, BackendResult<VideoJobHandle>>;

    fn poll_video_job<'a>(
        &'a self,
        handle: &'a VideoJobHandle,
    ) -> BoxFuture<'a, BackendResult<VideoJobHandle>>;

    /// Downloads a finished artifact. The adapter attaches the credential the URI requires.
    fn fetch_artifact<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, BackendResult<Vec<u8>>>;
}
