//! Scripted collaborators shared by the unit tests.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use polychat_llm::{
    BackendError, BackendResult, BoxFuture, CredentialHooks, ImageBackend, ImageRequest,
    ImageResponse, ModelCategory, ModelDescriptor, TextBackend, TextChunk, TextChunkStream,
    TextRequest, VideoBackend, VideoJobHandle, VideoJobRequest, default_catalog,
};

use crate::blob::BlobStore;
use crate::error::ChatResult;
use crate::scheduler::Scheduler;

fn first_in(category: ModelCategory) -> ModelDescriptor {
    default_catalog()
        .into_iter()
        .find(|model| model.category == category)
        .unwrap_or_else(|| panic!("catalog has no {category} model"))
}

pub fn text_model() -> ModelDescriptor {
    first_in(ModelCategory::Text)
}

pub fn image_model() -> ModelDescriptor {
    first_in(ModelCategory::Image)
}

pub fn video_model() -> ModelDescriptor {
    first_in(ModelCategory::Video)
}

fn exhausted(stage: &'static str) -> BackendError {
    BackendError::Status {
        stage,
        status: 599,
        body: "script exhausted".to_string(),
    }
}

pub struct ScriptedTextBackend {
    stream: Mutex<Option<TextChunkStream>>,
    requests: Mutex<Vec<TextRequest>>,
}

impl ScriptedTextBackend {
    pub fn new(chunks: Vec<BackendResult<TextChunk>>) -> Self {
        Self::from_stream(futures::stream::iter(chunks).boxed())
    }

    pub fn from_stream(stream: TextChunkStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> Option<TextRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

impl TextBackend for ScriptedTextBackend {
    fn id(&self) -> &str {
        "scripted"
    }

    fn stream_text<'a>(
        &'a self,
        request: TextRequest,
    ) -> BoxFuture<'a, BackendResult<TextChunkStream>> {
        self.requests.lock().push(request);
        let stream = self.stream.lock().take();
        Box::pin(async move { stream.ok_or_else(|| exhausted("scripted-text")) })
    }
}

pub struct ScriptedImageBackend {
    response: Mutex<Option<BackendResult<ImageResponse>>>,
    requests: Mutex<Vec<ImageRequest>>,
}

impl ScriptedImageBackend {
    pub fn new(response: BackendResult<ImageResponse>) -> Self {
        Self {
            response: Mutex::new(Some(response)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> Option<ImageRequest> {
        self.requests.lock().last().cloned()
    }
}

impl ImageBackend for ScriptedImageBackend {
    fn generate_image<'a>(
        &'a self,
        request: ImageRequest,
    ) -> BoxFuture<'a, BackendResult<ImageResponse>> {
        self.requests.lock().push(request);
        let response = self.response.lock().take();
        Box::pin(async move { response.unwrap_or_else(|| Err(exhausted("scripted-image"))) })
    }
}

type PollHook = Box<dyn Fn(usize) + Send + Sync>;

/// Polls past the end of the script answer "not done".
pub struct ScriptedVideoBackend {
    submit: Mutex<Option<BackendResult<VideoJobHandle>>>,
    polls: Mutex<VecDeque<BackendResult<VideoJobHandle>>>,
    artifact: Mutex<Option<BackendResult<Vec<u8>>>>,
    submits: Mutex<Vec<VideoJobRequest>>,
    poll_calls: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    on_poll: Option<PollHook>,
}

impl ScriptedVideoBackend {
    pub fn new(submit: BackendResult<VideoJobHandle>) -> Self {
        Self {
            submit: Mutex::new(Some(submit)),
            polls: Mutex::new(VecDeque::new()),
            artifact: Mutex::new(None),
            submits: Mutex::new(Vec::new()),
            poll_calls: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
            on_poll: None,
        }
    }

    pub fn then_poll(self, result: BackendResult<VideoJobHandle>) -> Self {
        self.polls.lock().push_back(result);
        self
    }

    pub fn with_artifact(self, artifact: BackendResult<Vec<u8>>) -> Self {
        *self.artifact.lock() = Some(artifact);
        self
    }

    /// Runs with the 1-based poll number before each poll answers.
    pub fn on_poll(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_poll = Some(Box::new(hook));
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submits.lock().len()
    }

    pub fn last_submit(&self) -> Option<VideoJobRequest> {
        self.submits.lock().last().cloned()
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

impl VideoBackend for ScriptedVideoBackend {
    fn submit_video_job<'a>(
        &'a self,
        request: VideoJobRequest,
    ) -> BoxFuture<'a, BackendResult<VideoJobHandle>> {
        self.submits.lock().push(request);
        let result = self.submit.lock().take();
        Box::pin(async move { result.unwrap_or_else(|| Err(exhausted("scripted-submit"))) })
    }

    fn poll_video_job<'a>(
        &'a self,
        handle: &'a VideoJobHandle,
    ) -> BoxFuture<'a, BackendResult<VideoJobHandle>> {
        let count = self.poll_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.on_poll {
            hook(count);
        }
        let result = self
            .polls
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(VideoJobHandle::pending(handle.name.clone())));
        Box::pin(async move { result })
    }

    fn fetch_artifact<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, BackendResult<Vec<u8>>> {
        self.fetched.lock().push(uri.to_string());
        let artifact = self.artifact.lock().take();
        Box::pin(async move { artifact.unwrap_or_else(|| Err(exhausted("scripted-fetch"))) })
    }
}

pub struct CountingCredentials {
    present: bool,
    prompts: AtomicUsize,
}

impl CountingCredentials {
    pub fn new(present: bool) -> Self {
        Self {
            present,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl CredentialHooks for CountingCredentials {
    fn has_credential(&self) -> bool {
        self.present
    }

    fn prompt_for_credential(&self) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records requested delays and yields once instead of waiting.
#[derive(Default)]
pub struct ImmediateScheduler {
    sleeps: Mutex<Vec<Duration>>,
}

impl ImmediateScheduler {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Scheduler for ImmediateScheduler {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().push(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<Vec<(Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put<'a>(&'a self, bytes: Vec<u8>, mime_type: &'a str) -> BoxFuture<'a, ChatResult<String>> {
        let mut blobs = self.blobs.lock();
        blobs.push((bytes, mime_type.to_string()));
        let url = format!("blob:polychat/{}", blobs.len());
        Box::pin(async move { Ok(url) })
    }
}
