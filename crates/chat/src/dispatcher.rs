use std::sync::atomic::{AtomicBool, Ordering};

use polychat_llm::{ModelCategory, ModelDescriptor};

use super::attachment::Attachment;
use super::error::{ChatError, ChatResult, FailureKind};
use super::image::ImageRequestOrchestrator;
use super::message::{Message, MessageId, MessagePatch};
use super::store::{ConversationStore, MessageHandle};
use super::text::TextStreamOrchestrator;
use super::video::VideoJobOrchestrator;

pub const IMAGE_PLACEHOLDER: &str = "Generating image...";
pub const IMAGE_FALLBACK_CAPTION: &str = "Image generated.";
pub const VIDEO_DONE_TEXT: &str = "Video generated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    EmptyInput,
    AttachmentUnsupported,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed {
        response_id: MessageId,
    },
    Failed {
        response_id: MessageId,
        kind: FailureKind,
    },
    /// Nothing was written to the store.
    Rejected(RejectReason),
    /// The conversation was reset while the request ran; its results were dropped.
    Abandoned {
        response_id: MessageId,
    },
}

/// Clears the in-flight flag on every exit path, cancellation included.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Accepts one user submission at a time and routes it by model category.
pub struct RequestDispatcher {
    store: ConversationStore,
    text: TextStreamOrchestrator,
    image: ImageRequestOrchestrator,
    video: VideoJobOrchestrator,
    in_flight: AtomicBool,
}

impl RequestDispatcher {
    pub fn new(
        store: ConversationStore,
        text: TextStreamOrchestrator,
        image: ImageRequestOrchestrator,
        video: VideoJobOrchestrator,
    ) -> Self {
        Self {
            store,
            text,
            image,
            video,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn send(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        attachment: Option<Attachment>,
    ) -> SendOutcome {
        if prompt.trim().is_empty() && attachment.is_none() {
            return SendOutcome::Rejected(RejectReason::EmptyInput);
        }
        if attachment.is_some() && !model.supports_attachment {
            tracing::info!(model = %model.id, "model does not take attachments");
            return SendOutcome::Rejected(RejectReason::AttachmentUnsupported);
        }
        let Some(_in_flight) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("request already in flight");
            return SendOutcome::Rejected(RejectReason::Busy);
        };

        let mut guard = self.store.epoch_guard();
        let user_id = self.store.allocate_id();
        let response_id = self.store.allocate_id();
        let user = Message::user(user_id, prompt, attachment.as_ref().map(Attachment::summary));
        if let Err(error) = self.store.append_in_epoch(guard.epoch(), user) {
            tracing::error!(error = %error, "failed to record user message");
        }
        let response = self.store.handle_in_epoch(response_id, guard.epoch());

        tracing::info!(
            model = %model.id,
            category = ?model.category,
            attachment = attachment.is_some(),
            %response_id,
            "dispatching request"
        );

        let work = self.route(model, prompt, attachment.as_ref(), &response);
        let result = tokio::select! {
            biased;
            () = guard.invalidated() => {
                tracing::info!(%response_id, "conversation reset; abandoning request");
                return SendOutcome::Abandoned { response_id };
            }
            result = work => result,
        };

        match result {
            Ok(()) => SendOutcome::Completed { response_id },
            Err(error) => {
                let kind = error.failure_kind();
                tracing::warn!(
                    %response_id,
                    model = %model.id,
                    ?kind,
                    stage = error.stage(),
                    error = %error,
                    "request failed"
                );
                response.update(MessagePatch::failed(user_facing_text(&error, model)));
                SendOutcome::Failed { response_id, kind }
            }
        }
    }

    async fn route(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        attachment: Option<&Attachment>,
        response: &MessageHandle,
    ) -> ChatResult<()> {
        match model.category {
            ModelCategory::Image => self.run_image(model, prompt, attachment, response).await,
            ModelCategory::Video => self.run_video(model, prompt, attachment, response).await,
            ModelCategory::Text | ModelCategory::Code | ModelCategory::Document => {
                self.run_text(model, prompt, attachment, response).await
            }
        }
    }

    async fn run_text(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        attachment: Option<&Attachment>,
        response: &MessageHandle,
    ) -> ChatResult<()> {
        response.update(MessagePatch::new().model(model.clone()).streaming(true));
        let outcome = self
            .text
            .stream_text(model, prompt, attachment, |text| {
                response.update(MessagePatch::new().text(text));
            })
            .await?;

        response.update(
            MessagePatch::new()
                .text(outcome.text)
                .sources(outcome.sources)
                .streaming(false),
        );
        Ok(())
    }

    async fn run_image(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        attachment: Option<&Attachment>,
        response: &MessageHandle,
    ) -> ChatResult<()> {
        response.update(
            MessagePatch::new()
                .model(model.clone())
                .text(IMAGE_PLACEHOLDER)
                .streaming(true),
        );
        let image = self.image.generate_image(model, prompt, attachment).await?;

        response.update(
            MessagePatch::new()
                .image_url(image.image_url)
                .text(image.caption.unwrap_or_else(|| IMAGE_FALLBACK_CAPTION.to_string()))
                .streaming(false),
        );
        Ok(())
    }

    async fn run_video(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        attachment: Option<&Attachment>,
        response: &MessageHandle,
    ) -> ChatResult<()> {
        response.update(MessagePatch::new().model(model.clone()).streaming(true));
        let artifact = self
            .video
            .generate_video(model, prompt, attachment, |progress| {
                response.update(MessagePatch::new().text(progress.status.clone()));
            })
            .await?;

        response.update(
            MessagePatch::new()
                .video_url(artifact.url)
                .text(VIDEO_DONE_TEXT)
                .streaming(false),
        );
        Ok(())
    }
}

/// The one place error variants become user-facing text.
pub fn user_facing_text(error: &ChatError, model: &ModelDescriptor) -> String {
    let name = &model.display_name;
    match error.failure_kind() {
        FailureKind::CredentialMissing => {
            "API key not found. Please ensure it is configured correctly.".to_string()
        }
        FailureKind::CredentialInvalid => "Your API key seems invalid. Please select a key from \
             a project with billing enabled. For more info, visit \
             ai.google.dev/gemini-api/docs/billing"
            .to_string(),
        FailureKind::PermissionDenied => "Permission Denied. Your API key may be invalid or \
             missing permissions. Please ensure the \"Generative Language API\" is enabled in \
             your Google Cloud project and try again."
            .to_string(),
        FailureKind::NoImageProduced => {
            "No image was generated. The model may have refused the prompt.".to_string()
        }
        FailureKind::VideoResultMissing => {
            "Video generation finished but no URL was found.".to_string()
        }
        FailureKind::Transient => match error {
            ChatError::VideoSubmit { .. } => format!(
                "Video generation failed for model \"{name}\". Please try again or select a \
                 different model."
            ),
            ChatError::VideoPoll { .. }
            | ChatError::VideoOperation { .. }
            | ChatError::VideoDownload { .. }
            | ChatError::StoreArtifact { .. } => {
                "Video generation failed while checking status. Please try again.".to_string()
            }
            ChatError::TextStream { .. }
            | ChatError::ImageRequest { .. }
            | ChatError::NoImageProduced { .. }
            | ChatError::VideoResultMissing { .. } => {
                format!("An error occurred with model \"{name}\". Please try again.")
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use polychat_llm::{
        BackendError, GroundingSource, ImageResponse, InlineData, ResponsePart, TextChunk,
        VideoJobHandle,
    };

    use super::*;
    use crate::message::Role;
    use crate::testing::{
        CountingCredentials, ImmediateScheduler, MemoryBlobStore, ScriptedImageBackend,
        ScriptedTextBackend, ScriptedVideoBackend, image_model, text_model, video_model,
    };
    use crate::video::{VIDEO_STATUS_PHRASES, VideoSettings};

    struct Fixture {
        text: ScriptedTextBackend,
        image: ScriptedImageBackend,
        video: ScriptedVideoBackend,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Self {
                text: ScriptedTextBackend::new(Vec::new()),
                image: ScriptedImageBackend::new(Ok(ImageResponse::default())),
                video: ScriptedVideoBackend::new(Ok(VideoJobHandle::pending("op"))),
            }
        }
    }

    impl Fixture {
        fn build(self, store: ConversationStore) -> (RequestDispatcher, Arc<ScriptedTextBackend>) {
            let text = Arc::new(self.text);
            let video = VideoJobOrchestrator::new(
                Arc::new(self.video),
                Arc::new(CountingCredentials::new(true)),
                Arc::new(MemoryBlobStore::default()),
                Arc::new(ImmediateScheduler::default()),
                VideoSettings::default(),
            );
            let dispatcher = RequestDispatcher::new(
                store,
                TextStreamOrchestrator::new(text.clone(), true),
                ImageRequestOrchestrator::new(Arc::new(self.image), "1:1"),
                video,
            );
            (dispatcher, text)
        }
    }

    #[tokio::test]
    async fn text_request_streams_into_one_response() {
        let store = ConversationStore::new();
        let (dispatcher, _) = Fixture {
            text: ScriptedTextBackend::new(vec![
                Ok(TextChunk::delta("Hel")),
                Ok(TextChunk::delta("lo")
                    .with_sources(vec![GroundingSource::new("https://a", "A")])),
            ]),
            ..Fixture::default()
        }
        .build(store.clone());

        let outcome = dispatcher.send(&text_model(), "hi", None).await;

        let messages = store.snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages[1].role, Role::Model);
        assert_eq!(messages[1].text, "Hello");
        assert_eq!(messages[1].sources, vec![GroundingSource::new("https://a", "A")]);
        assert!(!messages[1].is_streaming);
        assert!(!messages[1].is_error);
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                response_id: messages[1].id
            }
        );
        assert!(!dispatcher.is_loading());
    }

    #[tokio::test]
    async fn empty_input_changes_nothing() {
        let store = ConversationStore::new();
        let (dispatcher, text) = Fixture::default().build(store.clone());

        let outcome = dispatcher.send(&text_model(), "   ", None).await;

        assert_eq!(outcome, SendOutcome::Rejected(RejectReason::EmptyInput));
        assert!(store.is_empty());
        assert_eq!(text.calls(), 0);
    }

    #[tokio::test]
    async fn attachment_on_model_without_attachment_support_is_rejected() {
        let store = ConversationStore::new();
        let (dispatcher, _) = Fixture::default().build(store.clone());
        let attachment = Attachment::new(vec![1_u8], "image/png", "a.png");

        let outcome = dispatcher
            .send(&image_model(), "edit this", Some(attachment))
            .await;

        assert_eq!(
            outcome,
            SendOutcome::Rejected(RejectReason::AttachmentUnsupported)
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn attachment_only_submission_is_accepted() {
        let store = ConversationStore::new();
        let (dispatcher, _) = Fixture {
            text: ScriptedTextBackend::new(vec![Ok(TextChunk::delta("A chart."))]),
            ..Fixture::default()
        }
        .build(store.clone());
        let attachment = Attachment::new(vec![1_u8, 2], "image/png", "chart.png");

        let outcome = dispatcher.send(&text_model(), "", Some(attachment)).await;

        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        let messages = store.snapshot();
        assert_eq!(
            messages[0].attachment.as_ref().map(|a| a.name.as_str()),
            Some("chart.png")
        );
    }

    #[tokio::test]
    async fn second_send_while_busy_is_rejected() {
        let store = ConversationStore::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let gated = futures::stream::once(async move {
            let _ = rx.await;
            Ok(TextChunk::delta("done"))
        })
        .boxed();
        let (dispatcher, _) = Fixture {
            text: ScriptedTextBackend::from_stream(gated),
            ..Fixture::default()
        }
        .build(store.clone());
        let model = text_model();

        let first = dispatcher.send(&model, "first", None);
        tokio::pin!(first);
        let second = async {
            while !dispatcher.is_loading() {
                tokio::task::yield_now().await;
            }
            let outcome = dispatcher.send(&model, "second", None).await;
            let _ = tx.send(());
            outcome
        };

        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, SendOutcome::Completed { .. }));
        assert_eq!(second, SendOutcome::Rejected(RejectReason::Busy));
        assert_eq!(store.len(), 2);
        assert!(!dispatcher.is_loading());
    }

    #[tokio::test]
    async fn mid_stream_failure_replaces_partial_text() {
        let store = ConversationStore::new();
        let (dispatcher, _) = Fixture {
            text: ScriptedTextBackend::new(vec![
                Ok(TextChunk::delta("partial")),
                Err(BackendError::PermissionDenied {
                    stage: "classify-failure",
                    message: "PERMISSION_DENIED".to_string(),
                }),
            ]),
            ..Fixture::default()
        }
        .build(store.clone());

        let outcome = dispatcher.send(&text_model(), "hi", None).await;

        assert!(matches!(
            outcome,
            SendOutcome::Failed {
                kind: FailureKind::PermissionDenied,
                ..
            }
        ));
        let response = store.snapshot().pop();
        assert!(response.as_ref().is_some_and(|m| m.is_error && !m.is_streaming));
        assert!(response.is_some_and(|m| m.text.starts_with("Permission Denied.")));
    }

    #[tokio::test]
    async fn reset_mid_stream_abandons_and_drops_late_chunks() {
        let store = ConversationStore::new();
        let resetter = store.clone();
        let chunks = futures::stream::iter(vec![
            Ok(TextChunk::delta("Hel")),
            Ok(TextChunk::delta("lo")),
        ])
        .enumerate()
        .then(move |(index, chunk)| {
            if index == 1 {
                resetter.reset();
            }
            async move {
                tokio::task::yield_now().await;
                chunk
            }
        })
        .boxed();
        let (dispatcher, _) = Fixture {
            text: ScriptedTextBackend::from_stream(chunks),
            ..Fixture::default()
        }
        .build(store.clone());

        let outcome = dispatcher.send(&text_model(), "hi", None).await;

        assert!(matches!(outcome, SendOutcome::Abandoned { .. }));
        assert!(store.is_empty());
        assert!(!dispatcher.is_loading());

        let next = dispatcher.send(&text_model(), "again", None).await;
        assert!(!matches!(next, SendOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn image_request_uses_fallback_caption() {
        let store = ConversationStore::new();
        let (dispatcher, _) = Fixture {
            image: ScriptedImageBackend::new(Ok(ImageResponse {
                parts: vec![ResponsePart::InlineData(InlineData::new(
                    "image/png",
                    vec![1_u8, 2, 3],
                ))],
            })),
            ..Fixture::default()
        }
        .build(store.clone());

        let outcome = dispatcher.send(&image_model(), "a cat", None).await;

        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        let response = store.snapshot().pop();
        assert_eq!(
            response.as_ref().and_then(|m| m.image_url.as_deref()),
            Some("data:image/png;base64,AQID")
        );
        assert_eq!(
            response.map(|m| m.text),
            Some(IMAGE_FALLBACK_CAPTION.to_string())
        );
    }

    #[tokio::test]
    async fn image_refusal_reports_no_image() {
        let store = ConversationStore::new();
        let (dispatcher, _) = Fixture {
            image: ScriptedImageBackend::new(Ok(ImageResponse {
                parts: vec![ResponsePart::Text("No.".to_string())],
            })),
            ..Fixture::default()
        }
        .build(store.clone());

        let outcome = dispatcher.send(&image_model(), "x", None).await;

        assert!(matches!(
            outcome,
            SendOutcome::Failed {
                kind: FailureKind::NoImageProduced,
                ..
            }
        ));
        let response = store.snapshot().pop();
        assert_eq!(
            response.map(|m| m.text),
            Some("No image was generated. The model may have refused the prompt.".to_string())
        );
    }

    #[tokio::test]
    async fn video_request_ends_with_playable_url() {
        let store = ConversationStore::new();
        let (dispatcher, _) = Fixture {
            video: ScriptedVideoBackend::new(Ok(VideoJobHandle::pending("op")))
                .then_poll(Ok(VideoJobHandle::finished("op", Some("u".to_string()))))
                .with_artifact(Ok(vec![1_u8])),
            ..Fixture::default()
        }
        .build(store.clone());

        let outcome = dispatcher.send(&video_model(), "a wave", None).await;

        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        let response = store.snapshot().pop();
        assert_eq!(
            response.as_ref().and_then(|m| m.video_url.as_deref()),
            Some("blob:polychat/1")
        );
        assert!(response.is_some_and(|m| m.text == VIDEO_DONE_TEXT && !m.is_streaming));
    }

    #[tokio::test]
    async fn reset_during_polling_stops_further_polls() {
        let store = ConversationStore::new();
        let resetter = store.clone();
        let video = ScriptedVideoBackend::new(Ok(VideoJobHandle::pending("op"))).on_poll(
            move |count| {
                if count == 1 {
                    resetter.reset();
                }
            },
        );
        let backend = Arc::new(video);
        let dispatcher = RequestDispatcher::new(
            store.clone(),
            TextStreamOrchestrator::new(Arc::new(ScriptedTextBackend::new(Vec::new())), false),
            ImageRequestOrchestrator::new(
                Arc::new(ScriptedImageBackend::new(Ok(ImageResponse::default()))),
                "1:1",
            ),
            VideoJobOrchestrator::new(
                backend.clone(),
                Arc::new(CountingCredentials::new(true)),
                Arc::new(MemoryBlobStore::default()),
                Arc::new(ImmediateScheduler::default()),
                VideoSettings::default(),
            ),
        );

        let outcome = dispatcher.send(&video_model(), "a wave", None).await;

        assert!(matches!(outcome, SendOutcome::Abandoned { .. }));
        assert_eq!(backend.poll_calls(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn video_status_is_shown_while_polling() {
        let store = ConversationStore::new();
        let observer = store.clone();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let record = seen.clone();
        let video = ScriptedVideoBackend::new(Ok(VideoJobHandle::pending("op")))
            .on_poll(move |_| {
                let text = observer.snapshot().pop().map(|m| m.text);
                record.lock().extend(text);
            })
            .then_poll(Ok(VideoJobHandle::finished("op", Some("u".to_string()))))
            .with_artifact(Ok(vec![1_u8]));
        let (dispatcher, _) = Fixture {
            video,
            ..Fixture::default()
        }
        .build(store.clone());

        let _ = dispatcher.send(&video_model(), "a wave", None).await;

        assert_eq!(seen.lock().clone(), vec![VIDEO_STATUS_PHRASES[0].to_string()]);
    }

    #[test]
    fn user_text_names_the_model_for_generic_failures() {
        let model = text_model();
        let error = ChatError::TextStream {
            stage: "open-text-stream",
            source: BackendError::Status {
                stage: "ensure-success",
                status: 503,
                body: String::new(),
            },
        };
        assert_eq!(
            user_facing_text(&error, &model),
            format!(
                "An error occurred with model \"{}\". Please try again.",
                model.display_name
            )
        );

        let submit = ChatError::VideoSubmit {
            stage: "submit-video-job",
            source: BackendError::Status {
                stage: "ensure-success",
                status: 500,
                body: String::new(),
            },
        };
        assert!(user_facing_text(&submit, &video_model()).starts_with("Video generation failed for model"));
    }

    #[test]
    fn rejected_video_download_reads_as_status_failure() {
        let error = ChatError::VideoDownload {
            stage: "fetch-video-artifact",
            source: BackendError::EntityNotFound {
                stage: "classify-failure",
                message: "Requested entity was not found.".to_string(),
            },
        };
        assert_eq!(
            user_facing_text(&error, &video_model()),
            "Video generation failed while checking status. Please try again."
        );
    }
}
