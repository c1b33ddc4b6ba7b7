//! Conversation state and request orchestration for text, image and video models.
mod attachment;
mod blob;
mod dispatcher;
mod error;
mod image;
mod message;
mod scheduler;
mod store;
mod text;
mod video;

#[cfg(test)]
mod testing;

pub use attachment::{Attachment, AttachmentSummary};
pub use blob::{BlobStore, FileBlobStore};
pub use dispatcher::{
    IMAGE_FALLBACK_CAPTION, IMAGE_PLACEHOLDER, RejectReason, RequestDispatcher, SendOutcome,
    VIDEO_DONE_TEXT, user_facing_text,
};
pub use error::{ChatError, ChatResult, FailureKind};
pub use image::{GeneratedImage, ImageRequestOrchestrator};
pub use message::{Message, MessageId, MessagePatch, Role};
pub use scheduler::{Scheduler, TokioScheduler};
pub use store::{
    ConversationStore, EpochGuard, MessageHandle, StoreError, StoreEvent, StoreResult,
};
pub use text::{TextOutcome, TextStreamOrchestrator};
pub use video::{
    DEFAULT_POLL_INTERVAL, VIDEO_STATUS_PHRASES, VideoArtifact, VideoFailure, VideoJobOrchestrator,
    VideoJobState, VideoProgress, VideoSettings,
};
