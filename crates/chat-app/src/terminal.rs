use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use polychat_chat::{ConversationStore, Message, MessageId, Role, StoreEvent};
use polychat_llm::{MODEL_CATEGORIES_ORDER, ModelDescriptor};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Turns store snapshots into incremental terminal output.
#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    current: Option<MessageId>,
    printed: String,
    finished: HashSet<MessageId>,
}

impl TranscriptRenderer {
    pub fn reset(&mut self) -> String {
        self.current = None;
        self.printed.clear();
        self.finished.clear();
        "\n-- new conversation --\n".to_string()
    }

    /// Output for the latest state of `message`; empty when nothing changed visibly.
    pub fn render(&mut self, message: &Message) -> String {
        let mut out = String::new();
        if message.role == Role::User || self.finished.contains(&message.id) {
            return out;
        }

        if self.current != Some(message.id) {
            self.current = Some(message.id);
            self.printed.clear();
            let name = message
                .model
                .as_ref()
                .map(|model| model.display_name.as_str())
                .unwrap_or("model");
            let _ = write!(out, "\n[{name}] ");
        }

        if message.is_error {
            let _ = writeln!(out, "\nerror: {}", message.text);
            self.finish(message.id);
            return out;
        }

        if let Some(delta) = message.text.strip_prefix(self.printed.as_str()) {
            out.push_str(delta);
        } else {
            // Status lines replace each other instead of growing.
            let _ = write!(out, "\n{}", message.text);
        }
        self.printed.clone_from(&message.text);

        if !message.is_streaming {
            out.push('\n');
            if message.image_url.is_some() {
                out.push_str("  image: received\n");
            }
            if let Some(video_url) = &message.video_url {
                let _ = writeln!(out, "  video: {video_url}");
            }
            for (index, source) in message.sources.iter().enumerate() {
                let title = if source.title.is_empty() {
                    source.uri.as_str()
                } else {
                    source.title.as_str()
                };
                let _ = writeln!(out, "  [{}] {title} <{}>", index + 1, source.uri);
            }
            self.finish(message.id);
        }
        out
    }

    fn finish(&mut self, id: MessageId) {
        self.finished.insert(id);
        self.current = None;
        self.printed.clear();
    }
}

/// Prints store changes to stdout until the store's event channel closes.
pub fn spawn_renderer(store: ConversationStore) -> JoinHandle<()> {
    let mut events = store.subscribe();
    tokio::spawn(async move {
        let mut renderer = TranscriptRenderer::default();
        loop {
            let output = match events.recv().await {
                Ok(StoreEvent::Appended(id) | StoreEvent::Updated(id)) => store
                    .get(id)
                    .map(|message| renderer.render(&message))
                    .unwrap_or_default(),
                Ok(StoreEvent::Reset { .. }) => renderer.reset(),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "renderer lagged behind store events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if output.is_empty() {
                continue;
            }
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(output.as_bytes());
            let _ = stdout.flush();
        }
    })
}

/// Catalog listing grouped by category; the selected model is starred.
pub fn format_catalog(catalog: &[ModelDescriptor], selected: &str) -> String {
    let mut out = String::new();
    for category in MODEL_CATEGORIES_ORDER {
        let models = catalog
            .iter()
            .filter(|model| model.category == category)
            .collect::<Vec<_>>();
        if models.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{category}");
        for model in models {
            let marker = if model.id == selected { '*' } else { ' ' };
            let attachments = if model.supports_attachment {
                " (attachments)"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                " {marker} {:<24} {}{attachments}",
                model.id, model.display_name
            );
        }
    }
    out
}

/// Mime type for the attachment kinds the backends accept: images and PDF.
pub fn guess_mime_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// Splits a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    let bytes = STANDARD.decode(payload).ok()?;
    Some((mime_type.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use polychat_chat::MessagePatch;
    use polychat_llm::{GroundingSource, default_catalog};

    use super::*;

    fn response(id: u64) -> Message {
        Message::response(MessageId::new(id))
    }

    #[test]
    fn streamed_text_prints_only_new_suffix() {
        let mut renderer = TranscriptRenderer::default();
        let mut message = response(2);
        message.apply(MessagePatch::new().streaming(true));

        assert_eq!(renderer.render(&message), "\n[model] ");
        message.apply(MessagePatch::new().text("Hel"));
        assert_eq!(renderer.render(&message), "Hel");
        message.apply(MessagePatch::new().text("Hello"));
        assert_eq!(renderer.render(&message), "lo");

        message.apply(
            MessagePatch::new()
                .streaming(false)
                .sources(vec![GroundingSource::new("https://a", "A")]),
        );
        assert_eq!(renderer.render(&message), "\n  [1] A <https://a>\n");
        assert_eq!(renderer.render(&message), "");
    }

    #[test]
    fn replaced_status_starts_a_new_line() {
        let mut renderer = TranscriptRenderer::default();
        let mut message = response(4);
        message.apply(MessagePatch::new().text("Initializing...").streaming(true));
        let _ = renderer.render(&message);

        message.apply(MessagePatch::new().text("Choreographing pixels..."));
        assert_eq!(renderer.render(&message), "\nChoreographing pixels...");
    }

    #[test]
    fn user_messages_are_not_echoed() {
        let mut renderer = TranscriptRenderer::default();
        let message = Message::user(MessageId::new(1), "hi", None);
        assert_eq!(renderer.render(&message), "");
    }

    #[test]
    fn error_is_printed_once() {
        let mut renderer = TranscriptRenderer::default();
        let mut message = response(6);
        message.apply(MessagePatch::failed("boom"));

        assert!(renderer.render(&message).ends_with("error: boom\n"));
        assert_eq!(renderer.render(&message), "");
    }

    #[test]
    fn attachment_mime_types_come_from_extension() {
        assert_eq!(guess_mime_type(Path::new("a/b/photo.JPG")), Some("image/jpeg"));
        assert_eq!(guess_mime_type(Path::new("report.pdf")), Some("application/pdf"));
        assert_eq!(guess_mime_type(Path::new("notes.txt")), None);
        assert_eq!(guess_mime_type(Path::new("no_extension")), None);
    }

    #[test]
    fn data_url_decodes_mime_and_bytes() {
        assert_eq!(
            decode_data_url("data:image/png;base64,AQID"),
            Some(("image/png".to_string(), vec![1_u8, 2, 3]))
        );
        assert_eq!(decode_data_url("https://example.com/a.png"), None);
    }

    #[test]
    fn catalog_marks_selection_and_groups_by_category() {
        let listing = format_catalog(&default_catalog(), "veo-3.1-fast");
        assert!(listing.starts_with("Text & Chat\n"));
        assert!(listing.contains(" * veo-3.1-fast"));
        assert!(listing.contains("Video Generation\n"));
    }
}
