use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use polychat_chat::{
    Attachment, BlobStore, FileBlobStore, RejectReason, RequestDispatcher, SendOutcome,
};
use polychat_llm::{ModelDescriptor, SharedApiKey};

use super::settings::SettingsStore;
use super::terminal::{decode_data_url, format_catalog, guess_mime_type};

pub const HELP: &str = "\
Commands:
  /new             start a new conversation
  /models          list available models
  /model <id>      switch model
  /attach <path>   attach an image or PDF to the next prompt
  /detach          drop the pending attachment
  /key <value>     set the API key
  /quit            exit
Anything else is sent as a prompt; an empty line sends the attachment alone.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    Models,
    Model(String),
    Attach(PathBuf),
    Detach,
    Key(String),
    Help,
    Quit,
    Unknown(String),
}

/// A blank line parses as an empty `Send`.
pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };

    let (name, argument) = command
        .split_once(char::is_whitespace)
        .map(|(name, argument)| (name, argument.trim()))
        .unwrap_or((command, ""));
    match (name, argument) {
        ("new", _) => Command::New,
        ("models", _) => Command::Models,
        ("model", id) if !id.is_empty() => Command::Model(id.to_string()),
        ("attach", path) if !path.is_empty() => Command::Attach(PathBuf::from(path)),
        ("detach", _) => Command::Detach,
        ("key", value) if !value.is_empty() => Command::Key(value.to_string()),
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Attachment waiting for the next prompt. Shared with in-flight sends so a rejected
/// request can hand it back.
#[derive(Debug, Clone, Default)]
pub struct PendingAttachment(Arc<Mutex<Option<Attachment>>>);

impl PendingAttachment {
    pub fn set(&self, attachment: Attachment) {
        *self.0.lock() = Some(attachment);
    }

    pub fn take(&self) -> Option<Attachment> {
        self.0.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_none()
    }

    /// Puts `attachment` back unless another one was attached meanwhile.
    pub fn restore(&self, attachment: Attachment) -> bool {
        let mut slot = self.0.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(attachment);
        true
    }
}

/// REPL state: selected model, pending attachment and handles to shared services.
pub struct Session {
    dispatcher: Arc<RequestDispatcher>,
    catalog: Vec<ModelDescriptor>,
    model: ModelDescriptor,
    attachment: PendingAttachment,
    settings: Arc<SettingsStore>,
    api_key: SharedApiKey,
    blobs: FileBlobStore,
}

impl Session {
    pub fn new(
        dispatcher: Arc<RequestDispatcher>,
        catalog: Vec<ModelDescriptor>,
        model: ModelDescriptor,
        settings: Arc<SettingsStore>,
        api_key: SharedApiKey,
        blobs: FileBlobStore,
    ) -> Self {
        Self {
            dispatcher,
            catalog,
            model,
            attachment: PendingAttachment::default(),
            settings,
            api_key,
            blobs,
        }
    }

    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    pub async fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Send(prompt) => self.send(prompt),
            Command::New => {
                self.attachment.take();
                self.dispatcher.store().reset();
            }
            Command::Models => print!("{}", format_catalog(&self.catalog, &self.model.id)),
            Command::Model(id) => self.select_model(&id),
            Command::Attach(path) => self.attach(path).await,
            Command::Detach => {
                if self.attachment.take().is_some() {
                    println!("attachment removed");
                }
            }
            Command::Key(value) => self.replace_key(value),
            Command::Help => println!("{HELP}"),
            Command::Quit => return Flow::Quit,
            Command::Unknown(line) => println!("unknown command `{line}`, try /help"),
        }
        Flow::Continue
    }

    fn send(&mut self, prompt: String) {
        if prompt.is_empty() && self.attachment.is_empty() {
            return;
        }
        if self.dispatcher.is_loading() {
            println!("still working on the previous request");
            return;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let model = self.model.clone();
        let pending = self.attachment.clone();
        let blobs = self.blobs.clone();
        tokio::spawn(async move {
            let outcome = dispatch(&dispatcher, &model, &prompt, &pending).await;
            report_outcome(&dispatcher, &blobs, outcome).await;
        });
    }

    fn select_model(&mut self, id: &str) {
        let Some(model) = self.catalog.iter().find(|model| model.id == id) else {
            println!("unknown model `{id}`, see /models");
            return;
        };
        self.model = model.clone();
        if !self.model.supports_attachment && self.attachment.take().is_some() {
            println!("{} does not take attachments; attachment removed", self.model.display_name);
        }
        println!("using {} ({})", self.model.display_name, self.model.category);

        let mut settings = (*self.settings.settings()).clone();
        settings.default_model = self.model.id.clone();
        if let Err(error) = self.settings.update(settings) {
            tracing::warn!(error = %error, "failed to persist selected model");
        }
    }

    async fn attach(&mut self, path: PathBuf) {
        if !self.model.supports_attachment {
            println!("{} does not take attachments", self.model.display_name);
            return;
        }
        let Some(mime_type) = guess_mime_type(&path) else {
            println!("only images and PDF files can be attached");
            return;
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                println!("cannot read {}: {error}", path.display());
                return;
            }
        };
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let attachment = Attachment::new(bytes, mime_type, name);
        println!(
            "attached {} ({}, {} bytes)",
            attachment.name(),
            attachment.mime_type(),
            attachment.size()
        );
        self.attachment.set(attachment);
    }

    fn replace_key(&mut self, value: String) {
        self.api_key.replace(value.as_str());
        let mut settings = (*self.settings.settings()).clone();
        settings.api_key = value;
        match self.settings.update(settings) {
            Ok(()) => println!("API key updated"),
            Err(error) => {
                tracing::warn!(error = %error, "failed to persist API key");
                println!("API key updated for this session only");
            }
        }
    }
}

/// Sends with the pending attachment; a rejected request gives the attachment back.
async fn dispatch(
    dispatcher: &RequestDispatcher,
    model: &ModelDescriptor,
    prompt: &str,
    pending: &PendingAttachment,
) -> SendOutcome {
    let attachment = pending.take();
    let outcome = dispatcher.send(model, prompt, attachment.clone()).await;
    if let (SendOutcome::Rejected(_), Some(attachment)) = (&outcome, attachment) {
        pending.restore(attachment);
    }
    outcome
}

async fn report_outcome(
    dispatcher: &RequestDispatcher,
    blobs: &FileBlobStore,
    outcome: SendOutcome,
) {
    match outcome {
        SendOutcome::Completed { response_id } => {
            let image_url = dispatcher
                .store()
                .get(response_id)
                .and_then(|message| message.image_url);
            let Some((mime_type, bytes)) = image_url.as_deref().and_then(decode_data_url) else {
                return;
            };
            match blobs.put(bytes, &mime_type).await {
                Ok(url) => println!("  saved image: {url}"),
                Err(error) => tracing::warn!(error = %error, "failed to save generated image"),
            }
        }
        SendOutcome::Failed { kind, .. } => {
            if let Some(hint) = kind.troubleshooting_hint() {
                println!("  hint: {hint}");
            }
        }
        SendOutcome::Rejected(reason) => println!("{}", reject_message(reason)),
        SendOutcome::Abandoned { response_id } => {
            tracing::debug!(%response_id, "request abandoned after reset");
        }
    }
}

fn reject_message(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::EmptyInput => "nothing to send",
        RejectReason::AttachmentUnsupported => "this model does not take attachments",
        RejectReason::Busy => "still working on the previous request",
    }
}
