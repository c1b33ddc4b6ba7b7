use polychat_llm::{CredentialHooks, SharedApiKey};
use tokio::sync::mpsc;

/// Asks the user for a key through the REPL instead of a dialog.
pub struct TerminalCredentials {
    api_key: SharedApiKey,
    prompts: mpsc::UnboundedSender<CredentialPrompt>,
}

/// Raised when an orchestrator wants the user to (re)select a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPrompt {
    pub key_present: bool,
}

impl CredentialPrompt {
    pub fn message(self) -> &'static str {
        if self.key_present {
            "The current API key was rejected. Enter `/key <value>` with a key from a project \
             with billing enabled."
        } else {
            "No API key is configured. Enter `/key <value>` to set one."
        }
    }
}

impl TerminalCredentials {
    pub fn new(
        api_key: SharedApiKey,
    ) -> (Self, mpsc::UnboundedReceiver<CredentialPrompt>) {
        let (prompts, receiver) = mpsc::unbounded_channel();
        (Self { api_key, prompts }, receiver)
    }
}

impl CredentialHooks for TerminalCredentials {
    fn has_credential(&self) -> bool {
        self.api_key.is_present()
    }

    fn prompt_for_credential(&self) {
        let prompt = CredentialPrompt {
            key_present: self.api_key.is_present(),
        };
        if self.prompts.send(prompt).is_err() {
            tracing::debug!("credential prompt dropped; REPL is gone");
        }
    }
}
