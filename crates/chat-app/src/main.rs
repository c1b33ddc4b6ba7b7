use std::process::ExitCode;
use std::sync::Arc;

use polychat_chat::{
    ConversationStore, FileBlobStore, ImageRequestOrchestrator, RequestDispatcher,
    TextStreamOrchestrator, TokioScheduler, VideoJobOrchestrator,
};
use polychat_llm::{GeminiClient, SharedApiKey, create_text_backend, default_catalog, find_model};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod credentials;
mod repl;
mod settings;
mod terminal;

use credentials::TerminalCredentials;
use repl::{Flow, Session, parse_command};
use settings::SettingsStore;

const DEFAULT_LOG_FILTER: &str = "polychat=info";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Arc::new(SettingsStore::load());
    let current = settings.settings();
    tracing::info!(
        path = %settings.config_path().display(),
        text_provider = %current.text_provider,
        key_present = !current.api_key.is_empty(),
        "settings loaded"
    );

    let api_key = SharedApiKey::new(current.api_key.as_str());
    let gemini = Arc::new(GeminiClient::new(current.endpoint.as_str(), api_key.clone()));
    let text_backend = match create_text_backend(current.text_provider_config(), gemini.clone()) {
        Ok(backend) => backend,
        Err(error) => {
            tracing::error!(error = %error, stage = error.stage(), "failed to create text backend");
            eprintln!("polychat: {error}");
            return ExitCode::FAILURE;
        }
    };

    let (credentials, mut credential_prompts) = TerminalCredentials::new(api_key.clone());
    let blobs = FileBlobStore::new(current.artifact_dir.clone());
    let store = ConversationStore::new();
    let dispatcher = Arc::new(RequestDispatcher::new(
        store.clone(),
        TextStreamOrchestrator::new(text_backend, current.search_grounding),
        ImageRequestOrchestrator::new(gemini.clone(), current.image_aspect_ratio.as_str()),
        VideoJobOrchestrator::new(
            gemini,
            Arc::new(credentials),
            Arc::new(blobs.clone()),
            Arc::new(TokioScheduler),
            current.video_settings(),
        ),
    ));

    let catalog = default_catalog();
    let Some(model) = find_model(&catalog, &current.default_model).cloned() else {
        eprintln!("polychat: model catalog is empty");
        return ExitCode::FAILURE;
    };
    let renderer = terminal::spawn_renderer(store);
    let mut session = Session::new(
        dispatcher,
        catalog,
        model,
        Arc::clone(&settings),
        api_key.clone(),
        blobs,
    );

    println!("polychat: chatting with {}. /help for commands.", session.model().display_name);
    if !api_key.is_present() {
        println!("No API key configured. Set GEMINI_API_KEY or enter `/key <value>`.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if session.handle(parse_command(&line)).await == Flow::Quit {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::error!(error = %error, "failed to read stdin");
                    break;
                }
            },
            Some(prompt) = credential_prompts.recv() => println!("\n{}", prompt.message()),
        }
    }

    renderer.abort();
    tracing::debug!("repl closed");
    ExitCode::SUCCESS
}
