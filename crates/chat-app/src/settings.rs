use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use polychat_chat::VideoSettings;
use polychat_llm::{
    DEFAULT_GEMINI_ENDPOINT, DEFAULT_MODEL_ID, GEMINI_PROVIDER_ID, ProviderConfig,
    RIG_OPENAI_PROVIDER_ID, VideoJobConfig,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "polychat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "POLYCHAT_";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_IMAGE_ASPECT_RATIO: &str = "1:1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_video_count")]
    pub count: u32,
    #[serde(default = "default_video_resolution")]
    pub resolution: String,
    #[serde(default = "default_video_aspect_ratio")]
    pub aspect_ratio: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            count: default_video_count(),
            resolution: default_video_resolution(),
            aspect_ratio: default_video_aspect_ratio(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// `gemini` or `openai`; only affects text models.
    #[serde(default = "default_text_provider")]
    pub text_provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_endpoint")]
    pub openai_endpoint: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_search_grounding")]
    pub search_grounding: bool,
    #[serde(default = "default_image_aspect_ratio")]
    pub image_aspect_ratio: String,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            text_provider: default_text_provider(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            openai_api_key: String::new(),
            openai_endpoint: default_openai_endpoint(),
            default_model: default_model(),
            search_grounding: default_search_grounding(),
            image_aspect_ratio: default_image_aspect_ratio(),
            video: VideoConfig::default(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.text_provider = non_blank_or(&self.text_provider, default_text_provider)
            .to_ascii_lowercase();
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank_or(&self.endpoint, default_endpoint);
        self.openai_api_key = self.openai_api_key.trim().to_string();
        self.openai_endpoint = non_blank_or(&self.openai_endpoint, default_openai_endpoint);
        self.default_model = non_blank_or(&self.default_model, default_model);
        self.image_aspect_ratio = non_blank_or(&self.image_aspect_ratio, default_image_aspect_ratio);

        self.video.poll_interval_secs = self.video.poll_interval_secs.max(1);
        self.video.count = self.video.count.max(1);
        self.video.resolution = non_blank_or(&self.video.resolution, default_video_resolution);
        self.video.aspect_ratio =
            non_blank_or(&self.video.aspect_ratio, default_video_aspect_ratio);

        if self.artifact_dir.as_os_str().is_empty() {
            self.artifact_dir = default_artifact_dir();
        }
        self
    }

    pub fn uses_openai_text(&self) -> bool {
        matches!(self.text_provider.as_str(), "openai" | "rig-openai")
    }

    /// Provider config for the text backend factory.
    pub fn text_provider_config(&self) -> ProviderConfig {
        if self.uses_openai_text() {
            ProviderConfig::new(
                RIG_OPENAI_PROVIDER_ID,
                &self.openai_api_key,
                &self.openai_endpoint,
            )
        } else {
            ProviderConfig::new(GEMINI_PROVIDER_ID, &self.api_key, &self.endpoint)
        }
    }

    pub fn video_settings(&self) -> VideoSettings {
        VideoSettings {
            poll_interval: Duration::from_secs(self.video.poll_interval_secs),
            job: VideoJobConfig {
                count: self.video.count,
                resolution: self.video.resolution.clone(),
                aspect_ratio: self.video.aspect_ratio.clone(),
            },
        }
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".polychat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layered(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults, then the JSON file, then the environment.
    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Json::file(path))
            .merge(Env::raw().only(&["API_KEY"]).map(|_| "api_key".into()))
            .merge(Env::raw().only(&["GEMINI_API_KEY"]).map(|_| "api_key".into()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn load_layered(path: &Path) -> AppSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults and environment");
        }

        match Self::figment(path).extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to load settings, using defaults"
                );
                AppSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: &str, fallback: fn() -> String) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback()
    } else {
        value.to_string()
    }
}

fn default_text_provider() -> String {
    GEMINI_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_GEMINI_ENDPOINT.to_string()
}

fn default_openai_endpoint() -> String {
    DEFAULT_OPENAI_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_search_grounding() -> bool {
    true
}

fn default_image_aspect_ratio() -> String {
    DEFAULT_IMAGE_ASPECT_RATIO.to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_video_count() -> u32 {
    VideoJobConfig::default().count
}

fn default_video_resolution() -> String {
    VideoJobConfig::default().resolution
}

fn default_video_aspect_ratio() -> String {
    VideoJobConfig::default().aspect_ratio
}

fn default_artifact_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME).join("artifacts"))
        .unwrap_or_else(|| PathBuf::from(".polychat").join("artifacts"))
}
