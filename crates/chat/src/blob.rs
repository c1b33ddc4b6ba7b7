use std::path::PathBuf;

use polychat_llm::BoxFuture;
use snafu::ResultExt;

use super::error::{ChatResult, StoreArtifactSnafu};

/// Turns downloaded bytes into a URL the renderer can open.
pub trait BlobStore: Send + Sync {
    fn put<'a>(&'a self, bytes: Vec<u8>, mime_type: &'a str) -> BoxFuture<'a, ChatResult<String>>;
}

/// Writes each artifact to its own file and hands back a `file://` URL.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    directory: PathBuf,
}

impl FileBlobStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn extension_for(mime_type: &str) -> &'static str {
        match mime_type {
            "video/mp4" => "mp4",
            "video/webm" => "webm",
            "image/png" => "png",
            "image/jpeg" => "jpg",
            _ => "bin",
        }
    }
}

impl BlobStore for FileBlobStore {
    fn put<'a>(&'a self, bytes: Vec<u8>, mime_type: &'a str) -> BoxFuture<'a, ChatResult<String>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.directory)
                .await
                .context(StoreArtifactSnafu {
                    stage: "create-artifact-dir",
                    path: self.directory.clone(),
                })?;

            let path = self.directory.join(format!(
                "{}.{}",
                uuid::Uuid::new_v4(),
                Self::extension_for(mime_type)
            ));
            tokio::fs::write(&path, &bytes)
                .await
                .context(StoreArtifactSnafu {
                    stage: "write-artifact",
                    path: path.clone(),
                })?;

            tracing::info!(path = %path.display(), bytes = bytes.len(), "stored artifact");
            Ok(format!("file://{}", path.display()))
        })
    }
}
