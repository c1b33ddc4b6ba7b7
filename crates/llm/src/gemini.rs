use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use snafu::{ResultExt, ensure};

use super::credential::SharedApiKey;
use super::error::{
    ApiKeyNotFoundSnafu, BackendError, BackendResult, DecodeInlineDataSnafu, DecodePayloadSnafu,
    EntityNotFoundSnafu, HttpSnafu, MissingApiKeySnafu, PermissionDeniedSnafu, StatusSnafu,
};
use super::provider::{
    BoxFuture, GroundingSource, ImageBackend, ImageRequest, ImageResponse, InlineData,
    PromptPart, ResponsePart, TextBackend, TextChunk, TextChunkStream, TextRequest,
    VideoBackend, VideoJobHandle, VideoJobRequest,
};

pub const GEMINI_PROVIDER_ID: &str = "gemini";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";
const ENTITY_NOT_FOUND_SIGNATURE: &str = "Requested entity was not found";

/// Google Generative Language REST adapter covering text, image and video generation.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SharedApiKey,
}

impl GeminiClient {
    pub fn new(endpoint: impl Into<String>, api_key: SharedApiKey) -> Self {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            endpoint: if endpoint.is_empty() {
                DEFAULT_GEMINI_ENDPOINT.to_string()
            } else {
                endpoint
            },
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn current_key(&self, stage: &'static str) -> BackendResult<Arc<String>> {
        let key = self.api_key.load();
        ensure!(
            !key.is_empty(),
            MissingApiKeySnafu {
                stage,
                provider_id: GEMINI_PROVIDER_ID,
            }
        );
        Ok(key)
    }

    async fn post_json(
        &self,
        stage: &'static str,
        path: &str,
        body: &Value,
    ) -> BackendResult<reqwest::Response> {
        let key = self.current_key(stage)?;
        let response = self
            .http
            .post(self.url(path))
            .header(API_KEY_HEADER, key.as_str())
            .json(body)
            .send()
            .await
            .context(HttpSnafu { stage })?;
        ensure_success(stage, response).await
    }

    async fn get(&self, stage: &'static str, url: &str) -> BackendResult<reqwest::Response> {
        let key = self.current_key(stage)?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, key.as_str())
            .send()
            .await
            .context(HttpSnafu { stage })?;
        ensure_success(stage, response).await
    }
}

impl TextBackend for GeminiClient {
    fn id(&self) -> &str {
        GEMINI_PROVIDER_ID
    }

    fn stream_text<'a>(
        &'a self,
        request: TextRequest,
    ) -> BoxFuture<'a, BackendResult<TextChunkStream>> {
        Box::pin(async move {
            let mut body = json!({
                "contents": [{ "role": "user", "parts": parts_json(&request.parts) }],
            });
            if request.search_grounding {
                body["tools"] = json!([{ "googleSearch": {} }]);
            }

            let path = format!(
                "models/{}:streamGenerateContent?alt=sse",
                request.backend_model
            );
            tracing::debug!(
                model_id = %request.backend_model,
                search_grounding = request.search_grounding,
                "opening gemini text stream"
            );
            let response = self.post_json("stream-text", &path, &body).await?;
            Ok(sse_chunks(response))
        })
    }
}

impl ImageBackend for GeminiClient {
    fn generate_image<'a>(
        &'a self,
        request: ImageRequest,
    ) -> BoxFuture<'a, BackendResult<ImageResponse>> {
        Box::pin(async move {
            let body = json!({
                "contents": [{ "role": "user", "parts": parts_json(&request.parts) }],
                "generationConfig": {
                    "responseModalities": ["TEXT", "IMAGE"],
                    "imageConfig": { "aspectRatio": request.aspect_ratio },
                },
            });
            let path = format!("models/{}:generateContent", request.backend_model);
            let response = self.post_json("generate-image", &path, &body).await?;
            let payload = response.bytes().await.context(HttpSnafu {
                stage: "generate-image-read",
            })?;
            let parsed: GenerateContentResponse =
                serde_json::from_slice(&payload).context(DecodePayloadSnafu {
                    stage: "generate-image-decode",
                })?;
            image_response(parsed)
        })
    }
}

impl VideoBackend for GeminiClient {
    fn submit_video_job<'a>(
        &'a self,
        request: VideoJobRequest,
    ) -> BoxFuture<'a, BackendResult<VideoJobHandle>> {
        Box::pin(async move {
            let mut instance = json!({ "prompt": request.prompt });
            if let Some(image) = &request.image {
                instance["image"] = json!({
                    "bytesBase64Encoded": BASE64.encode(&image.data),
                    "mimeType": image.mime_type,
                });
            }
            let body = json!({
                "instances": [instance],
                "parameters": {
                    "sampleCount": request.config.count,
                    "resolution": request.config.resolution,
                    "aspectRatio": request.config.aspect_ratio,
                },
            });

            let path = format!("models/{}:predictLongRunning", request.backend_model);
            let response = self.post_json("submit-video-job", &path, &body).await?;
            let payload = response.bytes().await.context(HttpSnafu {
                stage: "submit-video-job-read",
            })?;
            parse_operation(&payload, None)
        })
    }

    fn poll_video_job<'a>(
        &'a self,
        handle: &'a VideoJobHandle,
    ) -> BoxFuture<'a, BackendResult<VideoJobHandle>> {
        Box::pin(async move {
            let url = self.url(&handle.name);
            let response = self.get("poll-video-job", &url).await?;
            let payload = response.bytes().await.context(HttpSnafu {
                stage: "poll-video-job-read",
            })?;
            parse_operation(&payload, Some(&handle.name))
        })
    }

    fn fetch_artifact<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, BackendResult<Vec<u8>>> {
        Box::pin(async move {
            let response = self.get("fetch-artifact", uri).await?;
            let bytes = response.bytes().await.context(HttpSnafu {
                stage: "fetch-artifact-read",
            })?;
            Ok(bytes.to_vec())
        })
    }
}

async fn ensure_success(
    stage: &'static str,
    response: reqwest::Response,
) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|error| format!("<unreadable body: {error}>"));
    let error = classify_failure(stage, status.as_u16(), &body);
    tracing::warn!(
        stage,
        status = status.as_u16(),
        error = %error,
        "gemini request failed"
    );
    Err(error)
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Maps an HTTP failure to a structured error from the status code and Google's error JSON.
pub(crate) fn classify_failure(stage: &'static str, status: u16, body: &str) -> BackendError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .unwrap_or_else(|| ErrorBody {
            message: body.trim().to_string(),
            status: String::new(),
        });

    let message = detail.message;
    if message.contains("API key not valid") || message.contains("API key not found") {
        return ApiKeyNotFoundSnafu { stage, message }.build();
    }
    // Other 404s, such as an unknown model id, stay generic.
    if message.contains(ENTITY_NOT_FOUND_SIGNATURE) {
        return EntityNotFoundSnafu { stage, message }.build();
    }
    if status == 403 || detail.status == "PERMISSION_DENIED" {
        return PermissionDeniedSnafu { stage, message }.build();
    }
    if status == 401 || detail.status == "UNAUTHENTICATED" {
        return ApiKeyNotFoundSnafu { stage, message }.build();
    }

    StatusSnafu {
        stage,
        status,
        body: message,
    }
    .build()
}

fn parts_json(parts: &[PromptPart]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => json!({ "text": text }),
            PromptPart::InlineData(inline) => json!({
                "inlineData": {
                    "mimeType": inline.mime_type,
                    "data": BASE64.encode(&inline.data),
                },
            }),
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    inline_data: Option<WireInlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct WebChunk {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    title: String,
}

fn sse_chunks(response: reqwest::Response) -> TextChunkStream {
    Box::pin(async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut lines = SseLineBuffer::default();

        while let Some(next) = bytes.next().await {
            let next = match next.context(HttpSnafu { stage: "stream-text-read" }) {
                Ok(next) => next,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            for payload in lines.push(&next) {
                match parse_stream_payload(&payload) {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => {}
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                }
            }
        }

        for payload in lines.finish() {
            match parse_stream_payload(&payload) {
                Ok(Some(chunk)) => yield Ok(chunk),
                Ok(None) => {}
                Err(error) => {
                    yield Err(error);
                    return;
                }
            }
        }
    })
}

/// Reassembles server-sent-event `data:` payloads from arbitrarily split byte chunks.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=position).collect::<Vec<_>>();
            // UTF-8 is decoded per complete line so multi-byte characters never get split.
            let line = String::from_utf8_lossy(&line);
            self.accept_line(line.trim_end_matches(['\n', '\r']), &mut payloads);
        }

        payloads
    }

    fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&line);
            self.accept_line(line.trim_end_matches(['\n', '\r']), &mut payloads);
        }
        self.flush_event(&mut payloads);
        payloads
    }

    fn accept_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            self.flush_event(payloads);
        } else if let Some(data) = line.strip_prefix("data:") {
            self.data_lines.push(data.trim_start().to_string());
        }
    }

    fn flush_event(&mut self, payloads: &mut Vec<String>) {
        if self.data_lines.is_empty() {
            return;
        }
        payloads.push(self.data_lines.join("\n"));
        self.data_lines.clear();
    }
}

fn parse_stream_payload(payload: &str) -> BackendResult<Option<TextChunk>> {
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }

    let response: GenerateContentResponse =
        serde_json::from_str(payload).context(DecodePayloadSnafu {
            stage: "stream-text-decode",
        })?;
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(None);
    };

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| !part.thought)
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    let sources = candidate
        .grounding_metadata
        .map(|metadata| {
            metadata
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .filter(|web| !web.uri.is_empty())
                .map(|web| GroundingSource::new(web.uri, web.title))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if text.is_empty() && sources.is_empty() {
        return Ok(None);
    }

    Ok(Some(TextChunk {
        delta: (!text.is_empty()).then_some(text),
        sources,
    }))
}

fn image_response(response: GenerateContentResponse) -> BackendResult<ImageResponse> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default();

    let mut mapped = Vec::with_capacity(parts.len());
    for part in parts {
        match (part.inline_data, part.text) {
            (Some(inline), _) => {
                let data = BASE64.decode(inline.data.as_bytes()).context(DecodeInlineDataSnafu {
                    stage: "generate-image-inline-data",
                })?;
                mapped.push(ResponsePart::InlineData(InlineData::new(inline.mime_type, data)));
            }
            (None, Some(text)) if !part.thought => mapped.push(ResponsePart::Text(text)),
            (None, _) => {}
        }
    }

    Ok(ImageResponse { parts: mapped })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<OperationResponse>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    #[serde(default)]
    video: Option<VideoRef>,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    #[serde(default)]
    uri: Option<String>,
}

fn parse_operation(payload: &[u8], previous_name: Option<&str>) -> BackendResult<VideoJobHandle> {
    let operation: Operation = serde_json::from_slice(payload).context(DecodePayloadSnafu {
        stage: "video-operation-decode",
    })?;

    let name = operation
        .name
        .or_else(|| previous_name.map(str::to_string))
        .unwrap_or_default();
    let result_uri = operation
        .response
        .and_then(|response| response.generate_video_response)
        .and_then(|response| response.generated_samples.into_iter().next())
        .and_then(|sample| sample.video)
        .and_then(|video| video.uri)
        .filter(|uri| !uri.is_empty());

    Ok(VideoJobHandle {
        name,
        done: operation.done,
        result_uri,
        error: operation
            .error
            .map(|error| error.message)
            .filter(|message| !message.is_empty()),
    })
}
