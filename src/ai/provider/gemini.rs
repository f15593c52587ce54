//! Gemini REST Provider
//!
//! Implements both provider seams against the Generative Language API:
//! - documents go through the Files API resumable upload (start, then
//!   upload+finalize in a single request)
//! - reports come from `streamGenerateContent?alt=sse`
//!
//! Upload and delete requests carry a per-request timeout. The streaming
//! request only has a connect timeout; its overall deadline is enforced by the
//! stream relay.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    DocumentIngestion, GenerationRequest, LocalDocument, RemoteDocument, SseDecoder,
    StreamingGenerator, TextStream,
};
use crate::ai::TimeoutConfig;
use crate::config::GenAiConfig;
use crate::constants::genai;
use crate::types::{ErrorCategory, ErrorClassifier, GuanxinError, Result, UpstreamError};

const PROVIDER: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Gemini client with secure API key handling
pub struct GeminiClient {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: &GenAiConfig) -> Result<Self> {
        let api_key_str = config
            .api_key
            .clone()
            .or_else(|| std::env::var(genai::API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                GuanxinError::Config(format!(
                    "Gemini API key not found. Set {} env var or genai.api_key in config",
                    genai::API_KEY_ENV
                ))
            })?;

        let api_base = Self::validate_endpoint(
            config
                .api_base
                .as_deref()
                .unwrap_or(genai::DEFAULT_API_BASE),
        )?;

        let timeouts = TimeoutConfig::from(config);
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| GuanxinError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key_str),
            api_base,
            model: config.model.clone(),
            temperature: config.temperature,
            request_timeout: timeouts.request,
            client,
        })
    }

    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            GuanxinError::Config(format!("Invalid Gemini endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(GuanxinError::Config(format!(
                "Gemini endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if url.scheme() == "http" {
            warn!("Gemini endpoint is not using TLS: {}", endpoint);
        }

        let mut result = url.to_string();
        if result.ends_with('/') {
            result.pop();
        }
        Ok(result)
    }

    fn build_request(&self, request: &GenerationRequest) -> GenerateContentRequest {
        let mut parts: Vec<Part> = request
            .documents
            .iter()
            .map(|doc| Part::FileData {
                file_data: FileData {
                    file_uri: doc.uri.clone(),
                    mime_type: doc.mime_type.clone(),
                },
            })
            .collect();
        parts.push(Part::Text {
            text: request.prompt.clone(),
        });

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        }
    }

    /// Turn a non-success response into a classified upstream error
    async fn error_from_response(response: reqwest::Response) -> GuanxinError {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers().get("retry-after"));
        let body = response.text().await.unwrap_or_default();
        let mut err = ErrorClassifier::classify_http_status(status, &error_message(&body), PROVIDER);
        if let Some(delay) = retry_after {
            err = err.retry_after(delay);
        }
        GuanxinError::Upstream(err)
    }

    fn transport_error(e: &reqwest::Error) -> GuanxinError {
        GuanxinError::Upstream(ErrorClassifier::classify_transport(e, PROVIDER))
    }
}

#[async_trait]
impl DocumentIngestion for GeminiClient {
    async fn upload(&self, document: LocalDocument) -> Result<RemoteDocument> {
        let size = document.bytes.len();
        debug!(
            "Starting resumable upload ({} bytes, {})",
            size, document.mime_type
        );

        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.api_base))
            .timeout(self.request_timeout)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", &document.mime_type)
            .json(&StartUploadRequest {
                file: StartUploadFile {
                    display_name: document.display_name.clone(),
                },
            })
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !start.status().is_success() {
            return Err(Self::error_from_response(start).await);
        }

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                GuanxinError::Upstream(UpstreamError::with_provider(
                    ErrorCategory::ParseError,
                    "Upload session response carried no upload URL",
                    PROVIDER,
                ))
            })?;

        let finalize = self
            .client
            .post(upload_url)
            .timeout(self.request_timeout)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(document.bytes)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !finalize.status().is_success() {
            return Err(Self::error_from_response(finalize).await);
        }

        let body: UploadFileResponse = finalize
            .json()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        info!("Uploaded document as {}", body.file.name);
        Ok(RemoteDocument {
            name: body.file.name,
            uri: body.file.uri,
            mime_type: body.file.mime_type.unwrap_or(document.mime_type),
        })
    }

    async fn delete(&self, document: &RemoteDocument) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/v1beta/{}", self.api_base, document.name))
            .timeout(self.request_timeout)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        debug!("Deleted remote document {}", document.name);
        Ok(())
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[async_trait]
impl StreamingGenerator for GeminiClient {
    async fn generate_stream(&self, request: GenerationRequest) -> Result<TextStream> {
        info!(
            "Generating with Gemini (model: {}, documents: {})",
            self.model,
            request.documents.len()
        );

        let body = self.build_request(&request);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.api_base, self.model
        );

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let stream = try_stream! {
            let mut decoder = SseDecoder::new();
            let mut byte_stream = response.bytes_stream();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(|e| Self::transport_error(&e))?;
                for data in decoder.push(&chunk) {
                    if let Some(text) = parse_event(&data)? {
                        yield text;
                    }
                }
            }

            if let Some(data) = decoder.finish() {
                if let Some(text) = parse_event(&data)? {
                    yield text;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct StartUploadRequest {
    file: StartUploadFile,
}

#[derive(Serialize)]
struct StartUploadFile {
    display_name: String,
}

#[derive(Deserialize)]
struct UploadFileResponse {
    file: FileResource,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    uri: String,
    mime_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
    Text {
        text: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: String,
    mime_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

impl ErrorBody {
    fn describe(&self) -> String {
        let msg = self.message.clone().unwrap_or_default();
        match &self.status {
            Some(status) if !status.is_empty() => format!("{}: {}", status, msg),
            _ => msg,
        }
    }
}

/// Text carried by one SSE event, `None` when the event has no text
fn parse_event(data: &str) -> Result<Option<String>> {
    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        GuanxinError::Upstream(UpstreamError::with_provider(
            ErrorCategory::ParseError,
            format!("Malformed stream event: {}", e),
            PROVIDER,
        ))
    })?;

    if let Some(error) = chunk.error {
        let status = error.code.unwrap_or(500);
        return Err(GuanxinError::Upstream(
            ErrorClassifier::classify_http_status(status, &error.describe(), PROVIDER),
        ));
    }

    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GuanxinError::Upstream(UpstreamError::with_provider(
            ErrorCategory::BadRequest,
            format!("Prompt blocked: {}", reason),
            PROVIDER,
        )));
    }

    let text: String = chunk
        .candidates
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.text)
        .collect();

    Ok(if text.is_empty() { None } else { Some(text) })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| wrapper.error.describe())
        .unwrap_or_else(|_| body.to_string())
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        body::Body,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{delete, post},
    };
    use bytes::Bytes;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        uploaded: Vec<Bytes>,
        deleted: Vec<String>,
        generate_bodies: Vec<Value>,
        api_keys: Vec<String>,
    }

    type Shared = Arc<Mutex<Recorded>>;

    fn key_of(headers: &HeaderMap) -> String {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn start_upload(
        State((state, base)): State<(Shared, String)>,
        headers: HeaderMap,
    ) -> Response {
        state.lock().unwrap().api_keys.push(key_of(&headers));
        let mut response = StatusCode::OK.into_response();
        response.headers_mut().insert(
            UPLOAD_URL_HEADER,
            HeaderValue::from_str(&format!("{}/resumable/session-1", base)).unwrap(),
        );
        response
    }

    async fn finish_upload(
        State((state, _)): State<(Shared, String)>,
        body: Bytes,
    ) -> Json<Value> {
        state.lock().unwrap().uploaded.push(body);
        Json(json!({
            "file": {"name": "files/abc", "uri": "https://files.example/abc", "mimeType": "application/pdf"}
        }))
    }

    async fn delete_file(
        State((state, _)): State<(Shared, String)>,
        Path(id): Path<String>,
    ) -> StatusCode {
        state.lock().unwrap().deleted.push(format!("files/{}", id));
        StatusCode::OK
    }

    async fn generate(
        State((state, _)): State<(Shared, String)>,
        Json(body): Json<Value>,
    ) -> Response {
        state.lock().unwrap().generate_bodies.push(body);
        let events = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"## 摘要\\n\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"心情平穩\"}]}}]}\r\n\r\n",
        );
        Response::builder()
            .header("content-type", "text/event-stream")
            .body(Body::from(events))
            .unwrap()
    }

    async fn generate_unavailable() -> Response {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": {"code": 503, "message": "overloaded", "status": "UNAVAILABLE"}})),
        )
            .into_response()
    }

    async fn spawn_fake(generate_ok: bool) -> (String, Shared) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let state: Shared = Arc::default();

        let router = Router::new()
            .route("/upload/v1beta/files", post(start_upload))
            .route("/resumable/session-1", post(finish_upload))
            .route("/v1beta/files/:id", delete(delete_file));
        // the segment holds "<model>:streamGenerateContent"
        let router = if generate_ok {
            router.route("/v1beta/models/:call", post(generate))
        } else {
            router.route("/v1beta/models/:call", post(generate_unavailable))
        };
        let app = router.with_state((state.clone(), base.clone()));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, state)
    }

    fn client(base: &str) -> GeminiClient {
        GeminiClient::new(&GenAiConfig {
            api_key: Some("test-key".to_string()),
            api_base: Some(base.to_string()),
            ..GenAiConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_client_timeouts_follow_config() {
        let client = GeminiClient::new(&GenAiConfig {
            api_key: Some("test-key".to_string()),
            timeout_secs: 7,
            ..GenAiConfig::default()
        })
        .unwrap();
        assert_eq!(client.request_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_validate_endpoint() {
        assert_eq!(
            GeminiClient::validate_endpoint("https://example.com/").unwrap(),
            "https://example.com"
        );
        assert!(GeminiClient::validate_endpoint("ftp://example.com").is_err());
        assert!(GeminiClient::validate_endpoint("not a url").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = client("https://example.com");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("test-key"));
    }

    #[test]
    fn test_request_parts_order() {
        let client = client("https://example.com");
        let request = client.build_request(&GenerationRequest {
            documents: vec![RemoteDocument {
                name: "files/a".into(),
                uri: "https://files/a".into(),
                mime_type: "application/pdf".into(),
            }],
            prompt: "analyze".into(),
        });
        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(parts[0]["fileData"]["fileUri"], "https://files/a");
        assert_eq!(parts[0]["fileData"]["mimeType"], "application/pdf");
        assert_eq!(parts[1]["text"], "analyze");
    }

    #[test]
    fn test_parse_event_variants() {
        assert_eq!(
            parse_event(r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]}}]}"#)
                .unwrap(),
            Some("ab".to_string())
        );
        assert_eq!(
            parse_event(r#"{"candidates":[{"finishReason":"STOP"}]}"#).unwrap(),
            None
        );

        let blocked = parse_event(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap_err();
        assert!(blocked.to_string().contains("SAFETY"));

        let err = parse_event(r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#)
            .unwrap_err();
        match err {
            GuanxinError::Upstream(e) => assert_eq!(e.category, ErrorCategory::RateLimit),
            other => panic!("unexpected error: {other}"),
        }

        assert!(parse_event("not json").is_err());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":{"message":"bad key","status":"PERMISSION_DENIED"}}"#),
            "PERMISSION_DENIED: bad key"
        );
        assert_eq!(error_message("plain text"), "plain text");
    }

    #[tokio::test]
    async fn test_upload_and_delete_round_trip() {
        let (base, state) = spawn_fake(true).await;
        let client = client(&base);

        let remote = client
            .upload(LocalDocument {
                display_name: "journal".into(),
                mime_type: "application/pdf".into(),
                bytes: Bytes::from_static(b"%PDF-1.4"),
            })
            .await
            .unwrap();
        assert_eq!(remote.name, "files/abc");
        assert_eq!(remote.uri, "https://files.example/abc");

        client.delete(&remote).await.unwrap();

        let recorded = state.lock().unwrap();
        assert_eq!(recorded.uploaded, vec![Bytes::from_static(b"%PDF-1.4")]);
        assert_eq!(recorded.deleted, vec!["files/abc".to_string()]);
        assert_eq!(recorded.api_keys, vec!["test-key".to_string()]);
    }

    #[tokio::test]
    async fn test_generate_stream_yields_fragments() {
        let (base, state) = spawn_fake(true).await;
        let client = client(&base);

        let stream = client
            .generate_stream(GenerationRequest {
                documents: vec![],
                prompt: "hello".into(),
            })
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(fragments, vec!["## 摘要\n".to_string(), "心情平穩".to_string()]);

        let recorded = state.lock().unwrap();
        assert_eq!(
            recorded.generate_bodies[0]["contents"][0]["parts"][0]["text"],
            "hello"
        );
    }

    #[tokio::test]
    async fn test_generate_stream_open_failure() {
        let (base, _) = spawn_fake(false).await;
        let client = client(&base);

        let err = client
            .generate_stream(GenerationRequest {
                documents: vec![],
                prompt: "hello".into(),
            })
            .await
            .err()
            .unwrap();
        match err {
            GuanxinError::Upstream(e) => {
                assert_eq!(e.status, Some(503));
                assert!(e.message.contains("overloaded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
