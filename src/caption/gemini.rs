use super::{CaptionBackend, DecodingParams};
use crate::config::CaptionConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: &'a DecodingParams,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    File { file_data: FileData },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        Some(text)
    }
}

/// Gemini REST client (Files API upload + generateContent)
pub struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &CaptionConfig) -> Result<Self> {
        let base_url = Url::parse(&config.backend_url)?;
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid caption backend URL: {}", e)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-goog-api-key", key),
            None => request,
        }
    }

    /// Resolve a handle to the URI the generate call references.
    /// Handles that are already URLs are used as-is.
    pub fn file_uri(&self, handle: &str) -> Result<String> {
        if handle.starts_with("http://") || handle.starts_with("https://") {
            return Ok(handle.to_string());
        }
        Ok(self.endpoint(&format!("/v1beta/{}", handle))?.to_string())
    }

    async fn check_status(response: Response, on_error: fn(String) -> Error) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status, body);
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(on_error(message))
        } else {
            Err(Error::Other(format!("Caption backend rejected request, {}", message)))
        }
    }
}

/// Map a 401/403/404 from generateContent to an error.
///
/// Only a rejection that names the referenced file means the handle expired.
/// Anything else (bad key, unregistered caller, unknown model) is a
/// configuration problem that no re-upload can fix.
fn classify_rejection(status: StatusCode, body: &str, handle: &str) -> Error {
    let message = body.to_lowercase();
    let names_file = message.contains("file") || message.contains(&handle.to_lowercase());
    if status != StatusCode::UNAUTHORIZED && names_file {
        return Error::HandleExpired(handle.to_string());
    }
    Error::Config(format!(
        "Caption backend rejected the request (HTTP {}): {}",
        status, body
    ))
}

#[async_trait]
impl CaptionBackend for GeminiClient {
    async fn upload(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let mut url = self.endpoint("/upload/v1beta/files")?;
        url.query_pairs_mut().append_pair("uploadType", "media");

        let request = self
            .authorize(self.client.post(url))
            .header("X-Goog-Upload-Protocol", "raw")
            .header(reqwest::header::CONTENT_TYPE, mime.essence_str())
            .body(bytes);

        let response = request
            .send()
            .await
            .map_err(|e| Error::Upload(e.to_string()))?;
        let response = Self::check_status(response, Error::Upload).await?;
        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::Upload(format!("Malformed upload response: {}", e)))?;

        debug!(path = %path.display(), handle = %parsed.file.name, "Uploaded image");
        Ok(parsed.file.name)
    }

    async fn generate(
        &self,
        handle: &str,
        prompt: &str,
        params: &DecodingParams,
    ) -> Result<String> {
        let file_uri = self.file_uri(handle)?;
        let mime_type = mime_guess::from_path(handle)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());

        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::File {
                        file_data: FileData { mime_type, file_uri },
                    },
                    Part::Text { text: prompt },
                ],
            }],
            generation_config: params,
        };

        let url = self.endpoint(&format!("/v1beta/models/{}:generateContent", self.model))?;
        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Caption(e.to_string()))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        ) {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_rejection(status, &body, handle));
        }
        let response = Self::check_status(response, Error::Caption).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Caption(format!("Malformed generate response: {}", e)))?;
        parsed
            .into_text()
            .ok_or_else(|| Error::Caption("Generate response had no candidates".to_string()))
    }
}
