use crate::core::config::BackendConfig;
use crate::core::errors::BackendError;
use crate::services::backend::GenerationBackend;
use crate::services::script::strip_code_blocks;
use crate::utils::image::ImageData;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug)]
pub struct GeminiBackend {
    base_url: String,
    text_model: String,
    image_model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(rename = "responseModalities", skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiError,
}

fn text_part(text: &str) -> GeminiPart {
    GeminiPart {
        text: Some(text.to_string()),
        inline_data: None,
    }
}

fn image_part(image: &ImageData) -> GeminiPart {
    GeminiPart {
        text: None,
        inline_data: Some(InlineData {
            mime_type: image.mime_type.clone(),
            data: image.to_base64(),
        }),
    }
}

fn is_quota_status(code: Option<u16>, status: Option<&str>) -> bool {
    code == Some(429) || status.is_some_and(|s| s.eq_ignore_ascii_case("RESOURCE_EXHAUSTED"))
}

fn classify_http_error(status: u16, body: &str) -> BackendError {
    match serde_json::from_str::<GeminiErrorEnvelope>(body) {
        Ok(envelope) => {
            let err = envelope.error;
            if status == 429 || is_quota_status(err.code, err.status.as_deref()) {
                BackendError::RateLimited(err.message)
            } else {
                BackendError::Http {
                    status,
                    message: err.message,
                }
            }
        }
        Err(_) if status == 429 => BackendError::RateLimited(body.to_string()),
        Err(_) => BackendError::Http {
            status,
            message: body.to_string(),
        },
    }
}

fn first_parts(body: &str) -> std::result::Result<Vec<GeminiPart>, BackendError> {
    let response: GeminiResponse = serde_json::from_str(body).map_err(|e| {
        BackendError::InvalidResponse(format!("Failed to parse Gemini response: {}. Body: {}", e, body))
    })?;

    if let Some(err) = response.error {
        if is_quota_status(err.code, err.status.as_deref()) {
            return Err(BackendError::RateLimited(err.message));
        }
        return Err(BackendError::InvalidResponse(format!(
            "Gemini API returned error: {}",
            err.message
        )));
    }

    let candidate = response
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| BackendError::InvalidResponse("Gemini response has no candidates".to_string()))?;
    match candidate.content {
        Some(content) if !content.parts.is_empty() => Ok(content.parts),
        _ => {
            let reason = candidate.finish_reason.as_deref().unwrap_or("UNKNOWN");
            Err(BackendError::InvalidResponse(format!(
                "Gemini response empty. Finish reason: {}",
                reason
            )))
        }
    }
}

fn extract_json(body: &str) -> Result<serde_json::Value> {
    let text: String = first_parts(body)?
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    let clean = strip_code_blocks(&text);
    serde_json::from_str(&clean).map_err(|e| {
        BackendError::InvalidResponse(format!("Reply is not valid JSON: {}. Text: {}", e, clean))
            .into()
    })
}

fn extract_image(body: &str) -> Result<ImageData> {
    let inline = first_parts(body)?
        .into_iter()
        .find_map(|p| p.inline_data)
        .ok_or_else(|| BackendError::InvalidResponse("Gemini reply contains no image".to_string()))?;
    let image = ImageData::from_base64(&inline.mime_type, &inline.data)?;
    // Some replies label the payload application/octet-stream.
    if image.mime_type.starts_with("image/") {
        Ok(image)
    } else {
        Ok(ImageData::from_bytes(image.bytes))
    }
}

impl GeminiBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            client,
        })
    }

    fn endpoint(&self, model: &str) -> Result<Url> {
        Url::parse(&format!("{}/models/{}:generateContent", self.base_url, model))
            .with_context(|| format!("Invalid Gemini base URL: {}", self.base_url))
    }

    async fn post(&self, api_key: &str, model: &str, request: &GeminiRequest) -> Result<String> {
        let url = self.endpoint(model)?;
        debug!("POST {}", url);

        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &body).into());
        }
        Ok(body)
    }

    fn image_request(parts: Vec<GeminiPart>) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: None,
                response_schema: None,
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            }),
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn generate_text(
        &self,
        api_key: &str,
        prompt: &str,
        images: &[ImageData],
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut parts: Vec<GeminiPart> = images.iter().map(image_part).collect();
        parts.push(text_part(prompt));

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema.clone()),
                response_modalities: None,
            }),
        };

        let body = self.post(api_key, &self.text_model, &request).await?;
        extract_json(&body)
    }

    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        references: &[ImageData],
    ) -> Result<ImageData> {
        let mut parts = vec![text_part(prompt)];
        parts.extend(references.iter().map(image_part));

        let body = self
            .post(api_key, &self.image_model, &Self::image_request(parts))
            .await?;
        extract_image(&body)
    }

    async fn edit_image(
        &self,
        api_key: &str,
        image: &ImageData,
        instruction: &str,
    ) -> Result<ImageData> {
        let parts = vec![image_part(image), text_part(instruction)];

        let body = self
            .post(api_key, &self.image_model, &Self::image_request(parts))
            .await?;
        extract_image(&body)
    }
}
