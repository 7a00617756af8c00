// HTTP client for the recommendation backend

use crate::error::{MoodSyncError, Result};
use base64::Engine;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Shown when the backend answers without a recommendation or an error
pub const NO_RECOMMENDATION: &str = "Unable to get recommendation.";

#[derive(Debug, Serialize)]
struct EmotionUpdate<'a> {
    emotion: &'a str,
    confidence: f32,
}

#[derive(Debug, Serialize)]
struct RecommendationRequest<'a> {
    emotion: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct RecommendationResponse {
    recommendation: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Result of the server-side still image analysis
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UploadAnalysis {
    pub emotion: Option<String>,
    pub confidence: Option<f32>,
    /// `data:image/...;base64,...`
    pub annotated_image: Option<String>,
    pub error: Option<String>,
}

impl UploadAnalysis {
    /// Decodes the annotated image data-URI into raw image bytes
    pub fn annotated_image_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.annotated_image
            .as_deref()
            .map(decode_data_uri)
            .transpose()
    }
}

/// Decodes the payload of a base64 `data:` URI
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let payload = match uri.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| MoodSyncError::Backend("malformed data URI".to_string()))?;
            if !meta.ends_with(";base64") {
                return Err(MoodSyncError::Backend(format!(
                    "unsupported data URI encoding: {meta}"
                )));
            }
            data
        }
        None => uri,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| MoodSyncError::Backend(format!("invalid base64 image: {e}")))
}

/// Client for `/update_emotion`, `/upload_image` and `/get_recommendation`
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| MoodSyncError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Posts the current emotion; any non-2xx status is an error
    pub async fn update_emotion(&self, emotion: &str, confidence: f32) -> Result<()> {
        let response = self
            .client
            .post(self.url("/update_emotion"))
            .json(&EmotionUpdate {
                emotion,
                confidence,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MoodSyncError::Backend(format!(
                "/update_emotion returned HTTP {}",
                response.status()
            )));
        }
        debug!("Reported {} ({:.2}) to backend", emotion, confidence);
        Ok(())
    }

    /// Uploads an image for server-side analysis
    pub async fn upload_image(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadAnalysis> {
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(self.url("/upload_image"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_else(|e| {
                warn!("Unreadable error body from /upload_image: {}", e);
                ErrorBody::default()
            });
            return Err(MoodSyncError::Backend(
                body.error.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            ));
        }

        Ok(response.json().await?)
    }

    /// Asks the backend for a recommendation matching `emotion`
    pub async fn get_recommendation(&self, emotion: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/get_recommendation"))
            .json(&RecommendationRequest { emotion })
            .send()
            .await?;

        let body: RecommendationResponse = response.json().await?;
        recommendation_from(body)
    }
}

fn recommendation_from(body: RecommendationResponse) -> Result<String> {
    match (body.recommendation, body.error) {
        (Some(recommendation), _) => Ok(recommendation),
        (None, Some(error)) => Err(MoodSyncError::Backend(error)),
        (None, None) => Err(MoodSyncError::Backend(NO_RECOMMENDATION.to_string())),
    }
}
