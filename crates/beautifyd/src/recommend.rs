//! Filter recommendations from a remote text/vision model.
//!
//! Prompts are composed here and sent through a [`Recommender`]. With an
//! API key the daemon uses [`GeminiRecommender`]; without one every request
//! fails with [`RecommendError::Disabled`]. Failures are reported to the
//! caller and never retried.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use beautify_core::capture::{self, CaptureError};
use beautify_core::FilterId;
use chrono::Timelike;
use image::RgbaImage;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecommendError {
    #[error("AI features are disabled (no API key configured)")]
    Disabled,
    #[error("API key invalid")]
    InvalidKey,
    #[error("rate limited, try again later")]
    RateLimited,
    #[error("{0}")]
    Other(String),
}

/// A generative model endpoint. Blocking; callers run it off the runtime.
pub trait Recommender: Send + Sync {
    /// `image` is a base64 JPEG when present.
    fn generate(&self, prompt: &str, image: Option<&str>) -> Result<String, RecommendError>;
}

/// Stand-in used when no API key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRecommender;

impl Recommender for DisabledRecommender {
    fn generate(&self, _prompt: &str, _image: Option<&str>) -> Result<String, RecommendError> {
        Err(RecommendError::Disabled)
    }
}

/// Upper bound for one generate call, vision uploads included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking client for the `generateContent` endpoint.
pub struct GeminiRecommender {
    agent: ureq::Agent,
    url: String,
    api_key: String,
}

impl GeminiRecommender {
    /// `endpoint` is the API base, e.g.
    /// `https://generativelanguage.googleapis.com/v1beta`.
    pub fn new(api_key: impl Into<String>, endpoint: &str, model: &str) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            agent,
            url: generate_url(endpoint, model),
            api_key: api_key.into(),
        }
    }
}

impl Recommender for GeminiRecommender {
    fn generate(&self, prompt: &str, image: Option<&str>) -> Result<String, RecommendError> {
        tracing::debug!(url = %self.url, vision = image.is_some(), "sending recommendation request");
        let reply: GenerateResponse = self
            .agent
            .post(self.url.as_str())
            .header("x-goog-api-key", self.api_key.as_str())
            .send_json(request_body(prompt, image))
            .and_then(|mut resp| resp.body_mut().read_json())
            .map_err(transport_error)?;
        reply.text()
    }
}

fn generate_url(endpoint: &str, model: &str) -> String {
    format!("{}/models/{model}:generateContent", endpoint.trim_end_matches('/'))
}

/// One user turn: the prompt, then the frame as inline JPEG when present.
fn request_body(prompt: &str, image: Option<&str>) -> serde_json::Value {
    let mut parts = vec![json!({ "text": prompt })];
    if let Some(data) = image {
        parts.push(json!({ "inline_data": { "mime_type": "image/jpeg", "data": data } }));
    }
    json!({ "contents": [{ "role": "user", "parts": parts }] })
}

fn status_error(status: u16) -> RecommendError {
    match status {
        400 | 401 | 403 => RecommendError::InvalidKey,
        429 => RecommendError::RateLimited,
        other => RecommendError::Other(format!("recommendation service returned HTTP {other}")),
    }
}

fn transport_error(e: ureq::Error) -> RecommendError {
    match e {
        ureq::Error::StatusCode(status) => status_error(status),
        ureq::Error::Timeout(_) => RecommendError::Other("recommendation request timed out".into()),
        other => RecommendError::Other(format!("recommendation request failed: {other}")),
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text parts of the first candidate, joined.
    fn text(&self) -> Result<String, RecommendError> {
        let text: String = self
            .candidates
            .first()
            .map(|c| c.content.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return Err(RecommendError::Other("recommendation service returned no text".into()));
        }
        Ok(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        if hour < 12 {
            TimeOfDay::Morning
        } else if hour < 18 {
            TimeOfDay::Afternoon
        } else {
            TimeOfDay::Evening
        }
    }

    pub fn now() -> Self {
        Self::from_hour(chrono::Local::now().hour())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
        }
    }
}

fn filter_names() -> String {
    FilterId::ALL.iter().map(|f| f.name()).collect::<Vec<_>>().join(", ")
}

/// Single-filter suggestion for the time of day.
pub fn filter_prompt(time: TimeOfDay) -> String {
    format!(
        "You are a photography and filter expert. Suggest ONE of the best filters from this list \
         for a webcam photo during the {}:\n\n\
         Available filters: {}.\n\n\
         Respond with ONLY the filter name and one brief sentence explaining why it's good for \
         this time of day. Keep it under 30 words.",
        time.as_str(),
        filter_names()
    )
}

/// Appearance analysis sent together with a clean frame.
pub fn vision_prompt() -> String {
    format!(
        "You are an expert in photography, skin tones, and visual aesthetics. Analyze this \
         person's appearance in the webcam photo and provide personalized filter recommendations.\n\n\
         Available filters: {}.\n\n\
         Please analyze:\n\
         1. Skin tone and undertones (warm/cool/neutral)\n\
         2. Current lighting conditions\n\
         3. Which 3 filters would look BEST on this person\n\n\
         Respond in this format:\n\
         **Skin Analysis:** [Brief 1-sentence analysis of skin tone and lighting]\n\
         **Top 3 Recommended Filters:**\n\
         1. [Filter Name] - [Why it suits them]\n\
         2. [Filter Name] - [Why it suits them]\n\
         3. [Filter Name] - [Why it suits them]\n\n\
         Keep recommendations under 80 words total. Be specific and helpful.",
        filter_names()
    )
}

/// JPEG-encode a frame and base64 it for the request body.
pub fn encode_frame(frame: &RgbaImage) -> Result<String, CaptureError> {
    Ok(STANDARD.encode(capture::encode_jpeg(frame)?))
}

/// Run one request on the blocking pool.
pub async fn request(
    recommender: Arc<dyn Recommender>,
    prompt: String,
    image: Option<String>,
) -> Result<String, RecommendError> {
    let result = tokio::task::spawn_blocking(move || recommender.generate(&prompt, image.as_deref()))
        .await
        .map_err(|e| RecommendError::Other(format!("request task failed: {e}")))?;

    match &result {
        Ok(text) => tracing::info!(chars = text.len(), "recommendation received"),
        Err(e) => tracing::warn!(error = %e, "recommendation failed"),
    }
    result
}
