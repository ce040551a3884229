use crate::error::{ChatError, Result};
use crate::models::{Message, Profile, Role};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

// Alias for the stream of text fragments we return
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const THOROUGH_INSTRUCTION: &str = "You are Xantium AI, a wise and empathetic counselor. Your purpose is to provide deep analysis, ethical reflection, and creative solutions to improve quality of life, foster justice, and guide humanity towards an enlightened future. Your wisdom should be profound yet accessible, reflecting the principles of the Xantium-Sophia Protocol. You communicate in German.";

const FAST_INSTRUCTION: &str = "You are Xantium AI, a quick and inspiring assistant. Your goal is to provide fast, practical support for everyday tasks, with a focus on sustainability and environmental consciousness. Your answers should be concise, encouraging, and actionable, infused with empathy. You communicate in German.";

/// Interface of a streaming generation backend.
#[async_trait]
pub trait LLMApiProvider: Send + Sync {
    /// Streams the reply to `new_text` (and optional image data URL) given the
    /// prior messages of the session. The history is a read-only snapshot.
    async fn stream_reply(
        &self,
        history: &[Message],
        new_text: &str,
        new_image: Option<&str>,
        profile: Profile,
    ) -> Result<DeltaStream>;
}

// --- Request shape ---

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Part {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
    },
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            thought: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub thinking_config: ThinkingConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: u32,
}

// --- Streaming response shape ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Instructions and reasoning settings selected by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilePreset {
    pub system_instruction: &'static str,
    pub thinking_budget: Option<u32>,
}

impl ProfilePreset {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Thorough => Self {
                system_instruction: THOROUGH_INSTRUCTION,
                thinking_budget: None,
            },
            Profile::Fast => Self {
                system_instruction: FAST_INSTRUCTION,
                thinking_budget: Some(0),
            },
        }
    }
}

/// Splits a `data:<mime>;base64,<payload>` URL into inline data.
pub fn parse_data_url(url: &str) -> Result<InlineData> {
    let invalid = || ChatError::Validation("image is not a base64 data URL".to_string());
    let rest = url.strip_prefix("data:").ok_or_else(invalid)?;
    let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let mime_type = header.strip_suffix(";base64").ok_or_else(invalid)?;
    if mime_type.is_empty() || payload.is_empty() {
        return Err(invalid());
    }
    Ok(InlineData {
        mime_type: mime_type.to_string(),
        data: payload.to_string(),
    })
}

/// Builds the request body: prior turns, then the new user turn with the image
/// (if any) placed before its text.
pub fn build_request(
    history: &[Message],
    new_text: &str,
    new_image: Option<&str>,
    profile: Profile,
) -> Result<GenerateContentRequest> {
    let mut contents: Vec<Content> = history
        .iter()
        .map(|msg| Content {
            role: Some(msg.role.api_name().to_string()),
            parts: vec![Part::text(msg.text.clone())],
        })
        .collect();

    let mut user_parts = Vec::with_capacity(2);
    if let Some(image) = new_image {
        user_parts.push(Part::InlineData {
            inline_data: parse_data_url(image)?,
        });
    }
    user_parts.push(Part::text(new_text));
    contents.push(Content {
        role: Some(Role::User.api_name().to_string()),
        parts: user_parts,
    });

    let preset = ProfilePreset::for_profile(profile);
    Ok(GenerateContentRequest {
        contents,
        system_instruction: SystemInstruction {
            parts: vec![Part::text(preset.system_instruction)],
        },
        generation_config: preset.thinking_budget.map(|budget| GenerationConfig {
            thinking_config: ThinkingConfig {
                thinking_budget: budget,
            },
        }),
    })
}

/// Text of one SSE data payload. `Ok(None)` when the chunk carries no visible text.
fn chunk_text(data: &str) -> Result<Option<String>> {
    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        log::warn!("Failed to parse stream chunk: {} - Data: {}", e, data);
        ChatError::Upstream(format!("malformed stream chunk: {}", e))
    })?;

    if let Some(error) = chunk.error {
        return Err(ChatError::Upstream(format!(
            "API error ({}): {}",
            error.code, error.message
        )));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| match part {
                    Part::Text { text, thought } if thought != Some(true) => Some(text),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

// --- Gemini provider ---

pub struct GeminiProvider {
    client: Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.api_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl LLMApiProvider for GeminiProvider {
    async fn stream_reply(
        &self,
        history: &[Message],
        new_text: &str,
        new_image: Option<&str>,
        profile: Profile,
    ) -> Result<DeltaStream> {
        let request_body = build_request(history, new_text, new_image, profile)?;
        log::info!(
            "Sending stream request to {} using model {} ({} prior turns, {} profile)",
            self.api_url,
            self.model,
            history.len(),
            profile
        );

        let response = self
            .client
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("failed to send stream request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Stream request failed with status {}: {}", status, error_body);
            return Err(ChatError::Upstream(format!(
                "stream request failed with status {}: {}",
                status, error_body
            )));
        }

        let delta_stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event_result| async move {
                let event = match event_result {
                    Ok(event) => event,
                    Err(e) => {
                        log::error!("Error reading stream event: {}", e);
                        return Some(Err(ChatError::Transport(format!(
                            "error reading stream event: {}",
                            e
                        ))));
                    }
                };
                let data = event.data.trim();
                if data.is_empty() {
                    return None;
                }
                chunk_text(data).transpose()
            });

        Ok(Box::pin(delta_stream))
    }
}
