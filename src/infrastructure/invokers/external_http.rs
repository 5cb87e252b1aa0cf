use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::domain::agent::ExternalModel;
use crate::engine::invoker::{
    InvocationError, InvocationOutput, InvocationRequest, ModelInvoker, ProgressEvent,
    ProgressSender,
};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const SYSTEM_ACK: &str = "Understood. I will follow these instructions.";

/// Invoker for agents whose model is `external:<provider>:<model>`.
///
/// Calls the provider's HTTP API directly. Only `gemini` is supported. The
/// call is single-turn: external models keep no session and use no tools.
pub struct ExternalHttpInvoker {
    client: reqwest::Client,
    gemini_api_key: Option<String>,
    gemini_base_url: String,
}

impl ExternalHttpInvoker {
    pub fn new(gemini_api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            gemini_api_key: gemini_api_key.filter(|key| !key.trim().is_empty()),
            gemini_base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_gemini_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.gemini_base_url = base_url.into();
        self
    }

    async fn gemini(
        &self,
        model: &str,
        request: &InvocationRequest,
        progress: &ProgressSender,
    ) -> Result<InvocationOutput, InvocationError> {
        let api_key = self.gemini_api_key.as_deref().ok_or_else(|| {
            InvocationError::Unavailable("GEMINI_API_KEY is not set".to_string())
        })?;

        // The key travels in the URL, so errors are reported without it
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.gemini_base_url.trim_end_matches('/'),
            model,
            api_key
        );
        let body = gemini_body(&request.config.system_prompt, &request.prompt);
        let _ = progress.send(ProgressEvent::Other(format!("calling gemini model {}", model)));

        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                InvocationError::Unavailable(format!("Gemini request failed: {}", e.without_url()))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("Gemini returned HTTP {}: {}", status.as_u16(), error_text.trim());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                InvocationError::Unavailable(message)
            } else {
                InvocationError::Model(message)
            });
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            InvocationError::Malformed(format!(
                "Failed to parse Gemini response: {}",
                e.without_url()
            ))
        })?;
        let text = parsed.text().ok_or_else(|| {
            InvocationError::Malformed("Gemini response has no candidate text".to_string())
        })?;

        Ok(InvocationOutput {
            text,
            session_id: None,
            cost_usd: None,
            turns_used: Some(1),
        })
    }
}

#[async_trait]
impl ModelInvoker for ExternalHttpInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
        progress: ProgressSender,
    ) -> Result<InvocationOutput, InvocationError> {
        let external = ExternalModel::parse(&request.config.model)
            .map_err(InvocationError::Unavailable)?
            .ok_or_else(|| {
                InvocationError::Unavailable(format!(
                    "Model '{}' is not an external model",
                    request.config.model
                ))
            })?;

        tracing::info!(
            agent_id = %request.config.id,
            task_id = %request.task_id,
            provider = %external.provider,
            model = %external.model,
            "Calling external model"
        );
        if request.session_id.is_some() {
            tracing::debug!("External models keep no session, starting fresh");
        }

        let output = match external.provider.as_str() {
            "gemini" => self.gemini(&external.model, &request, &progress).await?,
            other => {
                return Err(InvocationError::Unavailable(format!(
                    "Unsupported external provider '{}'",
                    other
                )))
            }
        };

        tracing::info!(
            agent_id = %request.config.id,
            task_id = %request.task_id,
            "External model response received"
        );
        Ok(output)
    }
}

/// The system prompt goes first as an acknowledged user turn
fn gemini_body(system_prompt: &str, prompt: &str) -> Value {
    let mut contents = Vec::new();
    if !system_prompt.trim().is_empty() {
        contents.push(json!({
            "role": "user",
            "parts": [{ "text": format!("[System Instructions]\n{}", system_prompt) }]
        }));
        contents.push(json!({
            "role": "model",
            "parts": [{ "text": SYSTEM_ACK }]
        }));
    }
    contents.push(json!({
        "role": "user",
        "parts": [{ "text": prompt }]
    }));
    json!({ "contents": contents })
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiResponse {
    /// Text parts of the first candidate, concatenated
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}
