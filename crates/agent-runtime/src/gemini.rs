//! Gemini REST client speaking `streamGenerateContent` over server-sent events.

use std::env;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::content::Content;
use crate::error::ModelError;
use crate::model::{GenerateRequest, GenerativeModel, ModelStream, ToolDeclaration};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Reads `GOOGLE_API_KEY` (or `GEMINI_API_KEY`) and an optional
    /// `GEMINI_API_BASE` override.
    pub fn from_env() -> Result<Self, ModelError> {
        let api_key = env::var("GOOGLE_API_KEY")
            .or_else(|_| env::var("GEMINI_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ModelError::Config("set GOOGLE_API_KEY or GEMINI_API_KEY".to_string())
            })?;
        let client = Self::new(api_key);
        Ok(match env::var("GEMINI_API_BASE") {
            Ok(base) if !base.trim().is_empty() => client.with_base_url(base),
            _ => client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ModelStream, ModelError> {
        let url = self.endpoint(&request.model);
        debug!(model = %request.model, contents = request.contents.len(), "calling gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "gemini request rejected");
            return Err(ModelError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let contents = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => decode_chunk(&event.data).transpose(),
                    Err(EventStreamError::Transport(err)) => Some(Err(ModelError::Transport(err))),
                    Err(err) => Some(Err(ModelError::Decode(err.to_string()))),
                }
            })
            .boxed();
        Ok(contents)
    }
}

fn request_body(request: &GenerateRequest) -> Value {
    let mut body = json!({
        "contents": request.contents,
        "generationConfig": {
            "responseModalities": request.response_modalities,
        },
    });
    if let Some(instruction) = &request.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| match tool {
                ToolDeclaration::GoogleSearch => json!({ "googleSearch": {} }),
                ToolDeclaration::Functions(functions) => json!({
                    "functionDeclarations": functions
                        .iter()
                        .map(|f| json!({
                            "name": f.name,
                            "description": f.description,
                            "parameters": f.parameters,
                        }))
                        .collect::<Vec<_>>(),
                }),
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    body
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Decodes one SSE `data` payload. Chunks without usable parts yield `None`.
fn decode_chunk(data: &str) -> Result<Option<Content>, ModelError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|err| ModelError::Decode(err.to_string()))?;
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(None);
    };
    if let Some(reason) = &candidate.finish_reason {
        debug!(%reason, "gemini candidate finished");
    }
    Ok(candidate.content.and_then(|mut content| {
        content.parts.retain(|part| {
            part.text.is_some() || part.function_call.is_some() || part.function_response.is_some()
        });
        (!content.is_empty()).then_some(content)
    }))
}
