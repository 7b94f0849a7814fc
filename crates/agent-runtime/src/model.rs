use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use personas::{BuiltinTool, Persona};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::content::{Content, Role};
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Audio,
}

/// Per-session generation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub response_modalities: Vec<Modality>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            response_modalities: vec![Modality::Text],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolDeclaration {
    GoogleSearch,
    Functions(Vec<FunctionDeclaration>),
}

/// One model invocation for a single persona.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    pub tools: Vec<ToolDeclaration>,
    pub response_modalities: Vec<Modality>,
}

impl GenerateRequest {
    /// Builds the request for `persona`. Every persona it may delegate to is
    /// declared as a function taking a single `request` string.
    pub fn for_persona(persona: &Persona, contents: Vec<Content>, config: &RunConfig) -> Self {
        let mut tools: Vec<ToolDeclaration> = persona
            .builtin_tools()
            .map(|tool| match tool {
                BuiltinTool::GoogleSearch => ToolDeclaration::GoogleSearch,
            })
            .collect();

        let mut functions: Vec<FunctionDeclaration> = Vec::new();
        for delegate in persona.agent_tools().chain(persona.sub_agents().iter()) {
            if functions.iter().any(|f| f.name == delegate.name()) {
                continue;
            }
            functions.push(FunctionDeclaration {
                name: delegate.name().to_string(),
                description: delegate.description().to_string(),
                parameters: delegate_parameters(),
            });
        }
        if !functions.is_empty() {
            tools.push(ToolDeclaration::Functions(functions));
        }

        let instruction = persona.instruction();
        Self {
            model: persona.model().to_string(),
            system_instruction: (!instruction.is_empty()).then(|| instruction.to_string()),
            contents,
            tools,
            response_modalities: config.response_modalities.clone(),
        }
    }
}

fn delegate_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "request": {
                "type": "string",
                "description": "The task to hand to this agent."
            }
        },
        "required": ["request"]
    })
}

pub type ModelStream = BoxStream<'static, Result<Content, ModelError>>;

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Starts a streaming generation. Each item is an incremental chunk.
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ModelStream, ModelError>;

    async fn generate(&self, request: GenerateRequest) -> Result<Content, ModelError> {
        let mut stream = self.stream_generate(request).await?;
        let mut reply = Content::new(Role::Model, Vec::new());
        while let Some(chunk) = stream.next().await {
            reply.merge(chunk?);
        }
        Ok(reply)
    }
}
