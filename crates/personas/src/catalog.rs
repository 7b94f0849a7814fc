//! Built-in personas and JSON catalog loading.

use std::fs;
use std::path::Path;

use indoc::indoc;
use serde::{Deserialize, Serialize};

use crate::persona::{PersonaSpec, ToolSpec};
use crate::registry::{PersonaRegistry, RegistryError};

pub const ROOT_PERSONA: &str = "search_support_agent";

const SEARCH_MODEL: &str = "gemini-2.0-flash-exp";
const REASONING_MODEL: &str = "gemini-2.5-pro-preview-05-06";
const COORDINATOR_MODEL: &str = "gemini-2.0-flash-exp";

/// On-disk persona catalog: a root name plus the personas it may reach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaCatalog {
    pub root: String,
    pub personas: Vec<PersonaSpec>,
}

impl PersonaCatalog {
    pub fn builtin() -> Self {
        Self {
            root: ROOT_PERSONA.to_string(),
            personas: default_specs(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let load_error = |message: String| RegistryError::Load {
            path: path.display().to_string(),
            message,
        };
        let raw = fs::read_to_string(path).map_err(|err| load_error(err.to_string()))?;
        Self::from_json_str(&raw).map_err(|err| load_error(err.to_string()))
    }

    pub fn into_registry(self) -> Result<PersonaRegistry, RegistryError> {
        PersonaRegistry::builder()
            .extend(self.personas)
            .root(self.root)
            .build()
    }
}

/// The search → reasoning → coordinator chain used by the chat app.
pub fn default_specs() -> Vec<PersonaSpec> {
    let search = PersonaSpec::new("search_agent", SEARCH_MODEL)
        .description("Performs searches related to a provided question or topic.")
        .instruction(indoc! {r#"
        You are a research specialist. You receive a topic or question and run a
        Google search for it.

        Use the `google_search` tool for every request, then return the findings
        you gathered to the agent that called you.
        "#})
        .tool(ToolSpec::google_search());

    let reasoning = PersonaSpec::new("reasoning_agent", REASONING_MODEL)
        .description("Performs research related to a provided question or topic.")
        .instruction(indoc! {r#"
        You are a research specialist. You receive a topic or question and return a
        detailed, well-grounded answer.

        Tools:
        1. `search_agent`: request a Google search to ground your answer.

        Workflow:
        1. Read the topic or question you were given.
        2. Call `search_agent` with the question or topic.
        3. Return your detailed answer to the calling agent.
        "#})
        .tool(ToolSpec::agent("search_agent"));

    let coordinator = PersonaSpec::new(ROOT_PERSONA, COORDINATOR_MODEL)
        .description(
            "The main coordinator agent. Handles user requests and delegates tasks to specialist agents.",
        )
        .instruction(indoc! {r#"
        You are the lead support coordinator. Understand the user's question or topic
        and delegate the research to the right specialist.

        Tools:
        1. `reasoning_agent`: give it the user's question or topic; it researches the
           topic and returns a detailed response.

        Workflow:
        1. Greet the user.
        2. Ask at most one or two clarifying questions about the research request.
        3. Once the request is clear, tell the user you are starting the research.
        4. Call `reasoning_agent` with the research request.
        5. Return the full report from `reasoning_agent` exactly as received, without
           summarising it.
        6. Ask the user whether there is anything else you can help with.
        "#})
        .tool(ToolSpec::agent("reasoning_agent"));

    vec![search, reasoning, coordinator]
}

pub fn default_registry() -> Result<PersonaRegistry, RegistryError> {
    PersonaCatalog::builtin().into_registry()
}
