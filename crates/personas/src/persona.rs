use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Tools provided natively by the model service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinTool {
    GoogleSearch,
}

impl BuiltinTool {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTool::GoogleSearch => "google_search",
        }
    }
}

/// Tool entry of a [`PersonaSpec`]. Agent tools refer to other personas by name
/// and are resolved when the registry is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSpec {
    Builtin { tool: BuiltinTool },
    Agent { agent: String },
}

impl ToolSpec {
    pub fn google_search() -> Self {
        ToolSpec::Builtin {
            tool: BuiltinTool::GoogleSearch,
        }
    }

    pub fn agent(name: impl Into<String>) -> Self {
        ToolSpec::Agent { agent: name.into() }
    }

    pub(crate) fn delegate(&self) -> Option<&str> {
        match self {
            ToolSpec::Agent { agent } => Some(agent.as_str()),
            ToolSpec::Builtin { .. } => None,
        }
    }
}

/// Unresolved persona definition, as written in code or loaded from a catalog
/// file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonaSpec {
    pub name: String,
    pub model: String,
    pub instruction: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub sub_agents: Vec<String>,
}

impl PersonaSpec {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instruction: String::new(),
            description: String::new(),
            tools: Vec::new(),
            sub_agents: Vec::new(),
        }
    }

    /// Sets the system instruction, trimmed at both ends. Write multi-line
    /// instructions with `indoc!` to keep source indentation out of them.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into().trim().to_string();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn sub_agent(mut self, name: impl Into<String>) -> Self {
        self.sub_agents.push(name.into());
        self
    }

    /// Names of every persona this one may hand work to.
    pub fn delegates(&self) -> impl Iterator<Item = &str> {
        self.tools
            .iter()
            .filter_map(ToolSpec::delegate)
            .chain(self.sub_agents.iter().map(String::as_str))
    }
}

/// Resolved, immutable persona.
#[derive(Debug)]
pub struct Persona {
    name: String,
    model: String,
    instruction: String,
    description: String,
    tools: Vec<Tool>,
    sub_agents: Vec<Arc<Persona>>,
}

#[derive(Debug, Clone)]
pub enum Tool {
    Builtin(BuiltinTool),
    Agent(Arc<Persona>),
}

impl Tool {
    pub fn name(&self) -> &str {
        match self {
            Tool::Builtin(tool) => tool.name(),
            Tool::Agent(persona) => persona.name(),
        }
    }
}

impl Persona {
    pub(crate) fn from_parts(spec: &PersonaSpec, tools: Vec<Tool>, sub_agents: Vec<Arc<Persona>>) -> Self {
        Self {
            name: spec.name.clone(),
            model: spec.model.clone(),
            instruction: spec.instruction.clone(),
            description: spec.description.clone(),
            tools,
            sub_agents,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn sub_agents(&self) -> &[Arc<Persona>] {
        &self.sub_agents
    }

    /// Looks up a persona exposed to this one as an agent tool.
    pub fn agent_tool(&self, name: &str) -> Option<&Arc<Persona>> {
        self.tools.iter().find_map(|tool| match tool {
            Tool::Agent(persona) if persona.name() == name => Some(persona),
            _ => None,
        })
    }

    pub fn builtin_tools(&self) -> impl Iterator<Item = BuiltinTool> + '_ {
        self.tools.iter().filter_map(|tool| match tool {
            Tool::Builtin(builtin) => Some(*builtin),
            Tool::Agent(_) => None,
        })
    }

    pub fn agent_tools(&self) -> impl Iterator<Item = &Arc<Persona>> + '_ {
        self.tools.iter().filter_map(|tool| match tool {
            Tool::Agent(persona) => Some(persona),
            Tool::Builtin(_) => None,
        })
    }
}
