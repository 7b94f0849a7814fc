use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::persona::{Persona, PersonaSpec, Tool, ToolSpec};
use crate::MAX_DELEGATION_DEPTH;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("persona `{0}` is defined more than once")]
    DuplicatePersona(String),
    #[error("no root persona was designated")]
    MissingRoot,
    #[error("root persona `{0}` is not defined")]
    UnknownRoot(String),
    #[error("persona `{persona}` delegates to undefined persona `{delegate}`")]
    UnknownDelegate { persona: String, delegate: String },
    #[error("delegation cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("delegation depth {depth} exceeds the maximum of {max}")]
    TooDeep { depth: usize, max: usize },
    #[error("persona `{0}` has neither tools nor sub-agents")]
    NoTools(String),
    #[error("persona `{persona}` has an empty {field}")]
    EmptyField { persona: String, field: &'static str },
    #[error("persona `{0}` is not reachable from the root persona")]
    Unreachable(String),
    #[error("failed to load persona catalog {path}: {message}")]
    Load { path: String, message: String },
}

/// Collects persona specs and resolves them into a [`PersonaRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    specs: Vec<PersonaSpec>,
    root: Option<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, spec: PersonaSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn extend(mut self, specs: impl IntoIterator<Item = PersonaSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn root(mut self, name: impl Into<String>) -> Self {
        self.root = Some(name.into());
        self
    }

    pub fn build(self) -> Result<PersonaRegistry, RegistryError> {
        let root = self.root.ok_or(RegistryError::MissingRoot)?;

        let mut specs: IndexMap<String, PersonaSpec> = IndexMap::new();
        for spec in self.specs {
            validate_fields(&spec)?;
            if specs.contains_key(&spec.name) {
                return Err(RegistryError::DuplicatePersona(spec.name));
            }
            specs.insert(spec.name.clone(), spec);
        }

        for spec in specs.values() {
            for delegate in spec.delegates() {
                if !specs.contains_key(delegate) {
                    return Err(RegistryError::UnknownDelegate {
                        persona: spec.name.clone(),
                        delegate: delegate.to_string(),
                    });
                }
            }
        }

        if !specs.contains_key(&root) {
            return Err(RegistryError::UnknownRoot(root));
        }

        let mut depths = HashMap::new();
        let mut path = Vec::new();
        let depth = walk(&specs, &root, &mut path, &mut depths)?;

        if let Some(orphan) = specs.keys().find(|name| !depths.contains_key(name.as_str())) {
            return Err(RegistryError::Unreachable(orphan.clone()));
        }

        let mut resolved = HashMap::new();
        let root_persona = resolve(&specs, &root, &mut resolved);
        let personas = specs
            .keys()
            .filter_map(|name| resolved.get(name).map(|p| (name.clone(), Arc::clone(p))))
            .collect::<IndexMap<_, _>>();

        debug!(root = %root, personas = personas.len(), depth, "persona registry built");

        Ok(PersonaRegistry {
            root: root_persona,
            personas,
            depth,
        })
    }
}

/// Validated delegation tree with a single root persona.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    root: Arc<Persona>,
    personas: IndexMap<String, Arc<Persona>>,
    depth: usize,
}

impl PersonaRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn root(&self) -> &Arc<Persona> {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Persona>> {
        self.personas.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Length of the longest delegation chain, root included.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

fn validate_fields(spec: &PersonaSpec) -> Result<(), RegistryError> {
    let blank = |field: &'static str| RegistryError::EmptyField {
        persona: spec.name.clone(),
        field,
    };
    if spec.name.trim().is_empty() {
        return Err(blank("name"));
    }
    if spec.model.trim().is_empty() {
        return Err(blank("model"));
    }
    if spec.instruction.trim().is_empty() {
        return Err(blank("instruction"));
    }
    if spec.tools.is_empty() && spec.sub_agents.is_empty() {
        return Err(RegistryError::NoTools(spec.name.clone()));
    }
    Ok(())
}

/// Depth-first walk that rejects cycles and chains longer than
/// [`MAX_DELEGATION_DEPTH`], returning the depth of `name` including itself.
///
/// `depths` memoizes finished personas, so shared delegates are walked once
/// and every reachable persona ends up in it. The walk stops as soon as the
/// current chain is too long.
fn walk<'a>(
    specs: &'a IndexMap<String, PersonaSpec>,
    name: &'a str,
    path: &mut Vec<&'a str>,
    depths: &mut HashMap<&'a str, usize>,
) -> Result<usize, RegistryError> {
    if let Some(start) = path.iter().position(|seen| *seen == name) {
        let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
        cycle.push(name.to_string());
        return Err(RegistryError::Cycle(cycle));
    }

    let too_deep = |depth: usize| RegistryError::TooDeep {
        depth,
        max: MAX_DELEGATION_DEPTH,
    };
    if let Some(&below) = depths.get(name) {
        let depth = path.len() + below;
        return if depth > MAX_DELEGATION_DEPTH {
            Err(too_deep(depth))
        } else {
            Ok(below)
        };
    }

    path.push(name);
    if path.len() > MAX_DELEGATION_DEPTH {
        return Err(too_deep(path.len()));
    }
    let mut deepest = 0;
    // Delegates were checked to exist before the walk.
    if let Some(spec) = specs.get(name) {
        for delegate in spec.delegates() {
            deepest = deepest.max(walk(specs, delegate, path, depths)?);
        }
    }
    path.pop();
    depths.insert(name, deepest + 1);
    Ok(deepest + 1)
}

fn resolve(
    specs: &IndexMap<String, PersonaSpec>,
    name: &str,
    resolved: &mut HashMap<String, Arc<Persona>>,
) -> Arc<Persona> {
    if let Some(existing) = resolved.get(name) {
        return Arc::clone(existing);
    }

    let spec = &specs[name];
    let tools = spec
        .tools
        .iter()
        .map(|tool| match tool {
            ToolSpec::Builtin { tool } => Tool::Builtin(*tool),
            ToolSpec::Agent { agent } => Tool::Agent(resolve(specs, agent, resolved)),
        })
        .collect();
    let sub_agents = spec
        .sub_agents
        .iter()
        .map(|sub| resolve(specs, sub, resolved))
        .collect();

    let persona = Arc::new(Persona::from_parts(spec, tools, sub_agents));
    resolved.insert(name.to_string(), Arc::clone(&persona));
    persona
}
