//! Declarative persona definitions for the chat agent.
//!
//! A persona is a named configuration of model, instructions and tools. Tools
//! are either built-in capabilities of the model service or other personas
//! wrapped as invocable tools, which gives a small delegation tree rooted at a
//! single coordinator persona.

pub mod catalog;
pub mod persona;
pub mod registry;

pub use catalog::{default_registry, default_specs, PersonaCatalog, ROOT_PERSONA};
pub use persona::{BuiltinTool, Persona, PersonaSpec, Tool, ToolSpec};
pub use registry::{PersonaRegistry, RegistryBuilder, RegistryError};

/// Maximum delegation depth, counting the root persona as depth 1.
pub const MAX_DELEGATION_DEPTH: usize = 3;
