//! Agent runtime used by the chat relay.
//!
//! The runtime owns conversation state and model invocation. Callers open a
//! live session, push user content into its [`LiveRequestQueue`] and consume
//! [`AgentEvent`]s from the returned stream. [`Runner`] is the default
//! implementation, driving a persona tree from the `personas` crate against
//! any [`GenerativeModel`].

pub mod content;
pub mod error;
pub mod event;
pub mod gemini;
pub mod model;
pub mod queue;
pub mod runner;
pub mod session;

pub use content::{Content, FunctionCall, FunctionResponse, Part, Role};
pub use error::{ModelError, RuntimeError};
pub use event::AgentEvent;
pub use gemini::GeminiClient;
pub use model::{
    FunctionDeclaration, GenerateRequest, GenerativeModel, Modality, ModelStream, RunConfig,
    ToolDeclaration,
};
pub use queue::{LiveRequestQueue, LiveRequestReceiver};
pub use runner::{AgentRuntime, EventStream, LiveSession, Runner, RunnerBuilder};
pub use session::{Session, SessionService};

pub const DEFAULT_MAX_MODEL_ROUNDS: usize = 8;
