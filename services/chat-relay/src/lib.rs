//! WebSocket relay between browser clients and an [`AgentRuntime`].
//!
//! Each connection to `/ws/{session_id}` gets one live runtime session and
//! two pumps: client text frames go into the session's request queue, runtime
//! events come back as JSON frames (see [`frames::OutboundFrame`]).
//!
//! [`AgentRuntime`]: agent_runtime::AgentRuntime

pub mod config;
pub mod error;
pub mod frames;
pub mod registry;
pub mod relay;
pub mod server;

pub use config::RelayConfig;
pub use error::RelayError;
pub use frames::OutboundFrame;
pub use registry::{Presence, SessionRegistry};
pub use relay::{run_session, PumpExit, PumpOutcome, SessionReport};
pub use server::{router, serve, AppState};
