//! sb-runtime: episode orchestration between the simulation tick and the
//! agent connection.

pub mod commands;
pub mod episode;
pub mod link;
pub mod orchestrator;
mod worker;

pub use commands::SimCommand;
pub use episode::{detect_terminal, is_fresh_episode, EpisodeState, EpisodeTracker, EpisodeUpdate};
pub use link::{client_options, init_request, AgentLink};
pub use orchestrator::{
    EpisodeSummary, Orchestrator, OrchestratorConfig, OrchestratorStats, RuntimeError, SkipReason,
    TickReport,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
