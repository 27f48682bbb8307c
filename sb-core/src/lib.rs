//! sb-core: Shared types for the boss-fight RL bridge.
//!
//! Configuration, world snapshots, observations and the action codec.

pub mod action;
pub mod arena;
pub mod config;
pub mod observation;
pub mod world;

pub use action::{
    decode_action, encode_action, Action, ActionCodecError, ActionVariant, Horizontal, Vertical,
};
pub use arena::{ArenaBounds, ArenaSpec, RewardWeights, VisualSpec};
pub use config::{Config, ConfigError};
pub use observation::{Observation, ObservationKind, ObservationLayout};
pub use world::{BossState, HeroState, Vec2, WorldSnapshot};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
