//! sb-encounter: per-fight observation, reward and stuck detection, plus the
//! visual frame cache.

pub mod arena;
pub mod capability;
pub mod frames;
pub mod schema;
pub mod select;

pub use arena::ArenaEncounter;
pub use capability::{EncounterCapability, TerminalCause};
pub use frames::{grayscale_downsample, CaptureError, FrameSource, GrayscaleCapture};
pub use schema::VECTOR_LEN;
pub use select::{builtin_arenas, find_arena, select_encounter, EncounterError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod arena_tests;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }
}
