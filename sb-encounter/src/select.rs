//! Encounter selection by key or boss name.

use std::sync::Arc;

use log::info;
use sb_core::ArenaSpec;
use thiserror::Error;

use crate::arena::ArenaEncounter;
use crate::capability::EncounterCapability;
use crate::frames::FrameSource;

#[derive(Debug, Error)]
pub enum EncounterError {
    #[error("unknown encounter '{name}' (known: {known})")]
    Unknown { name: String, known: String },
    #[error("invalid arena {0}")]
    InvalidArena(String),
    #[error("encounter '{0}' uses a visual observation but no frame source was supplied")]
    MissingFrameSource(String),
    #[error("frame source is {got:?}, encounter expects {expected:?}")]
    FrameSize {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

/// Built-in presets.
pub fn builtin_arenas() -> Vec<ArenaSpec> {
    vec![ArenaSpec::savage_beastfly()]
}

/// Resolve `name` against the configured arenas first, then the presets.
pub fn find_arena(name: &str, custom: &[ArenaSpec]) -> Option<ArenaSpec> {
    custom
        .iter()
        .find(|a| a.matches_key(name))
        .cloned()
        .or_else(|| builtin_arenas().into_iter().find(|a| a.matches_key(name)))
}

/// Build the single active encounter for this process.
pub fn select_encounter(
    name: &str,
    custom: &[ArenaSpec],
    frames: Option<Arc<dyn FrameSource>>,
) -> Result<Box<dyn EncounterCapability>, EncounterError> {
    let spec = find_arena(name, custom).ok_or_else(|| EncounterError::Unknown {
        name: name.to_string(),
        known: custom
            .iter()
            .map(|a| a.key.clone())
            .chain(builtin_arenas().into_iter().map(|a| a.key))
            .collect::<Vec<_>>()
            .join(", "),
    })?;
    let enc = ArenaEncounter::new(spec, frames)?;
    let layout = enc.layout();
    info!(
        "selected encounter '{}' (boss '{}', {} observation of {} values)",
        enc.key(),
        enc.boss_name(),
        layout.kind().as_str(),
        layout.total_len()
    );
    Ok(Box::new(enc))
}
