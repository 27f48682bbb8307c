//! The per-fight strategy the orchestrator drives.

use sb_core::{ActionVariant, BossState, HeroState, Observation, ObservationLayout};

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalCause {
    HeroDied,
    BossDied,
    /// Counts as a hero loss for reward purposes.
    HeroStuck,
}

impl TerminalCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalCause::HeroDied => "hero_died",
            TerminalCause::BossDied => "boss_died",
            TerminalCause::HeroStuck => "hero_stuck",
        }
    }

    pub fn is_hero_loss(&self) -> bool {
        matches!(self, TerminalCause::HeroDied | TerminalCause::HeroStuck)
    }
}

/// One boss fight: identity, observation shape, reward and stuck detection.
///
/// Selected once at startup and never swapped while an orchestrator runs.
pub trait EncounterCapability: Send {
    /// Config-facing key.
    fn key(&self) -> &str;

    /// In-simulation boss name announced to the agent.
    fn boss_name(&self) -> &str;

    fn matches_boss(&self, boss: &BossState) -> bool {
        boss.name == self.boss_name()
    }

    fn action_variant(&self) -> ActionVariant;

    fn layout(&self) -> ObservationLayout;

    /// `None` if either entity is unavailable or the visual cache is empty.
    fn extract_observation(
        &self,
        hero: Option<&HeroState>,
        boss: Option<&BossState>,
    ) -> Option<Observation>;

    /// Terminal causes short-circuit every other term; a missing or short
    /// observation yields 0.
    fn compute_reward(
        &self,
        prev: Option<&Observation>,
        curr: Option<&Observation>,
        terminal: Option<TerminalCause>,
    ) -> f32;

    fn is_hero_stuck(&self, hero: &HeroState) -> bool;

    /// Drop any cached visual frame (called when a reset is requested).
    fn clear_visual_cache(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuck_counts_as_hero_loss() {
        assert!(TerminalCause::HeroDied.is_hero_loss());
        assert!(TerminalCause::HeroStuck.is_hero_loss());
        assert!(!TerminalCause::BossDied.is_hero_loss());
        assert_eq!(TerminalCause::HeroStuck.as_str(), "hero_stuck");
    }
}
