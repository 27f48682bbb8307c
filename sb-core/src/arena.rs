//! Data describing one boss arena: normalization ranges, reward weights and
//! optional visual capture geometry.
//!
//! The numbers are per-fight tunings; the encounter logic that consumes them
//! lives in `sb-encounter`.

use serde::{Deserialize, Serialize};

use crate::action::ActionVariant;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArenaBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualSpec {
    pub width: usize,
    pub height: usize,
    #[serde(default)]
    pub crop_top: usize,
    #[serde(default)]
    pub crop_bottom: usize,
    #[serde(default)]
    pub crop_left: usize,
    #[serde(default)]
    pub crop_right: usize,
}

/// Reward shaping weights.
///
/// Damage terms are per raw HP point; distance terms are in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub hero_death: f32,
    pub boss_death: f32,
    pub boss_damage: f32,
    pub hero_damage: f32,
    pub distance_closing: f32,
    pub disengage_distance: f32,
    pub disengage_penalty: f32,
    pub survival_bonus: f32,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            hero_death: -100.0,
            boss_death: 500.0,
            boss_damage: 2.0,
            hero_damage: 15.0,
            distance_closing: 0.02,
            disengage_distance: 15.0,
            disengage_penalty: 0.05,
            survival_bonus: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaSpec {
    /// Config-facing key (e.g. `Savage_Beastfly`).
    pub key: String,
    /// In-simulation boss entity name used for identity matching.
    pub boss_name: String,
    pub action_variant: ActionVariant,
    pub bounds: ArenaBounds,
    pub max_hero_velocity: f32,
    pub max_boss_velocity: f32,
    pub max_hero_hp: f32,
    pub max_boss_hp: f32,
    #[serde(default)]
    pub visual: Option<VisualSpec>,
    #[serde(default)]
    pub reward: RewardWeights,
    /// Hero y below this counts as stuck (fell out of the arena).
    #[serde(default)]
    pub stuck_floor_y: Option<f32>,
}

impl ArenaSpec {
    pub const SAVAGE_BEASTFLY: &'static str = "Savage_Beastfly";

    /// Savage Beastfly: hybrid observation, extended action space.
    pub fn savage_beastfly() -> Self {
        Self {
            key: Self::SAVAGE_BEASTFLY.to_string(),
            // The in-game entity really is called this.
            boss_name: "Bone Flyer Giant".to_string(),
            action_variant: ActionVariant::Extended,
            bounds: ArenaBounds {
                min_x: 38.0,
                max_x: 65.0,
                min_y: 34.0,
                max_y: 44.0,
            },
            max_hero_velocity: 30.0,
            max_boss_velocity: 30.0,
            max_hero_hp: 10.0,
            max_boss_hp: 550.0,
            visual: Some(VisualSpec {
                width: 84,
                height: 84,
                crop_top: 140,
                crop_bottom: 150,
                crop_left: 60,
                crop_right: 60,
            }),
            reward: RewardWeights::default(),
            stuck_floor_y: None,
        }
    }

    pub fn matches_key(&self, name: &str) -> bool {
        self.key.eq_ignore_ascii_case(name) || self.boss_name == name
    }
}
