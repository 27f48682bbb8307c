//! Snapshots of the live simulation handed to the bridge once per tick.
//!
//! Discovery of the entities is the simulation's business; the bridge only
//! sees "the hero" and "the currently active boss", either of which may be
//! momentarily absent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeroState {
    pub position: Vec2,
    #[serde(default)]
    pub velocity: Vec2,
    pub health: i32,
    #[serde(default)]
    pub facing_right: bool,
    #[serde(default)]
    pub dashing: bool,
    #[serde(default)]
    pub sprinting: bool,
    #[serde(default)]
    pub attacking: bool,
    #[serde(default)]
    pub jumping: bool,
    #[serde(default)]
    pub recoiling: bool,
    #[serde(default)]
    pub invulnerable: bool,
}

impl HeroState {
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BossState {
    /// In-simulation entity name, used for identity matching.
    pub name: String,
    pub position: Vec2,
    #[serde(default)]
    pub velocity: Vec2,
    pub hp: i32,
}

impl BossState {
    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }
}

/// Everything the orchestrator needs from the simulation for one fixed tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Simulation (fixed-step) time in seconds; unaffected by frame rate.
    pub fixed_time: f64,
    #[serde(default)]
    pub hero: Option<HeroState>,
    #[serde(default)]
    pub boss: Option<BossState>,
}

impl WorldSnapshot {
    pub fn new(fixed_time: f64, hero: Option<HeroState>, boss: Option<BossState>) -> Self {
        Self {
            fixed_time,
            hero,
            boss,
        }
    }
}
