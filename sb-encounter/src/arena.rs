//! Data-driven encounter over an [`ArenaSpec`].

use std::sync::Arc;

use log::debug;
use sb_core::observation::{flag, scale_symmetric, scale_unit, unscale_unit};
use sb_core::{
    ActionVariant, ArenaSpec, BossState, HeroState, Observation, ObservationLayout, Vec2,
};

use crate::capability::{EncounterCapability, TerminalCause};
use crate::frames::FrameSource;
use crate::schema::*;
use crate::select::EncounterError;

pub struct ArenaEncounter {
    spec: ArenaSpec,
    layout: ObservationLayout,
    frames: Option<Arc<dyn FrameSource>>,
}

impl std::fmt::Debug for ArenaEncounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaEncounter")
            .field("key", &self.spec.key)
            .field("layout", &self.layout)
            .field("has_frames", &self.frames.is_some())
            .finish()
    }
}

impl ArenaEncounter {
    /// Hybrid arenas need a frame source of matching dimensions; vector-only
    /// arenas ignore `frames`.
    pub fn new(
        spec: ArenaSpec,
        frames: Option<Arc<dyn FrameSource>>,
    ) -> Result<Self, EncounterError> {
        validate(&spec)?;
        let (layout, frames) = match spec.visual {
            None => (ObservationLayout::vector(VECTOR_LEN), None),
            Some(v) => {
                let src = frames.ok_or_else(|| EncounterError::MissingFrameSource(spec.key.clone()))?;
                if src.dimensions() != (v.width, v.height) {
                    return Err(EncounterError::FrameSize {
                        expected: (v.width, v.height),
                        got: src.dimensions(),
                    });
                }
                (ObservationLayout::hybrid(VECTOR_LEN, v.width, v.height), Some(src))
            }
        };
        Ok(Self {
            spec,
            layout,
            frames,
        })
    }

    pub fn spec(&self) -> &ArenaSpec {
        &self.spec
    }

    /// The 17-field vector part.
    pub fn vector_observation(&self, hero: &HeroState, boss: &BossState) -> [f32; VECTOR_LEN] {
        let s = &self.spec;
        let b = &s.bounds;
        let mut out = [0.0f32; VECTOR_LEN];

        out[HERO_X] = scale_unit(hero.position.x, b.min_x, b.max_x);
        out[HERO_Y] = scale_unit(hero.position.y, b.min_y, b.max_y);
        out[HERO_VX] = scale_symmetric(hero.velocity.x, s.max_hero_velocity);
        out[HERO_VY] = scale_symmetric(hero.velocity.y, s.max_hero_velocity);
        out[HERO_HP] = scale_unit(hero.health as f32, 0.0, s.max_hero_hp);

        out[BOSS_X] = scale_unit(boss.position.x, b.min_x, b.max_x);
        out[BOSS_Y] = scale_unit(boss.position.y, b.min_y, b.max_y);
        out[BOSS_VX] = scale_symmetric(boss.velocity.x, s.max_boss_velocity);
        out[BOSS_VY] = scale_symmetric(boss.velocity.y, s.max_boss_velocity);
        out[BOSS_HP] = scale_unit(boss.hp as f32, 0.0, s.max_boss_hp);

        let flags = [
            hero.facing_right,
            hero.dashing,
            hero.sprinting,
            hero.attacking,
            hero.jumping,
            hero.recoiling,
            hero.invulnerable,
        ];
        for (i, f) in flags.into_iter().enumerate() {
            out[HERO_FLAGS + i] = flag(f);
        }
        out
    }

    fn world_position(&self, obs: &[f32], xi: usize, yi: usize) -> Vec2 {
        let b = &self.spec.bounds;
        Vec2::new(
            unscale_unit(obs[xi], b.min_x, b.max_x),
            unscale_unit(obs[yi], b.min_y, b.max_y),
        )
    }

    fn shaped_reward(&self, p: &[f32], c: &[f32]) -> f32 {
        let s = &self.spec;
        let w = &s.reward;

        let boss_loss = (p[BOSS_HP] - c[BOSS_HP]) * s.max_boss_hp;
        let hero_loss = (p[HERO_HP] - c[HERO_HP]) * s.max_hero_hp;
        let mut reward = boss_loss * w.boss_damage - hero_loss * w.hero_damage;

        let prev_dist = self
            .world_position(p, HERO_X, HERO_Y)
            .distance(self.world_position(p, BOSS_X, BOSS_Y));
        let curr_dist = self
            .world_position(c, HERO_X, HERO_Y)
            .distance(self.world_position(c, BOSS_X, BOSS_Y));

        // Closing in only counts while not trading hits.
        if hero_loss == 0.0 {
            reward += (prev_dist - curr_dist) * w.distance_closing;
        }
        if curr_dist > w.disengage_distance {
            reward -= w.disengage_penalty;
        }
        reward + w.survival_bonus
    }
}

fn validate(spec: &ArenaSpec) -> Result<(), EncounterError> {
    let b = &spec.bounds;
    let problem = if !positive(b.max_x - b.min_x) || !positive(b.max_y - b.min_y) {
        Some("bounds must have max > min")
    } else if !positive(spec.max_hero_hp) || !positive(spec.max_boss_hp) {
        Some("max hp must be > 0")
    } else if !positive(spec.max_hero_velocity) || !positive(spec.max_boss_velocity) {
        Some("max velocity must be > 0")
    } else if spec.visual.is_some_and(|v| v.width == 0 || v.height == 0) {
        Some("visual size must be non-zero")
    } else {
        None
    };
    match problem {
        Some(what) => Err(EncounterError::InvalidArena(format!("{}: {what}", spec.key))),
        None => Ok(()),
    }
}

/// False for NaN.
fn positive(v: f32) -> bool {
    v > 0.0
}

impl EncounterCapability for ArenaEncounter {
    fn key(&self) -> &str {
        &self.spec.key
    }

    fn boss_name(&self) -> &str {
        &self.spec.boss_name
    }

    fn action_variant(&self) -> ActionVariant {
        self.spec.action_variant
    }

    fn layout(&self) -> ObservationLayout {
        self.layout
    }

    fn extract_observation(
        &self,
        hero: Option<&HeroState>,
        boss: Option<&BossState>,
    ) -> Option<Observation> {
        let (hero, boss) = (hero?, boss?);
        let vector = self.vector_observation(hero, boss);

        let Some(frames) = &self.frames else {
            return Some(Observation::new(vector.to_vec()));
        };
        let frame = frames.cached_frame()?;
        if frame.len() != self.layout.visual_len() {
            debug!(
                "cached frame has {} values, expected {}",
                frame.len(),
                self.layout.visual_len()
            );
            return None;
        }
        let mut values = Vec::with_capacity(self.layout.total_len());
        values.extend_from_slice(&vector);
        values.extend_from_slice(&frame);
        Some(Observation::new(values))
    }

    fn compute_reward(
        &self,
        prev: Option<&Observation>,
        curr: Option<&Observation>,
        terminal: Option<TerminalCause>,
    ) -> f32 {
        if let Some(cause) = terminal {
            return if cause.is_hero_loss() {
                self.spec.reward.hero_death
            } else {
                self.spec.reward.boss_death
            };
        }
        let (Some(p), Some(c)) = (prev, curr) else {
            return 0.0;
        };
        let n = self.layout.total_len();
        if p.len() != n || c.len() != n {
            return 0.0;
        }
        self.shaped_reward(p.as_slice(), c.as_slice())
    }

    fn is_hero_stuck(&self, hero: &HeroState) -> bool {
        self.spec
            .stuck_floor_y
            .is_some_and(|floor| hero.position.y < floor)
    }

    fn clear_visual_cache(&self) {
        if let Some(f) = &self.frames {
            f.clear_cache();
        }
    }
}
