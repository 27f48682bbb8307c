//! Episode state machine and reset sequence.
//!
//! `Training` → (`HeroDead` | `BossDead` | `HeroStuck`) → `Resetting` →
//! `Training`. Times are simulation seconds.

use log::{info, warn};
use sb_core::config::ResetConfig;
use sb_core::WorldSnapshot;
use sb_encounter::{EncounterCapability, TerminalCause};

use crate::commands::SimCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpisodeState {
    Training,
    HeroDead,
    BossDead,
    HeroStuck,
    Resetting,
}

impl EpisodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeState::Training => "training",
            EpisodeState::HeroDead => "hero_dead",
            EpisodeState::BossDead => "boss_dead",
            EpisodeState::HeroStuck => "hero_stuck",
            EpisodeState::Resetting => "resetting",
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_cause().is_some()
    }

    pub fn terminal_cause(&self) -> Option<TerminalCause> {
        match self {
            EpisodeState::HeroDead => Some(TerminalCause::HeroDied),
            EpisodeState::BossDead => Some(TerminalCause::BossDied),
            EpisodeState::HeroStuck => Some(TerminalCause::HeroStuck),
            EpisodeState::Training | EpisodeState::Resetting => None,
        }
    }

    fn from_cause(cause: TerminalCause) -> Self {
        match cause {
            TerminalCause::HeroDied => EpisodeState::HeroDead,
            TerminalCause::BossDied => EpisodeState::BossDead,
            TerminalCause::HeroStuck => EpisodeState::HeroStuck,
        }
    }
}

/// Result of one [`EpisodeTracker::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeUpdate {
    /// Set on the tick a terminal state is first entered.
    pub entered_terminal: Option<TerminalCause>,
    /// Set on the tick the reset is confirmed.
    pub reset_completed: bool,
    pub command: Option<SimCommand>,
    /// No stepping this tick (terminal, resetting or just reset).
    pub suspend_stepping: bool,
}

/// Hero death wins over boss death, which wins over stuck.
pub fn detect_terminal(world: &WorldSnapshot, enc: &dyn EncounterCapability) -> Option<TerminalCause> {
    if let Some(hero) = &world.hero {
        if !hero.is_alive() {
            return Some(TerminalCause::HeroDied);
        }
    }
    if let Some(boss) = &world.boss {
        if enc.matches_boss(boss) && !boss.is_alive() {
            return Some(TerminalCause::BossDied);
        }
    }
    match &world.hero {
        Some(hero) if enc.is_hero_stuck(hero) => Some(TerminalCause::HeroStuck),
        _ => None,
    }
}

/// A live hero facing a live boss of the active encounter.
pub fn is_fresh_episode(world: &WorldSnapshot, enc: &dyn EncounterCapability) -> bool {
    let hero_ok = world.hero.as_ref().is_some_and(|h| h.is_alive());
    let boss_ok = world
        .boss
        .as_ref()
        .is_some_and(|b| b.is_alive() && enc.matches_boss(b));
    hero_ok && boss_ok
}

#[derive(Debug)]
pub struct EpisodeTracker {
    state: EpisodeState,
    cfg: ResetConfig,
    /// Episodes completed (terminal states entered).
    episode: u64,
    terminal_at: f64,
    reset_started_at: f64,
    last_reset_request_at: f64,
}

impl EpisodeTracker {
    pub fn new(cfg: ResetConfig) -> Self {
        Self {
            state: EpisodeState::Training,
            cfg,
            episode: 0,
            terminal_at: 0.0,
            reset_started_at: 0.0,
            last_reset_request_at: 0.0,
        }
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    /// Number of terminal states entered so far.
    pub fn episodes_ended(&self) -> u64 {
        self.episode
    }

    pub fn update(
        &mut self,
        now: f64,
        world: &WorldSnapshot,
        enc: &dyn EncounterCapability,
    ) -> EpisodeUpdate {
        match self.state {
            EpisodeState::Training => match detect_terminal(world, enc) {
                Some(cause) => {
                    self.state = EpisodeState::from_cause(cause);
                    self.terminal_at = now;
                    self.episode += 1;
                    info!("episode {} ended: {} at t={now:.2}", self.episode, cause.as_str());
                    EpisodeUpdate {
                        entered_terminal: Some(cause),
                        suspend_stepping: true,
                        ..EpisodeUpdate::default()
                    }
                }
                None => EpisodeUpdate::default(),
            },
            EpisodeState::HeroDead | EpisodeState::BossDead | EpisodeState::HeroStuck => {
                let mut u = EpisodeUpdate {
                    suspend_stepping: true,
                    ..EpisodeUpdate::default()
                };
                if now - self.terminal_at >= self.cfg.settle_s {
                    self.state = EpisodeState::Resetting;
                    self.reset_started_at = now;
                    self.last_reset_request_at = now;
                    info!("requesting encounter reset");
                    u.command = Some(SimCommand::RequestReset);
                }
                u
            }
            EpisodeState::Resetting => {
                let mut u = EpisodeUpdate {
                    suspend_stepping: true,
                    ..EpisodeUpdate::default()
                };
                if now - self.reset_started_at >= self.cfg.min_reset_s && is_fresh_episode(world, enc)
                {
                    self.state = EpisodeState::Training;
                    info!("reset complete after {:.2}s", now - self.reset_started_at);
                    u.reset_completed = true;
                    u.command = Some(SimCommand::ResetComplete);
                } else if now - self.last_reset_request_at >= self.cfg.reset_timeout_s {
                    self.last_reset_request_at = now;
                    warn!(
                        "reset not confirmed after {:.1}s; reissuing",
                        self.cfg.reset_timeout_s
                    );
                    u.command = Some(SimCommand::RequestReset);
                }
                u
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::{ArenaSpec, BossState, HeroState, Vec2};
    use sb_encounter::ArenaEncounter;

    fn enc() -> ArenaEncounter {
        let spec = ArenaSpec {
            visual: None,
            stuck_floor_y: Some(30.0),
            ..ArenaSpec::savage_beastfly()
        };
        ArenaEncounter::new(spec, None).unwrap()
    }

    fn world(t: f64, hero_hp: i32, boss_hp: i32, hero_y: f32) -> WorldSnapshot {
        WorldSnapshot::new(
            t,
            Some(HeroState {
                position: Vec2::new(45.0, hero_y),
                health: hero_hp,
                ..HeroState::default()
            }),
            Some(BossState {
                name: "Bone Flyer Giant".into(),
                position: Vec2::new(50.0, 36.0),
                velocity: Vec2::ZERO,
                hp: boss_hp,
            }),
        )
    }

    fn cfg() -> ResetConfig {
        ResetConfig {
            settle_s: 1.0,
            min_reset_s: 0.5,
            reset_timeout_s: 3.0,
        }
    }

    #[test]
    fn detection_priority() {
        let e = enc();
        assert_eq!(detect_terminal(&world(0.0, 5, 100, 36.0), &e), None);
        assert_eq!(
            detect_terminal(&world(0.0, 0, 0, 20.0), &e),
            Some(TerminalCause::HeroDied)
        );
        assert_eq!(
            detect_terminal(&world(0.0, 5, 0, 20.0), &e),
            Some(TerminalCause::BossDied)
        );
        assert_eq!(
            detect_terminal(&world(0.0, 5, 100, 20.0), &e),
            Some(TerminalCause::HeroStuck)
        );
    }

    #[test]
    fn other_boss_death_is_not_terminal() {
        let e = enc();
        let mut w = world(0.0, 5, 0, 36.0);
        if let Some(b) = w.boss.as_mut() {
            b.name = "Moss Mother".into();
        }
        assert_eq!(detect_terminal(&w, &e), None);
    }

    #[test]
    fn full_reset_sequence() {
        let e = enc();
        let mut t = EpisodeTracker::new(cfg());

        assert_eq!(t.update(0.0, &world(0.0, 5, 100, 36.0), &e), EpisodeUpdate::default());

        let u = t.update(1.0, &world(1.0, 0, 100, 36.0), &e);
        assert_eq!(u.entered_terminal, Some(TerminalCause::HeroDied));
        assert!(u.suspend_stepping);
        assert_eq!(t.state(), EpisodeState::HeroDead);

        // Still settling: no command, and the terminal is not re-entered.
        let u = t.update(1.5, &world(1.5, 0, 100, 36.0), &e);
        assert_eq!(u.entered_terminal, None);
        assert_eq!(u.command, None);

        let u = t.update(2.0, &world(2.0, 0, 100, 36.0), &e);
        assert_eq!(u.command, Some(SimCommand::RequestReset));
        assert_eq!(t.state(), EpisodeState::Resetting);

        // A live hero before min_reset_s is not accepted yet.
        let u = t.update(2.2, &world(2.2, 10, 550, 36.0), &e);
        assert!(!u.reset_completed);

        let u = t.update(2.6, &world(2.6, 10, 550, 36.0), &e);
        assert!(u.reset_completed);
        assert!(u.suspend_stepping);
        assert_eq!(u.command, Some(SimCommand::ResetComplete));
        assert_eq!(t.state(), EpisodeState::Training);
        assert_eq!(t.episodes_ended(), 1);
    }

    #[test]
    fn reset_request_is_reissued_after_timeout() {
        let e = enc();
        let mut t = EpisodeTracker::new(cfg());
        t.update(0.0, &world(0.0, 5, 0, 36.0), &e);
        assert_eq!(t.state(), EpisodeState::BossDead);
        assert_eq!(
            t.update(1.0, &world(1.0, 5, 0, 36.0), &e).command,
            Some(SimCommand::RequestReset)
        );

        let dead = world(2.0, 5, 0, 36.0);
        assert_eq!(t.update(2.0, &dead, &e).command, None);
        assert_eq!(
            t.update(4.0, &dead, &e).command,
            Some(SimCommand::RequestReset)
        );
        assert_eq!(t.update(5.0, &dead, &e).command, None);
        assert_eq!(t.state(), EpisodeState::Resetting);
    }
}
