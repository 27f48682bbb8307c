use std::sync::Arc;

use sb_core::{ArenaSpec, BossState, HeroState, Observation, Vec2};

use crate::arena::ArenaEncounter;
use crate::capability::{EncounterCapability, TerminalCause};
use crate::frames::{FrameSource, GrayscaleCapture};
use crate::schema::*;

fn vector_spec() -> ArenaSpec {
    ArenaSpec {
        visual: None,
        stuck_floor_y: Some(30.0),
        ..ArenaSpec::savage_beastfly()
    }
}

fn encounter() -> ArenaEncounter {
    ArenaEncounter::new(vector_spec(), None).unwrap()
}

fn hero(x: f32, y: f32, health: i32) -> HeroState {
    HeroState {
        position: Vec2::new(x, y),
        health,
        ..HeroState::default()
    }
}

fn boss(x: f32, y: f32, hp: i32) -> BossState {
    BossState {
        name: "Bone Flyer Giant".to_string(),
        position: Vec2::new(x, y),
        velocity: Vec2::ZERO,
        hp,
    }
}

fn obs(enc: &ArenaEncounter, h: &HeroState, b: &BossState) -> Observation {
    enc.extract_observation(Some(h), Some(b)).unwrap()
}

fn assert_close(got: f32, want: f32) {
    assert!((got - want).abs() < 1e-3, "got {got}, want {want}");
}

#[test]
fn vector_fields_are_scaled_and_clamped() {
    let enc = encounter();
    let mut h = hero(38.0, 100.0, 10);
    h.velocity = Vec2::new(0.0, -60.0);
    h.facing_right = true;
    h.invulnerable = true;
    let b = boss(65.0, 39.0, 275);

    let v = obs(&enc, &h, &b);
    assert_eq!(v.len(), VECTOR_LEN);
    assert_eq!(v.get(HERO_X), Some(0.0));
    assert_eq!(v.get(HERO_Y), Some(1.0));
    assert_eq!(v.get(HERO_VX), Some(0.5));
    assert_eq!(v.get(HERO_VY), Some(0.0));
    assert_eq!(v.get(HERO_HP), Some(1.0));
    assert_eq!(v.get(BOSS_X), Some(1.0));
    assert_close(v.get(BOSS_Y).unwrap(), 0.5);
    assert_close(v.get(BOSS_HP).unwrap(), 0.5);
    assert_eq!(v.get(HERO_FLAGS), Some(1.0));
    assert_eq!(v.get(HERO_FLAGS + 1), Some(0.0));
    assert_eq!(v.get(HERO_FLAGS + 6), Some(1.0));
    assert!(v.as_slice().iter().all(|x| (0.0..=1.0).contains(x)));
}

#[test]
fn extraction_needs_both_entities() {
    let enc = encounter();
    let h = hero(45.0, 36.0, 10);
    let b = boss(50.0, 36.0, 550);
    assert!(enc.extract_observation(None, Some(&b)).is_none());
    assert!(enc.extract_observation(Some(&h), None).is_none());
}

#[test]
fn hybrid_extraction_waits_for_cached_frame() {
    let spec = ArenaSpec::savage_beastfly();
    let visual = spec.visual.unwrap();
    let capture = Arc::new(GrayscaleCapture::new(visual));
    let frames: Arc<dyn FrameSource> = capture.clone();
    let enc = ArenaEncounter::new(spec, Some(frames)).unwrap();
    let h = hero(45.0, 36.0, 10);
    let b = boss(50.0, 36.0, 550);

    assert!(enc.extract_observation(Some(&h), Some(&b)).is_none());

    let (w, hgt) = (400usize, 400usize);
    capture.capture_rgb(&vec![255u8; w * hgt * 3], w, hgt).unwrap();
    let o = enc.extract_observation(Some(&h), Some(&b)).unwrap();
    assert_eq!(o.len(), VECTOR_LEN + 84 * 84);
    assert!((o.get(VECTOR_LEN).unwrap() - 1.0).abs() < 1e-5);

    enc.clear_visual_cache();
    assert!(enc.extract_observation(Some(&h), Some(&b)).is_none());
}

#[test]
fn terminal_rewards_ignore_observations() {
    let enc = encounter();
    let a = obs(&enc, &hero(45.0, 36.0, 10), &boss(50.0, 36.0, 550));
    let z = obs(&enc, &hero(60.0, 40.0, 0), &boss(40.0, 35.0, 1));

    for (p, c) in [(Some(&a), Some(&z)), (None, None), (Some(&z), Some(&a))] {
        assert_eq!(enc.compute_reward(p, c, Some(TerminalCause::HeroDied)), -100.0);
        assert_eq!(enc.compute_reward(p, c, Some(TerminalCause::HeroStuck)), -100.0);
        assert_eq!(enc.compute_reward(p, c, Some(TerminalCause::BossDied)), 500.0);
    }
}

#[test]
fn boss_damage_only_is_delta_times_weight_plus_bonus() {
    let enc = encounter();
    let h = hero(45.0, 36.0, 10);
    let p = obs(&enc, &h, &boss(50.0, 36.0, 550));
    let c = obs(&enc, &h, &boss(50.0, 36.0, 540));

    let r = enc.compute_reward(Some(&p), Some(&c), None);
    assert_close(r, 10.0 * 2.0 + 0.01);
}

#[test]
fn hero_damage_disables_distance_shaping() {
    let enc = encounter();
    let b = boss(50.0, 36.0, 550);
    let p = obs(&enc, &hero(44.0, 36.0, 10), &b);
    let c = obs(&enc, &hero(46.0, 36.0, 9), &b);

    assert_close(enc.compute_reward(Some(&p), Some(&c), None), -15.0 + 0.01);
}

#[test]
fn closing_distance_is_rewarded_without_damage() {
    let enc = encounter();
    let b = boss(50.0, 36.0, 550);
    let p = obs(&enc, &hero(44.0, 36.0, 10), &b);
    let c = obs(&enc, &hero(46.0, 36.0, 10), &b);

    assert_close(enc.compute_reward(Some(&p), Some(&c), None), 2.0 * 0.02 + 0.01);
}

#[test]
fn disengaging_is_penalized() {
    let enc = encounter();
    let b = boss(64.0, 36.0, 550);
    let h = hero(40.0, 36.0, 10);
    let p = obs(&enc, &h, &b);

    assert_close(enc.compute_reward(Some(&p), Some(&p), None), -0.05 + 0.01);
}

#[test]
fn missing_or_malformed_observations_give_zero() {
    let enc = encounter();
    let p = obs(&enc, &hero(45.0, 36.0, 10), &boss(50.0, 36.0, 550));
    let short = Observation::new(vec![0.5; VECTOR_LEN - 1]);

    assert_eq!(enc.compute_reward(None, Some(&p), None), 0.0);
    assert_eq!(enc.compute_reward(Some(&p), None, None), 0.0);
    assert_eq!(enc.compute_reward(Some(&short), Some(&p), None), 0.0);
    assert_eq!(enc.compute_reward(Some(&p), Some(&short), None), 0.0);
}

#[test]
fn stuck_below_floor_only_when_configured() {
    let enc = encounter();
    assert!(enc.is_hero_stuck(&hero(45.0, 29.0, 10)));
    assert!(!enc.is_hero_stuck(&hero(45.0, 31.0, 10)));

    let preset = ArenaEncounter::new(
        ArenaSpec {
            visual: None,
            ..ArenaSpec::savage_beastfly()
        },
        None,
    )
    .unwrap();
    assert!(!preset.is_hero_stuck(&hero(45.0, -1000.0, 10)));
}

#[test]
fn boss_identity_uses_entity_name() {
    let enc = encounter();
    assert!(enc.matches_boss(&boss(0.0, 0.0, 1)));
    let mut other = boss(0.0, 0.0, 1);
    other.name = "Moss Mother".into();
    assert!(!enc.matches_boss(&other));
}
