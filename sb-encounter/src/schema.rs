//! Vector observation layout shared by arena encounters.
//!
//! ### Layout
//! - **hero**: x, y (arena bounds), vx, vy (`[-max, max]`), hp (`/ max_hero_hp`)
//! - **boss**: x, y, vx, vy, hp, same scaling with boss maxima
//! - **hero flags**: facing right, dashing, sprinting, attacking, jumping,
//!   recoiling, invulnerable (0/1)
//!
//! Every field is clamped to `[0, 1]`. For hybrid encounters the visual
//! buffer follows immediately after the last flag.
//!
//! Total: `VECTOR_LEN = 17`.

pub const HERO_X: usize = 0;
pub const HERO_Y: usize = 1;
pub const HERO_VX: usize = 2;
pub const HERO_VY: usize = 3;
pub const HERO_HP: usize = 4;
pub const BOSS_X: usize = 5;
pub const BOSS_Y: usize = 6;
pub const BOSS_VX: usize = 7;
pub const BOSS_VY: usize = 8;
pub const BOSS_HP: usize = 9;
pub const HERO_FLAGS: usize = 10;
pub const HERO_FLAG_COUNT: usize = 7;

pub const VECTOR_LEN: usize = HERO_FLAGS + HERO_FLAG_COUNT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_contiguous() {
        assert_eq!(BOSS_X, HERO_HP + 1);
        assert_eq!(HERO_FLAGS, BOSS_HP + 1);
        assert_eq!(VECTOR_LEN, 17);
    }
}
