//! Action space variants and the flat-integer wire codec.
//!
//! The agent controls a `MultiDiscrete` action: one integer per field, each in
//! `0..cardinality`. Field order is fixed per variant:
//!
//! - Basic    : `[horizontal(3), jump(2), attack(2), dash(2)]`
//! - Extended : `[horizontal(3), vertical(3), jump(2), attack(2), dash(2), skill(2)]`

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-field cardinalities for the basic variant.
pub const BASIC_SHAPE: [i32; 4] = [3, 2, 2, 2];

/// Per-field cardinalities for the extended variant.
pub const EXTENDED_SHAPE: [i32; 6] = [3, 3, 2, 2, 2, 2];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionCodecError {
    #[error("invalid action length for {variant}: got {got}, expected {expected}")]
    BadLength {
        variant: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("action field {field} out of range: {value} not in 0..{cardinality}")]
    OutOfRange {
        field: &'static str,
        value: i32,
        cardinality: i32,
    },
    #[error("action uses fields not present in the {0} variant")]
    NotRepresentable(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionVariant {
    Basic,
    Extended,
}

impl ActionVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionVariant::Basic => "basic",
            ActionVariant::Extended => "extended",
        }
    }

    /// Cardinality of each encoded field, as announced to the agent.
    pub fn shape(&self) -> &'static [i32] {
        match self {
            ActionVariant::Basic => &BASIC_SHAPE,
            ActionVariant::Extended => &EXTENDED_SHAPE,
        }
    }

    pub fn len(&self) -> usize {
        self.shape().len()
    }

    fn field_names(&self) -> &'static [&'static str] {
        match self {
            ActionVariant::Basic => &["horizontal", "jump", "attack", "dash"],
            ActionVariant::Extended => &["horizontal", "vertical", "jump", "attack", "dash", "skill"],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizontal {
    #[default]
    None,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vertical {
    #[default]
    None,
    Up,
    Down,
}

impl Horizontal {
    fn index(self) -> i32 {
        match self {
            Horizontal::None => 0,
            Horizontal::Left => 1,
            Horizontal::Right => 2,
        }
    }

    fn from_index(i: i32) -> Self {
        match i {
            1 => Horizontal::Left,
            2 => Horizontal::Right,
            _ => Horizontal::None,
        }
    }
}

impl Vertical {
    fn index(self) -> i32 {
        match self {
            Vertical::None => 0,
            Vertical::Up => 1,
            Vertical::Down => 2,
        }
    }

    fn from_index(i: i32) -> Self {
        match i {
            1 => Vertical::Up,
            2 => Vertical::Down,
            _ => Vertical::None,
        }
    }
}

/// Structured command applied to the hero for one step.
///
/// `Action::default()` is the neutral command (nothing held).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub horizontal: Horizontal,
    pub vertical: Vertical,
    pub jump: bool,
    pub attack: bool,
    pub dash: bool,
    pub skill: bool,
}

impl Action {
    pub fn is_neutral(&self) -> bool {
        *self == Action::default()
    }

    /// True if every field this action sets exists in `variant`.
    pub fn fits(&self, variant: ActionVariant) -> bool {
        match variant {
            ActionVariant::Basic => self.vertical == Vertical::None && !self.skill,
            ActionVariant::Extended => true,
        }
    }
}

/// Encode an action into its flat wire form for `variant`.
pub fn encode_action(a: &Action, variant: ActionVariant) -> Result<Vec<i32>, ActionCodecError> {
    if !a.fits(variant) {
        return Err(ActionCodecError::NotRepresentable(variant.as_str()));
    }
    let b = |v: bool| if v { 1 } else { 0 };
    Ok(match variant {
        ActionVariant::Basic => vec![a.horizontal.index(), b(a.jump), b(a.attack), b(a.dash)],
        ActionVariant::Extended => vec![
            a.horizontal.index(),
            a.vertical.index(),
            b(a.jump),
            b(a.attack),
            b(a.dash),
            b(a.skill),
        ],
    })
}

/// Decode a flat wire action for `variant`.
///
/// Length and every field's range are validated; on error no action is produced.
pub fn decode_action(flat: &[i32], variant: ActionVariant) -> Result<Action, ActionCodecError> {
    let shape = variant.shape();
    if flat.len() != shape.len() {
        return Err(ActionCodecError::BadLength {
            variant: variant.as_str(),
            got: flat.len(),
            expected: shape.len(),
        });
    }
    let names = variant.field_names();
    for ((&v, &card), &field) in flat.iter().zip(shape.iter()).zip(names.iter()) {
        if !(0..card).contains(&v) {
            return Err(ActionCodecError::OutOfRange {
                field,
                value: v,
                cardinality: card,
            });
        }
    }

    Ok(match variant {
        ActionVariant::Basic => Action {
            horizontal: Horizontal::from_index(flat[0]),
            vertical: Vertical::None,
            jump: flat[1] == 1,
            attack: flat[2] == 1,
            dash: flat[3] == 1,
            skill: false,
        },
        ActionVariant::Extended => Action {
            horizontal: Horizontal::from_index(flat[0]),
            vertical: Vertical::from_index(flat[1]),
            jump: flat[2] == 1,
            attack: flat[3] == 1,
            dash: flat[4] == 1,
            skill: flat[5] == 1,
        },
    })
}
