//! Protocol definitions for bridge ↔ agent messages.
//!
//! Payloads are UTF-8 JSON objects; field names are part of the wire contract.

use serde::{Deserialize, Serialize};

/// Wire protocol version, recorded in session manifests.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // bridge -> agent
    Initialize = 0,
    GetAction = 1,
    StoreTransition = 2,
    // agent -> bridge
    InitResponse = 10,
    ActionResponse = 11,
    TransitionAck = 12,
    Error = 255,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => MessageType::Initialize,
            1 => MessageType::GetAction,
            2 => MessageType::StoreTransition,
            10 => MessageType::InitResponse,
            11 => MessageType::ActionResponse,
            12 => MessageType::TransitionAck,
            255 => MessageType::Error,
            _ => return None,
        })
    }

    /// The reply type a successful call expects for this request.
    pub fn expected_reply(self) -> Option<Self> {
        match self {
            MessageType::Initialize => Some(MessageType::InitResponse),
            MessageType::GetAction => Some(MessageType::ActionResponse),
            MessageType::StoreTransition => Some(MessageType::TransitionAck),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRequest {
    pub boss_name: String,
    pub observation_size: usize,
    pub action_space_shape: Vec<i32>,
    /// "vector" or "hybrid".
    pub observation_type: String,
    /// Size of the vector portion (precedes the visual data for hybrid).
    pub vector_obs_size: usize,
    /// 0 for vector-only.
    pub visual_width: usize,
    /// 0 for vector-only.
    pub visual_height: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitResponse {
    pub initialized: bool,
    #[serde(default)]
    pub boss_name: String,
    #[serde(default)]
    pub observation_size: usize,
    #[serde(default)]
    pub checkpoint_loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRequest {
    pub state: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub state: Vec<f32>,
    pub action: Vec<i32>,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}
