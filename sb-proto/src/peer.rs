//! Agent side of the protocol: a request loop over one accepted stream.
//!
//! Used by the `sb mock-agent` command and by client tests. Handler failures
//! are answered with an `Error` frame; the loop only ends on EOF or a
//! transport/framing failure.

use std::io::{Read, Write};

use log::{debug, warn};

use crate::codec::{decode_payload, Message};
use crate::frame::{read_frame, write_frame, FrameError};
use crate::protocol::{InitRequest, InitResponse, MessageType, StateRequest, TransitionRequest};

/// Agent behaviour behind the request loop. `Err` texts go back to the
/// bridge as `{"error": ...}`.
pub trait AgentHandler {
    fn initialize(&mut self, req: InitRequest) -> Result<InitResponse, String>;
    fn get_action(&mut self, state: Vec<f32>) -> Result<Vec<i32>, String>;
    fn store_transition(&mut self, t: TransitionRequest) -> Result<(), String>;
}

/// Serve requests until the peer closes the stream. Returns the number of
/// requests answered.
pub fn serve_connection<S, H>(stream: &mut S, handler: &mut H) -> Result<u64, FrameError>
where
    S: Read + Write,
    H: AgentHandler + ?Sized,
{
    let mut served = 0u64;
    loop {
        let raw = match read_frame(stream) {
            Ok(f) => f,
            Err(FrameError::UnexpectedEof) => return Ok(served),
            Err(e) => return Err(e),
        };
        let reply = dispatch(raw.msg_type, &raw.payload, handler);
        write_frame(stream, reply.kind.as_u8(), &reply.payload)?;
        served += 1;
    }
}

fn dispatch<H: AgentHandler + ?Sized>(msg_type: u8, payload: &[u8], handler: &mut H) -> Message {
    let Some(kind) = MessageType::from_u8(msg_type) else {
        warn!("unknown message type {msg_type}");
        return Message::error(format!("Unknown message type: {msg_type}"));
    };
    debug!("request {kind:?} ({} bytes)", payload.len());

    let reply = match kind {
        MessageType::Initialize => decode_payload::<InitRequest>(payload)
            .map_err(|e| e.to_string())
            .and_then(|req| handler.initialize(req))
            .and_then(|resp| {
                Message::new(MessageType::InitResponse, &resp).map_err(|e| e.to_string())
            }),
        MessageType::GetAction => decode_payload::<StateRequest>(payload)
            .map_err(|e| e.to_string())
            .and_then(|req| handler.get_action(req.state))
            .and_then(|action| {
                let body = crate::protocol::ActionResponse { action };
                Message::new(MessageType::ActionResponse, &body).map_err(|e| e.to_string())
            }),
        MessageType::StoreTransition => decode_payload::<TransitionRequest>(payload)
            .map_err(|e| e.to_string())
            .and_then(|t| handler.store_transition(t))
            .map(|()| Message::empty(MessageType::TransitionAck)),
        other => Err(format!("Unknown message type: {}", other.as_u8())),
    };

    reply.unwrap_or_else(Message::error)
}
