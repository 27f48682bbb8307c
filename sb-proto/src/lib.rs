//! sb-proto: framed JSON protocol and blocking client for bridge ↔ agent
//! communication.

pub mod client;
pub mod codec;
pub mod frame;
pub mod peer;
pub mod protocol;

pub use client::{
    AgentClient, ClientError, ClientOptions, ClientStatsSnapshot, ConnectionState,
    ReconnectPolicy,
};
pub use codec::{CodecError, Message};
pub use frame::{FrameError, RawFrame, MAX_FRAME_LEN};
pub use peer::{serve_connection, AgentHandler};
pub use protocol::{
    ActionResponse, InitRequest, InitResponse, MessageType, StateRequest, TransitionRequest,
    PROTOCOL_VERSION,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod client_tests;

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use super::*;
    use crate::codec::decode_message;
    use crate::frame::{read_frame, write_frame};

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn roundtrip_over_tcp_dummy_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _peer) = listener.accept().unwrap();
            let req = decode_message(read_frame(&mut sock).unwrap()).unwrap();
            assert_eq!(req.kind, MessageType::GetAction);
            let state: StateRequest = req.decode().unwrap();

            // Dummy agent: move right iff the first feature is positive.
            let dir = if state.state[0] > 0.0 { 2 } else { 0 };
            let resp = Message::new(
                MessageType::ActionResponse,
                &ActionResponse {
                    action: vec![dir, 0, 0, 0],
                },
            )
            .unwrap();
            write_frame(&mut sock, resp.kind.as_u8(), &resp.payload).unwrap();
        });

        let mut sock = TcpStream::connect(addr).unwrap();
        let req = Message::new(
            MessageType::GetAction,
            &StateRequest {
                state: vec![0.7, 0.1],
            },
        )
        .unwrap();
        write_frame(&mut sock, req.kind.as_u8(), &req.payload).unwrap();
        let resp = decode_message(read_frame(&mut sock).unwrap()).unwrap();
        let action: ActionResponse = resp.decode().unwrap();
        assert_eq!(action.action, vec![2, 0, 0, 0]);

        server.join().unwrap();
    }
}
