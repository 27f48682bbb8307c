use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::client::{AgentClient, ClientError, ClientOptions, ConnectionState, ReconnectPolicy};
use crate::codec::{decode_message, Message};
use crate::frame::{encode_frame, read_frame, write_frame, FrameError};
use crate::protocol::{
    ActionResponse, InitRequest, InitResponse, MessageType, StateRequest, TransitionRequest,
};

fn opts(addr: SocketAddr) -> ClientOptions {
    ClientOptions {
        host: addr.ip().to_string(),
        port: addr.port(),
        connect_timeout: Duration::from_secs(1),
        io_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        },
    }
}

fn reply(sock: &mut TcpStream, m: &Message) {
    write_frame(sock, m.kind.as_u8(), &m.payload).unwrap();
}

fn read_request(sock: &mut TcpStream) -> Message {
    decode_message(read_frame(sock).unwrap()).unwrap()
}

fn action_reply(action: Vec<i32>) -> Message {
    Message::new(MessageType::ActionResponse, &ActionResponse { action }).unwrap()
}

/// Accepts `conns` connections in turn; on each, answers `per_conn` requests
/// with `f` and then closes the socket.
fn start_server<F>(conns: usize, per_conn: usize, f: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(Message) -> Message + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        for _ in 0..conns {
            let (mut sock, _peer) = listener.accept().unwrap();
            for _ in 0..per_conn {
                let req = read_request(&mut sock);
                reply(&mut sock, &f(req));
            }
        }
    });
    (addr, handle)
}

fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[test]
fn initialize_roundtrip() {
    let (addr, server) = start_server(1, 1, |req| {
        assert_eq!(req.kind, MessageType::Initialize);
        let r: InitRequest = req.decode().unwrap();
        Message::new(
            MessageType::InitResponse,
            &InitResponse {
                initialized: true,
                boss_name: r.boss_name,
                observation_size: r.observation_size,
                checkpoint_loaded: true,
            },
        )
        .unwrap()
    });

    let client = AgentClient::new(opts(addr));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    let resp = client
        .initialize(&InitRequest {
            boss_name: "Bone Flyer Giant".into(),
            observation_size: 17,
            action_space_shape: vec![3, 3, 2, 2, 2, 2],
            observation_type: "vector".into(),
            vector_obs_size: 17,
            visual_width: 0,
            visual_height: 0,
        })
        .unwrap();
    assert!(resp.initialized);
    assert!(resp.checkpoint_loaded);
    assert_eq!(resp.boss_name, "Bone Flyer Giant");
    assert_eq!(resp.observation_size, 17);
    assert!(client.is_connected());

    server.join().unwrap();
}

#[test]
fn server_error_reply_keeps_connection() {
    let (addr, server) = start_server(1, 2, |req| {
        let s: StateRequest = req.decode().unwrap();
        if s.state[0] < 0.0 {
            Message::error("Model not initialized")
        } else {
            action_reply(vec![2, 0, 1, 1, 0, 0])
        }
    });

    let client = AgentClient::new(opts(addr));
    match client.get_action(&[-1.0]) {
        Err(ClientError::Server(msg)) => assert_eq!(msg, "Model not initialized"),
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(client.is_connected());

    // The server only accepts once: success proves the socket was reused.
    assert_eq!(client.get_action(&[1.0]).unwrap(), vec![2, 0, 1, 1, 0, 0]);

    let stats = client.stats_snapshot();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.server_errors, 1);
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.received, 2);

    server.join().unwrap();
}

#[test]
fn unexpected_reply_type_is_a_protocol_error() {
    let (addr, server) = start_server(1, 1, |_req| {
        Message::empty(MessageType::TransitionAck)
    });

    let client = AgentClient::new(opts(addr));
    let err = client.get_action(&[0.0]).unwrap_err();
    assert!(matches!(
        err,
        ClientError::UnexpectedReply {
            expected: MessageType::ActionResponse,
            got: MessageType::TransitionAck
        }
    ));
    assert!(!err.is_transport());
    assert!(client.is_connected());

    server.join().unwrap();
}

#[test]
fn peer_close_forces_reconnect_on_next_call() {
    // Connection 1 answers one request and closes; connection 2 answers one.
    let (addr, server) = start_server(2, 1, |_req| action_reply(vec![1, 0, 0, 0]));

    let client = AgentClient::new(opts(addr));
    assert_eq!(client.get_action(&[0.0]).unwrap(), vec![1, 0, 0, 0]);

    let err = client.get_action(&[0.0]).unwrap_err();
    assert!(err.is_transport(), "expected transport error, got {err:?}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    assert_eq!(client.get_action(&[0.0]).unwrap(), vec![1, 0, 0, 0]);
    assert!(client.is_connected());
    assert_eq!(client.stats_snapshot().connects, 2);

    server.join().unwrap();
}

#[test]
fn connect_failure_backs_off_exponentially() {
    let mut o = opts(unused_addr());
    o.reconnect = ReconnectPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(40),
    };
    let client = AgentClient::new(o);

    let t0 = Instant::now();
    let err = client.get_action(&[0.0]).unwrap_err();
    let elapsed = t0.elapsed();

    match err {
        ClientError::ConnectFailed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    // 40 + 80 + 160 ms.
    assert!(elapsed >= Duration::from_millis(280), "elapsed {elapsed:?}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    let stats = client.stats_snapshot();
    assert_eq!(stats.connect_failures, 3);
    assert_eq!(stats.connects, 0);
    assert_eq!(stats.sent, 0);
}

#[test]
fn fragmented_reply_is_reassembled() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || {
        let (mut sock, _peer) = listener.accept().unwrap();
        let _ = read_request(&mut sock);
        let m = action_reply(vec![2, 1, 0, 1, 0, 1]);
        let bytes = encode_frame(m.kind.as_u8(), &m.payload).unwrap();
        for b in bytes {
            sock.write_all(&[b]).unwrap();
            sock.flush().unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    });

    let client = AgentClient::new(opts(addr));
    assert_eq!(client.get_action(&[0.5]).unwrap(), vec![2, 1, 0, 1, 0, 1]);
    server.join().unwrap();
}

#[test]
fn bad_length_header_fails_fast_and_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let server = thread::spawn(move || {
        let (mut sock, _peer) = listener.accept().unwrap();
        let _ = read_request(&mut sock);
        // Zero length, then keep the socket open: a client that tried to read
        // on would block until its read timeout.
        sock.write_all(&0u32.to_be_bytes()).unwrap();
        sock.flush().unwrap();
        let _ = done_rx.recv_timeout(Duration::from_secs(5));
    });

    let mut o = opts(addr);
    o.io_timeout = Duration::from_secs(3);
    let client = AgentClient::new(o);

    let t0 = Instant::now();
    let err = client.get_action(&[0.0]).unwrap_err();
    assert!(t0.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        err,
        ClientError::Frame(FrameError::BadLength { len: 0, .. })
    ));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    done_tx.send(()).unwrap();
    server.join().unwrap();
}

#[test]
fn read_timeout_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let server = thread::spawn(move || {
        let (mut sock, _peer) = listener.accept().unwrap();
        let _ = read_request(&mut sock);
        let _ = done_rx.recv_timeout(Duration::from_secs(5));
    });

    let mut o = opts(addr);
    o.io_timeout = Duration::from_millis(100);
    let client = AgentClient::new(o);

    let err = client.get_action(&[0.0]).unwrap_err();
    assert!(matches!(err, ClientError::Timeout), "got {err:?}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    done_tx.send(()).unwrap();
    server.join().unwrap();
}

#[test]
fn concurrent_calls_are_serialized_on_one_connection() {
    let threads = 4usize;
    let per_thread = 25usize;
    let (addr, server) = start_server(1, threads * per_thread, |req| {
        let s: StateRequest = req.decode().unwrap();
        action_reply(vec![s.state[0] as i32])
    });

    let client = Arc::new(AgentClient::new(opts(addr)));
    let mut handles = Vec::new();
    for t in 0..threads {
        let c = Arc::clone(&client);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let tag = (t * 1000 + i) as f32;
                assert_eq!(c.get_action(&[tag]).unwrap(), vec![tag as i32]);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let stats = client.stats_snapshot();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.received, (threads * per_thread) as u64);
    assert_eq!(stats.latency_us.summary.count, (threads * per_thread) as u64);

    server.join().unwrap();
}

#[test]
fn store_transition_sends_wire_fields() {
    let (addr, server) = start_server(1, 1, |req| {
        assert_eq!(req.kind, MessageType::StoreTransition);
        let t: TransitionRequest = req.decode().unwrap();
        assert_eq!(t.action, vec![0, 0, 1, 0]);
        assert_eq!(t.reward, -100.0);
        assert!(t.done);
        Message::empty(MessageType::TransitionAck)
    });

    let client = AgentClient::new(opts(addr));
    client
        .store_transition(&TransitionRequest {
            state: vec![0.8],
            action: vec![0, 0, 1, 0],
            reward: -100.0,
            next_state: vec![0.0],
            done: true,
        })
        .unwrap();

    server.join().unwrap();
}
