//! `AgentClient`: blocking request/response client for the agent protocol.
//!
//! Design goals:
//! - exactly one request in flight per connection (a call lock serializes
//!   Initialize / GetAction / StoreTransition, released on every exit path)
//! - lazy reconnection with bounded attempts and exponential backoff, no
//!   background retry loop
//! - any transport failure tears the socket down, so the next call always
//!   starts from a clean connect
//! - latency histogram for observability

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::codec::{decode_message, encode_payload, CodecError, Message};
use crate::frame::{read_frame, write_frame, FrameError};
use crate::protocol::{
    ActionResponse, InitRequest, InitResponse, MessageType, StateRequest, TransitionRequest,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr} after {attempts} attempts: {last}")]
    ConnectFailed {
        addr: String,
        attempts: u32,
        last: String,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("read timed out")]
    Timeout,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("server error: {0}")]
    Server(String),
    #[error("unexpected reply: expected {expected:?}, got {got:?}")]
    UnexpectedReply {
        expected: MessageType,
        got: MessageType,
    },
}

impl ClientError {
    /// Transport failures invalidate the stream; protocol failures do not.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectFailed { .. }
                | ClientError::Io(_)
                | ClientError::Frame(_)
                | ClientError::Malformed(_)
                | ClientError::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Bounded connect retries with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay slept after failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Call `attempt` with indices `0..max_attempts` until it succeeds,
    /// sleeping `delay_for(i)` after every failure (the last one included).
    pub fn retry<T>(&self, mut attempt: impl FnMut(u32) -> io::Result<T>) -> io::Result<T> {
        let mut last = io::Error::new(io::ErrorKind::NotConnected, "no attempts made");
        for i in 0..self.max_attempts {
            match attempt(i) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last = e;
                    thread::sleep(self.delay_for(i));
                }
            }
        }
        Err(last)
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Bound on each individual read (and write) call.
    pub io_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy {
                max_attempts: 5,
                base_delay: Duration::from_secs(1),
            },
        }
    }
}

impl ClientOptions {
    pub fn addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct LatencySummary {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    /// Approximate percentiles (computed from buckets).
    pub p50_us: u64,
    pub p95_us: u64,
}

#[derive(Debug, Clone)]
pub struct LatencyHistogramSnapshot {
    /// Log2 buckets over microseconds. Bucket `b` covers `[2^b, 2^(b+1))` us.
    pub buckets: Vec<u64>,
    pub summary: LatencySummary,
}

#[derive(Debug, Clone)]
pub struct ClientStatsSnapshot {
    pub state: ConnectionState,
    pub sent: u64,
    pub received: u64,
    pub errors: u64,
    pub server_errors: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub last_rtt_us: u64,
    pub latency_us: LatencyHistogramSnapshot,
}

#[derive(Debug, Default)]
struct Conn {
    stream: Option<TcpStream>,
}

#[derive(Debug)]
pub struct AgentClient {
    opts: ClientOptions,
    /// Call lock: held for the whole send/receive exchange.
    conn: Mutex<Conn>,
    /// Readable without taking the call lock.
    state: AtomicU8,
    stats: Mutex<Stats>,
}

impl AgentClient {
    /// Create a client. No connection is made until the first call.
    pub fn new(opts: ClientOptions) -> Self {
        Self {
            opts,
            conn: Mutex::new(Conn::default()),
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            stats: Mutex::new(Stats::default()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.opts
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Connect eagerly (no-op if already connected).
    pub fn connect(&self) -> Result<(), ClientError> {
        let mut conn = self.lock_conn();
        self.ensure_connected(&mut conn).map(|_| ())
    }

    /// Close the connection; the next call reconnects.
    pub fn disconnect(&self) {
        let mut conn = self.lock_conn();
        self.close(&mut conn);
    }

    pub fn initialize(&self, req: &InitRequest) -> Result<InitResponse, ClientError> {
        let reply = self.call(MessageType::Initialize, encode_payload(req)?)?;
        let resp: InitResponse = reply.decode()?;
        info!(
            "agent initialized for '{}' (observation size {}, checkpoint loaded: {})",
            resp.boss_name, resp.observation_size, resp.checkpoint_loaded
        );
        Ok(resp)
    }

    /// Request an action for `state`; returns the raw flat action array.
    pub fn get_action(&self, state: &[f32]) -> Result<Vec<i32>, ClientError> {
        let req = StateRequest {
            state: state.to_vec(),
        };
        let reply = self.call(MessageType::GetAction, encode_payload(&req)?)?;
        let resp: ActionResponse = reply.decode()?;
        Ok(resp.action)
    }

    /// Forward one transition. The ack payload is ignored.
    pub fn store_transition(&self, req: &TransitionRequest) -> Result<(), ClientError> {
        self.call(MessageType::StoreTransition, encode_payload(req)?)?;
        Ok(())
    }

    pub fn stats_snapshot(&self) -> ClientStatsSnapshot {
        let s = self.stats_lock();
        ClientStatsSnapshot {
            state: self.connection_state(),
            sent: s.sent,
            received: s.received,
            errors: s.errors,
            server_errors: s.server_errors,
            connects: s.connects,
            connect_failures: s.connect_failures,
            last_rtt_us: s.last_rtt_us,
            latency_us: s.latency.snapshot(),
        }
    }

    /// One strictly synchronous exchange: send one frame, read one frame.
    fn call(&self, kind: MessageType, payload: Vec<u8>) -> Result<Message, ClientError> {
        let expected = kind.expected_reply().unwrap_or(kind);
        let mut conn = self.lock_conn();

        let res = self
            .ensure_connected(&mut conn)
            .and_then(|stream| {
                let t0 = Instant::now();
                self.stats_lock().on_sent();
                exchange(stream, kind, &payload).map(|m| (m, t0.elapsed()))
            });

        let (reply, rtt) = match res {
            Ok(r) => r,
            Err(e) => {
                self.stats_lock().on_error();
                if e.is_transport() {
                    warn!("{kind:?} failed ({e}); dropping connection for reconnect");
                    self.close(&mut conn);
                }
                return Err(e);
            }
        };
        self.stats_lock().on_received(rtt);

        if reply.kind == expected {
            return Ok(reply);
        }
        let mut s = self.stats_lock();
        s.on_error();
        match reply.kind {
            MessageType::Error => {
                s.server_errors += 1;
                let text = reply.error_text();
                warn!("agent returned error for {kind:?}: {text}");
                Err(ClientError::Server(text))
            }
            got => Err(ClientError::UnexpectedReply { expected, got }),
        }
    }

    fn ensure_connected<'a>(&self, conn: &'a mut Conn) -> Result<&'a mut TcpStream, ClientError> {
        if conn.stream.is_none() {
            conn.stream = Some(self.connect_with_retry()?);
        }
        conn.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected).into())
    }

    fn connect_with_retry(&self) -> Result<TcpStream, ClientError> {
        let policy = self.opts.reconnect;
        let addr = self.opts.addr_string();
        self.set_state(ConnectionState::Connecting);

        let result = policy.retry(|attempt| {
            debug!(
                "connecting to {addr} (attempt {}/{})",
                attempt + 1,
                policy.max_attempts
            );
            self.connect_once().inspect_err(|e| {
                self.stats_lock().connect_failures += 1;
                warn!("connect to {addr} failed: {e}");
            })
        });

        match result {
            Ok(stream) => {
                self.stats_lock().connects += 1;
                self.set_state(ConnectionState::Connected);
                info!("connected to {addr}");
                Ok(stream)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(ClientError::ConnectFailed {
                    addr,
                    attempts: policy.max_attempts,
                    last: e.to_string(),
                })
            }
        }
    }

    fn connect_once(&self) -> io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (self.opts.host.as_str(), self.opts.port)
            .to_socket_addrs()?
            .collect();
        let mut last_err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.opts.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    stream.set_read_timeout(non_zero(self.opts.io_timeout))?;
                    stream.set_write_timeout(non_zero(self.opts.io_timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn close(&self, conn: &mut Conn) {
        if let Some(s) = conn.stream.take() {
            let _ = s.shutdown(Shutdown::Both);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, s: ConnectionState) {
        self.state.store(s.to_u8(), Ordering::SeqCst);
    }

    fn lock_conn(&self) -> MutexGuard<'_, Conn> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats_lock(&self) -> MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        let conn = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(s) = conn.stream.take() {
            let _ = s.shutdown(Shutdown::Both);
        }
    }
}

fn exchange(
    stream: &mut TcpStream,
    kind: MessageType,
    payload: &[u8],
) -> Result<Message, ClientError> {
    write_frame(stream, kind.as_u8(), payload).map_err(frame_err)?;
    let raw = read_frame(stream).map_err(frame_err)?;
    decode_message(raw).map_err(|e| ClientError::Malformed(e.to_string()))
}

fn frame_err(e: FrameError) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Frame(e)
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}

#[derive(Debug, Default)]
struct Stats {
    sent: u64,
    received: u64,
    errors: u64,
    server_errors: u64,
    connects: u64,
    connect_failures: u64,
    last_rtt_us: u64,
    latency: LatencyHistogram,
}

impl Stats {
    fn on_sent(&mut self) {
        self.sent += 1;
    }

    fn on_received(&mut self, dt: Duration) {
        self.received += 1;
        self.last_rtt_us = dt.as_micros().min(u128::from(u64::MAX)) as u64;
        self.latency.record(dt);
    }

    fn on_error(&mut self) {
        self.errors += 1;
    }
}

const LATENCY_BUCKETS: usize = 32;

/// Log2 latency histogram. Bucket `b` holds `[2^b, 2^(b+1))` microseconds,
/// except that bucket 0 also takes 0us (so it spans `[0, 2)`) and the last
/// bucket is open-ended.
#[derive(Debug, Default)]
struct LatencyHistogram {
    buckets: [u64; LATENCY_BUCKETS],
    count: u64,
    sum_us: u128,
    min_us: u64,
    max_us: u64,
}

impl LatencyHistogram {
    fn record(&mut self, dt: Duration) {
        let us = dt.as_micros().min(u128::from(u64::MAX)) as u64;
        self.min_us = if self.count == 0 { us } else { self.min_us.min(us) };
        self.max_us = self.max_us.max(us);
        self.buckets[latency_bucket(us)] += 1;
        self.count += 1;
        self.sum_us += u128::from(us);
    }

    fn snapshot(&self) -> LatencyHistogramSnapshot {
        let mean_us = match self.count {
            0 => 0.0,
            n => self.sum_us as f64 / n as f64,
        };
        LatencyHistogramSnapshot {
            buckets: self.buckets.to_vec(),
            summary: LatencySummary {
                count: self.count,
                min_us: self.min_us,
                max_us: self.max_us,
                mean_us,
                p50_us: self.percentile_upper_bound_us(0.50),
                p95_us: self.percentile_upper_bound_us(0.95),
            },
        }
    }

    /// Exclusive upper edge of the bucket holding the `q` quantile.
    fn percentile_upper_bound_us(&self, q: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let rank = ((self.count as f64 * q).ceil() as u64).max(1);
        let mut seen = 0u64;
        self.buckets
            .iter()
            .position(|&n| {
                seen += n;
                seen >= rank
            })
            .map_or(self.max_us, bucket_upper_edge_us)
    }
}

fn latency_bucket(us: u64) -> usize {
    (us.max(1).ilog2() as usize).min(LATENCY_BUCKETS - 1)
}

fn bucket_upper_edge_us(bucket: usize) -> u64 {
    if bucket + 1 >= LATENCY_BUCKETS {
        u64::MAX
    } else {
        1u64 << (bucket + 1)
    }
}
