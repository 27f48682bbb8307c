//! sb-logging: NDJSON events, session manifest and process logger setup.
//!
//! Append-only NDJSON logs are meant for post-mortems of training sessions;
//! human-facing diagnostics go through the `log` facade.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Session manifest schema version.
pub const SESSION_MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifestV1 {
    pub session_manifest_version: u32,

    pub session_id: String,
    pub created_ts_ms: u64,

    pub protocol_version: u32,
    pub encounter: String,
    pub boss_name: String,
    pub observation_type: String,
    pub observation_size: usize,
    pub action_space_shape: Vec<i32>,
    pub eval_mode: bool,

    // Hashes for reproducibility.
    pub git_hash: Option<String>,
    pub config_hash: Option<String>,

    pub agent_checkpoint_loaded: Option<bool>,
}

pub fn now_ms() -> u64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_millis() as u64
}

pub fn hash_config_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn try_git_hash() -> Option<String> {
    use std::process::Command;

    let out = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8(out.stdout).ok()?;
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

pub fn read_manifest(path: impl AsRef<Path>) -> Result<SessionManifestV1, NdjsonError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice::<SessionManifestV1>(&bytes)?)
}

pub fn write_manifest_atomic(
    path: impl AsRef<Path>,
    m: &SessionManifestV1,
) -> Result<(), NdjsonError> {
    let path = path.as_ref();
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(m)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Initialize the process logger. `RUST_LOG` wins over `default_level`.
/// Calling it twice is harmless.
pub fn init_logger(default_level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();
}

#[derive(Debug, Clone, Serialize)]
pub struct EpisodeEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,
    pub protocol_version: u32,

    pub encounter: String,
    pub episode: u64,
    /// "hero_died" | "boss_died" | "hero_stuck"
    pub cause: String,
    pub steps: u64,
    pub reward_sum: f64,
    pub transitions: u64,
    pub sim_time_s: f64,
    pub sim_duration_s: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientStatsEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,
    pub protocol_version: u32,

    pub steps: u64,
    pub connected: bool,
    pub sent: u64,
    pub received: u64,
    pub errors: u64,
    pub server_errors: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub last_rtt_us: u64,
    pub latency_p50_us: u64,
    pub latency_p95_us: u64,
    pub latency_mean_us: f64,
}

#[derive(Debug, Error)]
pub enum NdjsonError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only NDJSON writer.
///
/// Contract: each call writes exactly one JSON object followed by a newline.
pub struct NdjsonWriter {
    w: BufWriter<File>,
    lines_since_flush: u64,
    flush_every_lines: u64,
}

impl NdjsonWriter {
    /// Open a file for append. Creates it (and its parent directory) if needed.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, NdjsonError> {
        Self::open_append_with_flush(path, 0)
    }

    /// `flush_every_lines=0` disables periodic flushing.
    pub fn open_append_with_flush(
        path: impl AsRef<Path>,
        flush_every_lines: u64,
    ) -> Result<Self, NdjsonError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(f),
            lines_since_flush: 0,
            flush_every_lines,
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<(), NdjsonError> {
        let mut buf = serde_json::to_vec(event)?;
        buf.push(b'\n');
        self.w.write_all(&buf)?;
        self.lines_since_flush += 1;
        if self.flush_every_lines > 0 && self.lines_since_flush >= self.flush_every_lines {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NdjsonError> {
        self.w.flush()?;
        self.lines_since_flush = 0;
        Ok(())
    }
}

impl std::fmt::Debug for NdjsonWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonWriter")
            .field("lines_since_flush", &self.lines_since_flush)
            .field("flush_every_lines", &self.flush_every_lines)
            .finish()
    }
}
