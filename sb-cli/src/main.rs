//! sb: CLI binary for the boss-fight RL bridge.
//!
//! Subcommands:
//! - handshake
//! - mock-agent
//! - replay

use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sb_core::{Config, VisualSpec, WorldSnapshot};
use sb_encounter::{
    find_arena, select_encounter, EncounterCapability, FrameSource, GrayscaleCapture,
};
use sb_proto::{
    serve_connection, AgentClient, AgentHandler, InitRequest, InitResponse, TransitionRequest,
};
use sb_runtime::{client_options, init_request, Orchestrator, OrchestratorConfig, SimCommand};

fn print_help() {
    eprintln!(
        r#"sb - boss-fight RL bridge CLI

USAGE:
    sb <COMMAND> [OPTIONS]

COMMANDS:
    handshake           Connect to the agent and send Initialize
    mock-agent          Serve a reference agent answering with random actions
    replay              Drive the orchestrator from a recorded world trace

OPTIONS:
    -h, --help          Print this help message
    -V, --version       Print version

Run `sb <COMMAND> --help` for command options.
"#
    );
}

fn print_version() {
    println!("sb {}", env!("CARGO_PKG_VERSION"));
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    args.get(i + 1).cloned().unwrap_or_else(|| {
        eprintln!("Missing value for {flag}");
        process::exit(1);
    })
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    let raw = value_of(args, i, flag);
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Invalid {flag} value: {raw}");
        process::exit(1);
    })
}

fn load_config(path: &str) -> Config {
    Config::load(path).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        process::exit(1);
    })
}

/// The active encounter and, for hybrid arenas, the capture feeding it.
fn build_encounter(cfg: &Config) -> (Box<dyn EncounterCapability>, Option<Arc<GrayscaleCapture>>) {
    let name = &cfg.training.target_boss;
    let capture = find_arena(name, &cfg.encounters)
        .and_then(|a| a.visual)
        .map(|v| Arc::new(GrayscaleCapture::new(v)));
    let frames = capture.clone().map(|c| c as Arc<dyn FrameSource>);
    let enc = select_encounter(name, &cfg.encounters, frames).unwrap_or_else(|e| {
        eprintln!("Failed to select encounter: {e}");
        process::exit(1);
    });
    (enc, capture)
}

fn cmd_handshake(args: &[String]) {
    let mut config_path: Option<String> = None;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!(
                    r#"sb handshake

USAGE:
    sb handshake --config bridge.yaml

OPTIONS:
    --config PATH    Path to YAML config (required)
"#
                );
                return;
            }
            "--config" => {
                config_path = Some(value_of(args, i, "--config"));
                i += 2;
            }
            other => {
                eprintln!("Unknown option for `sb handshake`: {}", other);
                eprintln!("Run `sb handshake --help` for usage.");
                process::exit(1);
            }
        }
    }

    let config_path = config_path.unwrap_or_else(|| {
        eprintln!("Missing --config");
        process::exit(1);
    });
    let cfg = load_config(&config_path);
    sb_logging::init_logger(&cfg.logging.level);

    let (enc, _capture) = build_encounter(&cfg);
    let client = AgentClient::new(client_options(&cfg.connection));
    let req = init_request(&*enc);

    println!("Connecting to {}...", client.options().addr_string());
    let t0 = Instant::now();
    let resp = client.initialize(&req).unwrap_or_else(|e| {
        eprintln!("Handshake failed: {e}");
        process::exit(1);
    });
    let total = t0.elapsed();
    let rtt_us = client.stats_snapshot().last_rtt_us;
    client.disconnect();

    println!();
    println!("Handshake:");
    println!("  - initialized: {}", resp.initialized);
    println!("  - boss: {}", resp.boss_name);
    println!(
        "  - observation: {} x {} (agent reports {})",
        req.observation_type, req.observation_size, resp.observation_size
    );
    println!("  - action space: {:?}", req.action_space_shape);
    println!("  - checkpoint loaded: {}", resp.checkpoint_loaded);
    println!(
        "  - round trip: {:.2} ms ({:.2} ms including connect)",
        rtt_us as f64 / 1000.0,
        total.as_secs_f64() * 1000.0
    );

    if !resp.initialized {
        eprintln!("Agent reported initialized=false");
        process::exit(1);
    }
}

/// Reference agent: uniformly random actions of the announced shape.
struct MockAgent {
    rng: StdRng,
    shape: Option<Vec<i32>>,
    observation_size: usize,
    transitions: u64,
    terminals: u64,
}

impl MockAgent {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            shape: None,
            observation_size: 0,
            transitions: 0,
            terminals: 0,
        }
    }
}

impl AgentHandler for MockAgent {
    fn initialize(&mut self, req: InitRequest) -> Result<InitResponse, String> {
        if req.action_space_shape.is_empty() || req.action_space_shape.iter().any(|&n| n <= 0) {
            return Err(format!(
                "invalid action space shape {:?}",
                req.action_space_shape
            ));
        }
        info!(
            "initialize: boss '{}', {} observation of {} values, actions {:?}",
            req.boss_name, req.observation_type, req.observation_size, req.action_space_shape
        );
        self.shape = Some(req.action_space_shape);
        self.observation_size = req.observation_size;
        Ok(InitResponse {
            initialized: true,
            boss_name: req.boss_name,
            observation_size: req.observation_size,
            checkpoint_loaded: false,
        })
    }

    fn get_action(&mut self, state: Vec<f32>) -> Result<Vec<i32>, String> {
        let Some(shape) = &self.shape else {
            return Err("Model not initialized".to_string());
        };
        if state.len() != self.observation_size {
            return Err(format!(
                "expected {} state values, got {}",
                self.observation_size,
                state.len()
            ));
        }
        let rng = &mut self.rng;
        Ok(shape.iter().map(|&n| rng.gen_range(0..n)).collect())
    }

    fn store_transition(&mut self, t: TransitionRequest) -> Result<(), String> {
        if self.shape.is_none() {
            return Err("Model not initialized".to_string());
        }
        self.transitions += 1;
        if t.done {
            self.terminals += 1;
            info!(
                "terminal transition (reward {:.2}); {} stored so far",
                t.reward, self.transitions
            );
        }
        Ok(())
    }
}

fn cmd_mock_agent(args: &[String]) {
    let mut bind = "127.0.0.1:8000".to_string();
    let mut seed: u64 = 0;
    let mut once = false;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!(
                    r#"sb mock-agent

USAGE:
    sb mock-agent [--bind ADDR] [--seed N] [--once]

OPTIONS:
    --bind ADDR    Listen address (default: 127.0.0.1:8000)
    --seed N       RNG seed (default: 0)
    --once         Exit after the first connection closes
"#
                );
                return;
            }
            "--bind" => {
                bind = value_of(args, i, "--bind");
                i += 2;
            }
            "--seed" => {
                seed = parse_value(args, i, "--seed");
                i += 2;
            }
            "--once" => {
                once = true;
                i += 1;
            }
            other => {
                eprintln!("Unknown option for `sb mock-agent`: {}", other);
                eprintln!("Run `sb mock-agent --help` for usage.");
                process::exit(1);
            }
        }
    }

    sb_logging::init_logger("info");
    let listener = TcpListener::bind(&bind).unwrap_or_else(|e| {
        eprintln!("Failed to bind {bind}: {e}");
        process::exit(1);
    });
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or(bind);
    println!("mock agent listening on {local}");
    let _ = io::stdout().flush();

    let mut conn = 0u64;
    loop {
        let (mut sock, peer) = match listener.accept() {
            Ok(x) => x,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        conn += 1;
        let _ = sock.set_nodelay(true);
        info!("connection {conn} from {peer}");

        let mut agent = MockAgent::new(seed.wrapping_add(conn - 1));
        match serve_connection(&mut sock, &mut agent) {
            Ok(n) => info!("connection {conn} closed after {n} requests"),
            Err(e) => warn!("connection {conn} failed: {e}"),
        }
        println!(
            "connection {conn}: {} transitions ({} terminal)",
            agent.transitions, agent.terminals
        );
        let _ = io::stdout().flush();
        if once {
            break;
        }
    }
}

/// Read an NDJSON trace of world snapshots. Blank lines and `#` comments are
/// skipped.
fn read_trace(path: &Path) -> Result<Vec<WorldSnapshot>, String> {
    let f = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let mut out = Vec::new();
    for (n, line) in BufReader::new(f).lines().enumerate() {
        let line = line.map_err(|e| format!("{}: {e}", path.display()))?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        let w: WorldSnapshot =
            serde_json::from_str(t).map_err(|e| format!("{}:{}: {e}", path.display(), n + 1))?;
        out.push(w);
    }
    Ok(out)
}

/// A black RGB24 frame exactly large enough for `v`'s crop and target size.
fn blank_frame(v: &VisualSpec) -> (Vec<u8>, usize, usize) {
    let w = v.crop_left + v.width + v.crop_right;
    let h = v.crop_top + v.height + v.crop_bottom;
    (vec![0u8; w * h * 3], w, h)
}

fn command_name(cmd: &SimCommand) -> &'static str {
    match cmd {
        SimCommand::ApplyAction(_) => "apply_action",
        SimCommand::ReleaseControls => "release_controls",
        SimCommand::RequestReset => "request_reset",
        SimCommand::ResetComplete => "reset_complete",
    }
}

fn write_session_manifest(
    events_path: &Path,
    config_path: &str,
    cfg: &Config,
    enc: &dyn EncounterCapability,
    resp: &InitResponse,
) {
    let dir = events_path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("failed to create {}: {e}", dir.display());
        return;
    }
    let session_json = dir.join("session.json");
    let config_hash = std::fs::read(config_path)
        .ok()
        .map(|b| sb_logging::hash_config_bytes(&b));
    let req = init_request(enc);
    let mut m = sb_logging::SessionManifestV1 {
        session_manifest_version: sb_logging::SESSION_MANIFEST_VERSION,
        session_id: dir
            .file_name()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("session-{}", sb_logging::now_ms())),
        created_ts_ms: sb_logging::now_ms(),
        protocol_version: sb_proto::PROTOCOL_VERSION,
        encounter: enc.key().to_string(),
        boss_name: req.boss_name,
        observation_type: req.observation_type,
        observation_size: req.observation_size,
        action_space_shape: req.action_space_shape,
        eval_mode: cfg.training.eval_mode,
        git_hash: sb_logging::try_git_hash(),
        config_hash,
        agent_checkpoint_loaded: Some(resp.checkpoint_loaded),
    };
    // Appending to an existing session keeps its identity.
    if let Ok(existing) = sb_logging::read_manifest(&session_json) {
        m.session_id = existing.session_id;
        m.created_ts_ms = existing.created_ts_ms;
    }
    if let Err(e) = sb_logging::write_manifest_atomic(&session_json, &m) {
        warn!("failed to write session manifest: {e}");
    }
}

fn cmd_replay(args: &[String]) {
    let mut config_path: Option<String> = None;
    let mut trace_path: Option<String> = None;
    let mut events: Option<String> = None;
    let mut tick_s: f64 = 0.02;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!(
                    r#"sb replay

USAGE:
    sb replay --config bridge.yaml --trace world.ndjson [--events events.ndjson] [--tick-s S]

OPTIONS:
    --config PATH    Path to YAML config (required)
    --trace PATH     NDJSON file with one world snapshot per line (required)
    --events PATH    Episode/stats event log (default: logging.events_path)
    --tick-s S       Wall-clock pause between ticks in seconds (default: 0.02)
"#
                );
                return;
            }
            "--config" => {
                config_path = Some(value_of(args, i, "--config"));
                i += 2;
            }
            "--trace" => {
                trace_path = Some(value_of(args, i, "--trace"));
                i += 2;
            }
            "--events" => {
                events = Some(value_of(args, i, "--events"));
                i += 2;
            }
            "--tick-s" => {
                tick_s = parse_value(args, i, "--tick-s");
                i += 2;
            }
            other => {
                eprintln!("Unknown option for `sb replay`: {}", other);
                eprintln!("Run `sb replay --help` for usage.");
                process::exit(1);
            }
        }
    }

    let config_path = config_path.unwrap_or_else(|| {
        eprintln!("Missing --config");
        process::exit(1);
    });
    let trace_path = trace_path.unwrap_or_else(|| {
        eprintln!("Missing --trace");
        process::exit(1);
    });
    let pace = Duration::try_from_secs_f64(tick_s).unwrap_or_else(|_| {
        eprintln!("Invalid --tick-s value: {tick_s}");
        process::exit(1);
    });

    let cfg = load_config(&config_path);
    sb_logging::init_logger(&cfg.logging.level);

    let trace = read_trace(Path::new(&trace_path)).unwrap_or_else(|e| {
        eprintln!("Failed to read trace: {e}");
        process::exit(1);
    });
    if trace.is_empty() {
        eprintln!("Trace is empty: {trace_path}");
        process::exit(1);
    }

    let (enc, capture) = build_encounter(&cfg);
    let client = Arc::new(AgentClient::new(client_options(&cfg.connection)));
    let (mut orch, commands) =
        Orchestrator::new(Arc::clone(&client), enc, OrchestratorConfig::from_config(&cfg))
            .unwrap_or_else(|e| {
                eprintln!("Failed to start orchestrator: {e}");
                process::exit(1);
            });

    let resp = orch.initialize().unwrap_or_else(|e| {
        eprintln!("Initialize failed: {e}");
        process::exit(1);
    });

    if let Some(path) = events.or_else(|| cfg.logging.events_path.clone()) {
        let path = PathBuf::from(path);
        write_session_manifest(&path, &config_path, &cfg, orch.encounter(), &resp);
        let w = sb_logging::NdjsonWriter::open_append_with_flush(&path, cfg.logging.flush_every_lines)
            .unwrap_or_else(|e| {
                eprintln!("Failed to open event log: {e}");
                process::exit(1);
            });
        orch.set_event_log(w);
    }

    let blank = capture.as_ref().map(|c| blank_frame(c.spec()));
    let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();

    for world in &trace {
        // No live renderer here: keep the frame cache populated with a
        // black frame so hybrid observations can be built.
        if let (Some(c), Some((rgb, w, h))) = (&capture, &blank) {
            if let Err(e) = c.capture_rgb(rgb, *w, *h) {
                warn!("blank frame rejected: {e}");
            }
        }
        orch.tick(world);
        for cmd in commands.try_iter() {
            *counts.entry(command_name(&cmd)).or_default() += 1;
        }
        if !pace.is_zero() {
            thread::sleep(pace);
        }
    }
    if !orch.wait_idle(Duration::from_secs(10)) {
        warn!("agent still busy at end of trace");
    }
    for cmd in commands.try_iter() {
        *counts.entry(command_name(&cmd)).or_default() += 1;
    }
    orch.flush_events();

    let s = orch.stats().clone();
    let last = orch.last_episode().cloned();
    drop(orch);
    let cs = client.stats_snapshot();
    client.disconnect();

    let first_t = trace.first().map(|w| w.fixed_time).unwrap_or(0.0);
    let last_t = trace.last().map(|w| w.fixed_time).unwrap_or(0.0);
    println!();
    println!("Replay:");
    println!(
        "  - Ticks: {} (sim time {:.2}s..{:.2}s)",
        s.ticks, first_t, last_t
    );
    println!(
        "  - Steps: {} (skipped: {} in flight, {} missing entity, {} no observation)",
        s.steps, s.skipped_in_flight, s.skipped_missing_entity, s.skipped_extraction
    );
    println!(
        "  - Transitions: {} stored, {} failed, {} terminal, {} terminals lost",
        s.transitions_stored, s.transitions_failed, s.terminal_transitions, s.terminals_lost
    );
    println!(
        "  - Actions: {} applied, {} failed",
        s.actions_applied, s.action_failures
    );
    println!(
        "  - Episodes: {} ({} resets requested)",
        s.episodes, s.resets_requested
    );
    if let Some(ep) = last {
        println!(
            "  - Last episode: #{} {} after {} steps, reward {:.2}",
            ep.episode,
            ep.cause.as_str(),
            ep.steps,
            ep.reward_sum
        );
    }
    let cmds = counts
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("  - Commands: {cmds}");
    println!(
        "  - Client: sent={} received={} errors={} server_errors={} p50={}us p95={}us",
        cs.sent,
        cs.received,
        cs.errors,
        cs.server_errors,
        cs.latency_us.summary.p50_us,
        cs.latency_us.summary.p95_us
    );
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        process::exit(0);
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => {
            print_help();
        }
        "-V" | "--version" => {
            print_version();
        }
        "handshake" => {
            cmd_handshake(&args[2..]);
        }
        "mock-agent" => {
            cmd_mock_agent(&args[2..]);
        }
        "replay" => {
            cmd_replay(&args[2..]);
        }
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            eprintln!("Run `sb --help` for usage.");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::ArenaSpec;

    fn init_req(shape: Vec<i32>) -> InitRequest {
        InitRequest {
            boss_name: "Bone Flyer Giant".into(),
            observation_size: 3,
            action_space_shape: shape,
            observation_type: "vector".into(),
            vector_obs_size: 3,
            visual_width: 0,
            visual_height: 0,
        }
    }

    #[test]
    fn mock_agent_requires_initialize() {
        let mut a = MockAgent::new(1);
        assert_eq!(
            a.get_action(vec![0.0; 3]).unwrap_err(),
            "Model not initialized"
        );
        let t = TransitionRequest {
            state: vec![0.0; 3],
            action: vec![0, 0, 0, 0],
            reward: 0.0,
            next_state: vec![0.0; 3],
            done: false,
        };
        assert!(a.store_transition(t).is_err());
    }

    #[test]
    fn mock_agent_actions_fit_shape_and_follow_seed() {
        let shape = vec![3, 3, 2, 2, 2, 2];
        let mut a = MockAgent::new(7);
        let mut b = MockAgent::new(7);
        a.initialize(init_req(shape.clone())).unwrap();
        b.initialize(init_req(shape.clone())).unwrap();
        for _ in 0..50 {
            let x = a.get_action(vec![0.5; 3]).unwrap();
            assert_eq!(x, b.get_action(vec![0.5; 3]).unwrap());
            assert_eq!(x.len(), shape.len());
            assert!(x.iter().zip(&shape).all(|(&v, &n)| (0..n).contains(&v)));
        }
        assert!(a.get_action(vec![0.5; 4]).is_err());
    }

    #[test]
    fn mock_agent_rejects_empty_shape() {
        let mut a = MockAgent::new(0);
        assert!(a.initialize(init_req(vec![])).is_err());
        assert!(a.initialize(init_req(vec![3, 0])).is_err());
    }

    #[test]
    fn trace_skips_comments_and_reports_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.ndjson");
        std::fs::write(
            &good,
            "# recorded trace\n\n{\"fixed_time\":0.0}\n{\"fixed_time\":0.02,\"hero\":{\"position\":{\"x\":40.0,\"y\":35.0},\"health\":9}}\n",
        )
        .unwrap();
        let t = read_trace(&good).unwrap();
        assert_eq!(t.len(), 2);
        assert!(t[0].hero.is_none());
        assert_eq!(t[1].hero.as_ref().map(|h| h.health), Some(9));

        let bad = dir.path().join("bad.ndjson");
        std::fs::write(&bad, "{\"fixed_time\":0.0}\nnot json\n").unwrap();
        let err = read_trace(&bad).unwrap_err();
        assert!(err.contains(":2:"), "{err}");
    }

    #[test]
    fn blank_frame_is_accepted_by_capture() {
        let v = ArenaSpec::savage_beastfly().visual.unwrap();
        let (rgb, w, h) = blank_frame(&v);
        let cap = GrayscaleCapture::new(v);
        let frame = cap.capture_rgb(&rgb, w, h).unwrap();
        assert_eq!(frame.len(), v.width * v.height);
        assert!(frame.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn command_names_are_stable() {
        assert_eq!(command_name(&SimCommand::RequestReset), "request_reset");
        assert_eq!(
            command_name(&SimCommand::ApplyAction(Default::default())),
            "apply_action"
        );
    }
}
