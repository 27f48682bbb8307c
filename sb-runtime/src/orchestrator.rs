//! `Orchestrator`: the per-tick driver.
//!
//! Once per fixed simulation tick it advances the episode state machine,
//! drives resets, and (at most every `step_interval_s` of simulation time)
//! dispatches one step to the worker: store the previous transition, then
//! ask for the next action. The tick itself never blocks on the network.
//!
//! Invariants:
//! - at most one step in flight; a tick that finds one is skipped, not queued
//! - the pending (observation, action) pair is taken out of its slot when a
//!   step is dispatched, so it is paired exactly once
//! - `done = true` is sent once per episode, on the first step after the
//!   reset, with the terminal observation as `next_state`

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use sb_core::config::ResetConfig;
use sb_core::{encode_action, Action, Config, Observation, WorldSnapshot};
use sb_encounter::{EncounterCapability, TerminalCause};
use sb_logging::{now_ms, ClientStatsEventV1, EpisodeEventV1, NdjsonWriter};
use sb_proto::{ClientError, InitResponse, TransitionRequest, PROTOCOL_VERSION};
use thiserror::Error;

use crate::commands::SimCommand;
use crate::episode::{EpisodeState, EpisodeTracker};
use crate::link::{init_request, AgentLink};
use crate::worker::{StepJob, StepOutcome, StepWorker};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to start step worker: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Minimum simulation time between two dispatched steps.
    pub step_interval_s: f64,
    pub eval_mode: bool,
    pub agent_control: bool,
    pub reset: ResetConfig,
    /// Write a client-stats event every N dispatched steps (0 disables).
    pub stats_every_steps: u64,
}

impl OrchestratorConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            step_interval_s: cfg.training.step_interval_s,
            eval_mode: cfg.training.eval_mode,
            agent_control: cfg.training.agent_control,
            reset: cfg.reset.clone(),
            stats_every_steps: cfg.logging.stats_every_steps,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    HeroMissing,
    BossMissing,
    ExtractionFailed,
    WorkerUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReport {
    ControlDisabled,
    /// A terminal state was entered this tick.
    Terminal(TerminalCause),
    /// Terminal or resetting: stepping suspended.
    Resetting,
    ResetComplete,
    /// The previous step is still awaiting the agent.
    InFlight,
    /// Step interval not yet elapsed.
    Waiting,
    Skipped(SkipReason),
    Dispatched {
        transition: bool,
        done: bool,
        requested_action: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub ticks: u64,
    pub steps: u64,
    pub skipped_in_flight: u64,
    pub skipped_missing_entity: u64,
    pub skipped_extraction: u64,
    pub transitions_dispatched: u64,
    pub transitions_stored: u64,
    pub transitions_failed: u64,
    pub terminal_transitions: u64,
    /// Terminals that had no buffered step to label.
    pub terminals_lost: u64,
    pub actions_applied: u64,
    pub action_failures: u64,
    pub episodes: u64,
    pub resets_requested: u64,
}

/// Accounting for one finished episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub episode: u64,
    pub cause: TerminalCause,
    pub steps: u64,
    pub reward_sum: f64,
    pub transitions: u64,
    pub started_at: f64,
    pub ended_at: f64,
}

#[derive(Debug, Clone, Default)]
struct EpisodeAccount {
    steps: u64,
    reward_sum: f64,
    transitions: u64,
    started_at: f64,
}

#[derive(Debug)]
struct PendingTerminal {
    cause: TerminalCause,
    /// Observation on the detection tick, if it could be extracted.
    snapshot: Option<Observation>,
    episode: u64,
    ended_at: f64,
    account: EpisodeAccount,
}

pub struct Orchestrator<L: AgentLink> {
    link: Arc<L>,
    encounter: Box<dyn EncounterCapability>,
    cfg: OrchestratorConfig,
    tracker: EpisodeTracker,
    worker: StepWorker,
    commands: Sender<SimCommand>,

    agent_control: bool,
    current_action: Action,
    pending_pair: Option<(Observation, Action)>,
    pending_terminal: Option<PendingTerminal>,
    in_flight: Option<u64>,
    next_seq: u64,
    last_step_time: Option<f64>,

    account: EpisodeAccount,
    last_episode: Option<EpisodeSummary>,
    events: Option<NdjsonWriter>,
    stats: OrchestratorStats,
}

impl<L: AgentLink> Orchestrator<L> {
    /// Returns the orchestrator and the receiving end of its command channel.
    pub fn new(
        link: Arc<L>,
        encounter: Box<dyn EncounterCapability>,
        cfg: OrchestratorConfig,
    ) -> Result<(Self, Receiver<SimCommand>), RuntimeError> {
        let worker = StepWorker::spawn(Arc::clone(&link))?;
        let (tx, rx) = mpsc::channel();
        let tracker = EpisodeTracker::new(cfg.reset.clone());
        let agent_control = cfg.agent_control;
        Ok((
            Self {
                link,
                encounter,
                cfg,
                tracker,
                worker,
                commands: tx,
                agent_control,
                current_action: Action::default(),
                pending_pair: None,
                pending_terminal: None,
                in_flight: None,
                next_seq: 1,
                last_step_time: None,
                account: EpisodeAccount::default(),
                last_episode: None,
                events: None,
                stats: OrchestratorStats::default(),
            },
            rx,
        ))
    }

    /// Episode and client-stats events go to `w` from now on.
    pub fn set_event_log(&mut self, w: NdjsonWriter) {
        self.events = Some(w);
    }

    /// Announce the encounter to the agent. Blocking; call before ticking.
    pub fn initialize(&self) -> Result<InitResponse, ClientError> {
        let req = init_request(&*self.encounter);
        info!(
            "initializing agent for '{}' ({} obs, {} values, action shape {:?})",
            req.boss_name, req.observation_type, req.observation_size, req.action_space_shape
        );
        self.link.initialize(&req)
    }

    pub fn encounter(&self) -> &dyn EncounterCapability {
        &*self.encounter
    }

    pub fn state(&self) -> EpisodeState {
        self.tracker.state()
    }

    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    pub fn current_action(&self) -> Action {
        self.current_action
    }

    pub fn agent_control(&self) -> bool {
        self.agent_control
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn has_pending_pair(&self) -> bool {
        self.pending_pair.is_some()
    }

    pub fn pending_terminal(&self) -> Option<TerminalCause> {
        self.pending_terminal.as_ref().map(|p| p.cause)
    }

    pub fn last_episode(&self) -> Option<&EpisodeSummary> {
        self.last_episode.as_ref()
    }

    /// Turning control off releases all inputs and drops the pending pair.
    pub fn set_agent_control(&mut self, on: bool) {
        if on == self.agent_control {
            return;
        }
        self.agent_control = on;
        if on {
            self.last_step_time = None;
            info!("agent control enabled");
        } else {
            self.current_action = Action::default();
            self.pending_pair = None;
            self.send(SimCommand::ReleaseControls);
            info!("agent control disabled");
        }
    }

    /// Block until the in-flight step (if any) resolves. `false` on timeout.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            match self.worker.outcomes().recv_timeout(left) {
                Ok(o) => self.apply_outcome(o),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => {
                    self.in_flight = None;
                    error!("step worker stopped");
                }
            }
        }
        true
    }

    /// Flush buffered NDJSON events.
    pub fn flush_events(&mut self) {
        if let Some(w) = &mut self.events {
            if let Err(e) = w.flush() {
                warn!("failed to flush event log: {e}");
            }
        }
    }

    /// One fixed simulation tick.
    pub fn tick(&mut self, world: &WorldSnapshot) -> TickReport {
        self.stats.ticks += 1;
        self.poll_outcomes();

        if !self.agent_control {
            return TickReport::ControlDisabled;
        }

        let now = world.fixed_time;
        let upd = self.tracker.update(now, world, &*self.encounter);
        if let Some(cause) = upd.entered_terminal {
            self.on_terminal(cause, world);
        }
        if let Some(cmd) = upd.command {
            if cmd == SimCommand::RequestReset {
                self.encounter.clear_visual_cache();
                self.stats.resets_requested += 1;
            }
            self.send(cmd);
        }
        if upd.reset_completed {
            self.current_action = Action::default();
            self.last_step_time = None;
            self.account = EpisodeAccount {
                started_at: now,
                ..EpisodeAccount::default()
            };
        }
        if upd.suspend_stepping {
            return match (upd.entered_terminal, upd.reset_completed) {
                (Some(cause), _) => TickReport::Terminal(cause),
                (None, true) => TickReport::ResetComplete,
                (None, false) => TickReport::Resetting,
            };
        }

        if self.in_flight.is_some() {
            self.stats.skipped_in_flight += 1;
            return TickReport::InFlight;
        }
        if let Some(last) = self.last_step_time {
            if now - last < self.cfg.step_interval_s {
                return TickReport::Waiting;
            }
        }
        self.step(world)
    }

    fn step(&mut self, world: &WorldSnapshot) -> TickReport {
        let Some(hero) = world.hero.as_ref() else {
            return self.skip(SkipReason::HeroMissing);
        };
        let Some(boss) = world.boss.as_ref().filter(|b| self.encounter.matches_boss(b)) else {
            return self.skip(SkipReason::BossMissing);
        };
        let Some(obs) = self.encounter.extract_observation(Some(hero), Some(boss)) else {
            return self.skip(SkipReason::ExtractionFailed);
        };

        let mut transition = None;
        let mut done = false;
        if let Some(pt) = self.pending_terminal.take() {
            match self.pending_pair.take() {
                Some((prev, action)) if !self.cfg.eval_mode => {
                    let next = pt.snapshot.clone().unwrap_or_else(|| obs.clone());
                    let reward =
                        self.encounter
                            .compute_reward(Some(&prev), Some(&next), Some(pt.cause));
                    transition = self.build_transition(prev, action, reward, next, true);
                    done = true;
                    self.finish_episode(pt, reward, transition.is_some());
                }
                _ => {
                    if !self.cfg.eval_mode {
                        warn!(
                            "no buffered step to label {} with; terminal transition dropped",
                            pt.cause.as_str()
                        );
                        self.stats.terminals_lost += 1;
                    }
                    self.finish_episode(pt, 0.0, false);
                }
            }
        } else if let Some((prev, action)) = self.pending_pair.take() {
            let reward = self.encounter.compute_reward(Some(&prev), Some(&obs), None);
            transition = self.build_transition(prev, action, reward, obs.clone(), false);
            if transition.is_some() {
                self.account.reward_sum += f64::from(reward);
                self.account.transitions += 1;
            }
        }

        let has_transition = transition.is_some();
        let seq = self.next_seq;
        self.next_seq += 1;
        let job = StepJob {
            seq,
            transition,
            observe: if done { None } else { Some(obs) },
            variant: self.encounter.action_variant(),
        };
        if !self.worker.submit(job) {
            error!("step worker unavailable; step dropped");
            return TickReport::Skipped(SkipReason::WorkerUnavailable);
        }

        self.in_flight = Some(seq);
        self.last_step_time = Some(world.fixed_time);
        self.stats.steps += 1;
        if has_transition {
            self.stats.transitions_dispatched += 1;
        }
        if done {
            self.stats.terminal_transitions += 1;
        } else {
            self.account.steps += 1;
        }
        if self.cfg.stats_every_steps > 0 && self.stats.steps % self.cfg.stats_every_steps == 0 {
            self.write_client_stats();
        }

        TickReport::Dispatched {
            transition: has_transition,
            done,
            requested_action: !done,
        }
    }

    fn skip(&mut self, reason: SkipReason) -> TickReport {
        match reason {
            SkipReason::HeroMissing | SkipReason::BossMissing => {
                self.stats.skipped_missing_entity += 1
            }
            SkipReason::ExtractionFailed => self.stats.skipped_extraction += 1,
            SkipReason::WorkerUnavailable => {}
        }
        debug!("step skipped: {reason:?}");
        TickReport::Skipped(reason)
    }

    fn build_transition(
        &self,
        prev: Observation,
        action: Action,
        reward: f32,
        next: Observation,
        done: bool,
    ) -> Option<TransitionRequest> {
        match encode_action(&action, self.encounter.action_variant()) {
            Ok(flat) => Some(TransitionRequest {
                state: prev.to_vec(),
                action: flat,
                reward,
                next_state: next.to_vec(),
                done,
            }),
            Err(e) => {
                warn!("buffered action cannot be encoded, transition dropped: {e}");
                None
            }
        }
    }

    fn on_terminal(&mut self, cause: TerminalCause, world: &WorldSnapshot) {
        if let Some(stale) = self.pending_terminal.take() {
            // The previous episode was never labelled, and the buffered pair
            // belongs to it.
            warn!("{} was never labelled; dropping it", stale.cause.as_str());
            self.stats.terminals_lost += 1;
            self.pending_pair = None;
            self.finish_episode(stale, 0.0, false);
        }
        let snapshot = self
            .encounter
            .extract_observation(world.hero.as_ref(), world.boss.as_ref());
        let account = std::mem::take(&mut self.account);
        self.pending_terminal = Some(PendingTerminal {
            cause,
            snapshot,
            episode: self.tracker.episodes_ended(),
            ended_at: world.fixed_time,
            account,
        });
        self.current_action = Action::default();
        self.send(SimCommand::ReleaseControls);
    }

    fn finish_episode(&mut self, pt: PendingTerminal, terminal_reward: f32, stored: bool) {
        let mut acc = pt.account;
        acc.reward_sum += f64::from(terminal_reward);
        if stored {
            acc.transitions += 1;
        }
        let summary = EpisodeSummary {
            episode: pt.episode,
            cause: pt.cause,
            steps: acc.steps,
            reward_sum: acc.reward_sum,
            transitions: acc.transitions,
            started_at: acc.started_at,
            ended_at: pt.ended_at,
        };
        self.stats.episodes += 1;
        info!(
            "episode {} ({}): {} steps, reward {:.2}, {} transitions",
            summary.episode,
            summary.cause.as_str(),
            summary.steps,
            summary.reward_sum,
            summary.transitions
        );
        if let Some(w) = &mut self.events {
            let ev = EpisodeEventV1 {
                event: "episode_end",
                ts_ms: now_ms(),
                protocol_version: PROTOCOL_VERSION,
                encounter: self.encounter.key().to_string(),
                episode: summary.episode,
                cause: summary.cause.as_str().to_string(),
                steps: summary.steps,
                reward_sum: summary.reward_sum,
                transitions: summary.transitions,
                sim_time_s: summary.ended_at,
                sim_duration_s: summary.ended_at - summary.started_at,
            };
            if let Err(e) = w.write_event(&ev) {
                warn!("failed to write episode event: {e}");
            }
        }
        self.last_episode = Some(summary);
    }

    fn write_client_stats(&mut self) {
        let (Some(w), Some(s)) = (&mut self.events, self.link.stats()) else {
            return;
        };
        let lat = &s.latency_us.summary;
        let ev = ClientStatsEventV1 {
            event: "client_stats",
            ts_ms: now_ms(),
            protocol_version: PROTOCOL_VERSION,
            steps: self.stats.steps,
            connected: s.state == sb_proto::ConnectionState::Connected,
            sent: s.sent,
            received: s.received,
            errors: s.errors,
            server_errors: s.server_errors,
            connects: s.connects,
            connect_failures: s.connect_failures,
            last_rtt_us: s.last_rtt_us,
            latency_p50_us: lat.p50_us,
            latency_p95_us: lat.p95_us,
            latency_mean_us: lat.mean_us,
        };
        if let Err(e) = w.write_event(&ev) {
            warn!("failed to write client stats event: {e}");
        }
    }

    fn poll_outcomes(&mut self) {
        loop {
            match self.worker.outcomes().try_recv() {
                Ok(o) => self.apply_outcome(o),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.in_flight.take().is_some() {
                        error!("step worker stopped with a step in flight");
                    }
                    break;
                }
            }
        }
    }

    fn apply_outcome(&mut self, o: StepOutcome) {
        if self.in_flight == Some(o.seq) {
            self.in_flight = None;
        }
        match o.stored {
            Some(true) => self.stats.transitions_stored += 1,
            Some(false) => self.stats.transitions_failed += 1,
            None => {}
        }
        if o.action_failed {
            self.stats.action_failures += 1;
        }
        let Some((obs, action)) = o.action else {
            return;
        };
        if !self.agent_control {
            return;
        }
        // A reply for an episode that is still waiting to be labelled is
        // buffered only; it must not drive the hero of the next episode.
        if self.tracker.state() == EpisodeState::Training && self.pending_terminal.is_none() {
            self.current_action = action;
            self.stats.actions_applied += 1;
            self.send(SimCommand::ApplyAction(action));
        }
        if !self.cfg.eval_mode {
            self.pending_pair = Some((obs, action));
        }
    }

    fn send(&self, cmd: SimCommand) {
        if self.commands.send(cmd).is_err() {
            debug!("command receiver dropped");
        }
    }
}

impl<L: AgentLink> Drop for Orchestrator<L> {
    fn drop(&mut self) {
        self.flush_events();
    }
}
