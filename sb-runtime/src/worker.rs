//! Step worker: runs the blocking agent calls for one step off the tick
//! thread.
//!
//! Exactly one job is outstanding at a time (enforced by the orchestrator);
//! the worker just processes jobs in order and reports each outcome.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use sb_core::{decode_action, Action, ActionVariant, Observation};
use sb_proto::TransitionRequest;

use crate::link::AgentLink;

#[derive(Debug)]
pub(crate) struct StepJob {
    pub seq: u64,
    pub transition: Option<TransitionRequest>,
    /// Observation to request an action for; `None` on a terminal step.
    pub observe: Option<Observation>,
    pub variant: ActionVariant,
}

#[derive(Debug)]
pub(crate) struct StepOutcome {
    pub seq: u64,
    /// `None` if no transition was part of the job.
    pub stored: Option<bool>,
    /// The observation and the decoded action chosen for it.
    pub action: Option<(Observation, Action)>,
    /// An action was requested but none could be used.
    pub action_failed: bool,
}

pub(crate) struct StepWorker {
    jobs: Option<Sender<StepJob>>,
    outcomes: Receiver<StepOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl StepWorker {
    pub fn spawn<L: AgentLink>(link: Arc<L>) -> std::io::Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<StepJob>();
        let (out_tx, out_rx) = mpsc::channel::<StepOutcome>();
        let handle = thread::Builder::new()
            .name("sb-step-worker".to_string())
            .spawn(move || {
                for job in job_rx {
                    let out = run_job(&*link, job);
                    if out_tx.send(out).is_err() {
                        break;
                    }
                }
                debug!("step worker exiting");
            })?;
        Ok(Self {
            jobs: Some(job_tx),
            outcomes: out_rx,
            handle: Some(handle),
        })
    }

    /// `false` if the worker thread is gone.
    pub fn submit(&self, job: StepJob) -> bool {
        match &self.jobs {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    pub fn outcomes(&self) -> &Receiver<StepOutcome> {
        &self.outcomes
    }
}

impl Drop for StepWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn run_job<L: AgentLink + ?Sized>(link: &L, job: StepJob) -> StepOutcome {
    let stored = job.transition.as_ref().map(|t| match link.store_transition(t) {
        Ok(()) => true,
        Err(e) => {
            warn!("StoreTransition failed (done={}): {e}", t.done);
            false
        }
    });

    let mut action_failed = false;
    let action = job.observe.and_then(|obs| {
        let chosen = link
            .get_action(obs.as_slice())
            .map_err(|e| warn!("GetAction failed: {e}"))
            .ok()
            .and_then(|flat| {
                decode_action(&flat, job.variant)
                    .map_err(|e| warn!("rejected action {flat:?}: {e}"))
                    .ok()
            });
        action_failed = chosen.is_none();
        chosen.map(|a| (obs, a))
    });

    StepOutcome {
        seq: job.seq,
        stored,
        action,
        action_failed,
    }
}
