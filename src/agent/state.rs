//! Per-run state machine
//!
//! INIT → SNAPSHOT → CLASSIFY → ROUTE → EXPERTS → SYNTHESIZE → DONE,
//! with ABORTED reachable from any non-terminal state and ERROR from any
//! non-terminal state as well.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Snapshot,
    Classify,
    Route,
    Experts,
    Synthesize,
    Done,
    Aborted,
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted | RunState::Error)
    }

    /// Next stage on the happy path.
    pub fn successor(&self) -> Option<RunState> {
        match self {
            RunState::Init => Some(RunState::Snapshot),
            RunState::Snapshot => Some(RunState::Classify),
            RunState::Classify => Some(RunState::Route),
            RunState::Route => Some(RunState::Experts),
            RunState::Experts => Some(RunState::Synthesize),
            RunState::Synthesize => Some(RunState::Done),
            RunState::Done | RunState::Aborted | RunState::Error => None,
        }
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RunState::Aborted | RunState::Error => true,
            _ => self.successor() == Some(next),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: RunState,
    pub elapsed_ms: u64,
}

/// Mutable state of one run, owned by the orchestrator.
#[derive(Debug)]
pub struct SessionState {
    run_id: Uuid,
    state: RunState,
    stage_timings: Vec<StageTiming>,
    stage_started: Instant,
    run_started: Instant,
}

impl SessionState {
    pub fn new(run_id: Uuid) -> Self {
        let now = Instant::now();
        Self {
            run_id,
            state: RunState::Init,
            stage_timings: Vec::new(),
            stage_started: now,
            run_started: now,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }

    pub fn stage_timings(&self) -> &[StageTiming] {
        &self.stage_timings
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.run_started.elapsed().as_millis() as u64
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestrationError::InvalidTransition(format!(
                "{:?} -> {:?}",
                self.state, next
            )));
        }

        if self.state != RunState::Init {
            self.stage_timings.push(StageTiming {
                stage: self.state,
                elapsed_ms: self.stage_started.elapsed().as_millis() as u64,
            });
        }

        self.state = next;
        self.stage_started = Instant::now();
        Ok(())
    }
}
