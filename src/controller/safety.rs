use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{info, warn};

/// Safety gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyState {
    /// Initial state; also the state after shutdown
    Disabled,
    Armed,
    Active,
    Faulted,
}

/// Four-state safety gate.
///
/// The state is advisory: the control tick does not consult it yet. It is the
/// hook where interlock logic (e.g. forcing Q=0 while faulted) will attach.
#[derive(Debug, Clone)]
pub struct SafetyStateMachine {
    state: SafetyState,
    since: DateTime<Utc>,
}

impl Default for SafetyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyStateMachine {
    pub fn new() -> Self {
        Self {
            state: SafetyState::Disabled,
            since: Utc::now(),
        }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    /// Time of the last transition
    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub fn arm(&mut self) {
        self.transition(SafetyState::Armed);
    }

    pub fn activate(&mut self) {
        self.transition(SafetyState::Active);
    }

    pub fn fault(&mut self, reason: &str) {
        warn!(from = %self.state, reason, "safety fault");
        self.transition(SafetyState::Faulted);
    }

    pub fn disable(&mut self) {
        self.transition(SafetyState::Disabled);
    }

    fn transition(&mut self, next: SafetyState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "safety state transition");
        }
        self.state = next;
        self.since = Utc::now();
    }
}
