use std::time::Duration;

/// Where a mount call is in its launch/wait cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    Idle,
    Launching { attempt: u32 },
    AwaitingReady { attempt: u32 },
    Ready { attempt: u32 },
    Failed { attempt: u32, reason: String },
}

impl MountState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MountState::Ready { .. } | MountState::Failed { .. })
    }
}

/// Per-call retry bookkeeping. Lives only for the duration of one mount call.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
    /// Upper bound of one readiness wait.
    pub per_attempt_timeout: Duration,
    pub state: MountState,
    history: Vec<MountState>,
}

impl RetryState {
    pub fn new(max_attempts: u32, per_attempt_timeout: Duration) -> Self {
        tracing::debug!(
            "Initializing retry state: max_attempts={}, per_attempt_timeout={:?}",
            max_attempts,
            per_attempt_timeout
        );
        Self {
            attempt: 0,
            max_attempts,
            per_attempt_timeout,
            state: MountState::Idle,
            history: vec![MountState::Idle],
        }
    }

    fn transition(&mut self, next: MountState) {
        tracing::debug!("Mount state {:?} -> {:?}", self.state, next);
        self.state = next.clone();
        self.history.push(next);
    }

    /// Start the next launch. Returns its 1-indexed attempt number.
    pub fn begin_launch(&mut self) -> u32 {
        self.attempt += 1;
        self.transition(MountState::Launching {
            attempt: self.attempt,
        });
        self.attempt
    }

    pub fn awaiting_ready(&mut self) {
        self.transition(MountState::AwaitingReady {
            attempt: self.attempt,
        });
    }

    pub fn on_ready(&mut self) {
        self.transition(MountState::Ready {
            attempt: self.attempt,
        });
    }

    pub fn on_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(
            "Mount failed on attempt {}/{}: {}",
            self.attempt,
            self.max_attempts,
            reason
        );
        self.transition(MountState::Failed {
            attempt: self.attempt,
            reason,
        });
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Every state visited, in order, starting with `Idle`.
    pub fn history(&self) -> &[MountState] {
        &self.history
    }
}
