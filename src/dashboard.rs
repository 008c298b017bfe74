use crate::client::{CommandAck, ControlCommand, WorkerClient};
use crate::history::{HistoryBuffer, HistorySample};
use crate::snapshot::{FetchError, WorkerSnapshot};
use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where the control loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the next tick
    Idle,
    /// A `/stats` request is in flight
    Polling,
    /// A start/stop command (and its resync fetch) is in flight
    Toggling(ControlCommand),
    /// The last operation failed. Behaves like `Idle` for ticks and toggles.
    Error,
}

/// Last failure, kept for the error indicator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{command} command failed: {source}")]
    Command {
        command: ControlCommand,
        source: FetchError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ToggleError {
    #[error("a start/stop command is already in flight")]
    Pending,
    #[error("dashboard is shut down")]
    Stopped,
}

/// Result of a completed toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleOutcome {
    pub command: ControlCommand,
    pub ack: Result<CommandAck, FetchError>,
    /// What the resync fetch reported, or the previous snapshot if it failed.
    pub current: WorkerSnapshot,
}

/// Everything the UI shows. Owned and mutated only by [`Dashboard`];
/// renderers get clones through a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub current: WorkerSnapshot,
    pub history: HistoryBuffer,
    pub phase: Phase,
    pub last_error: Option<DashboardError>,
    /// Successful snapshots applied so far.
    pub update_count: u64,
    pub updated_at: Option<DateTime<Local>>,
}

impl DisplayState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            current: WorkerSnapshot::default(),
            history: HistoryBuffer::new(history_capacity),
            phase: Phase::Idle,
            last_error: None,
            update_count: 0,
            updated_at: None,
        }
    }

    /// True exactly while a toggle is in flight.
    pub fn pending(&self) -> bool {
        matches!(self.phase, Phase::Toggling(_))
    }

    /// No snapshot yet and nothing has failed either.
    pub fn is_loading(&self) -> bool {
        self.update_count == 0 && self.last_error.is_none()
    }
}

/// The poll/control state machine.
///
/// Holds the single [`DisplayState`] and publishes a copy after every
/// change. `&mut self` on every transition keeps polls and toggles from
/// overlapping; the `Toggling` phase additionally guards against a second
/// toggle when the transitions are driven step by step.
pub struct Dashboard<C> {
    client: C,
    state: DisplayState,
    publisher: watch::Sender<DisplayState>,
}

impl<C: WorkerClient> Dashboard<C> {
    pub fn new(client: C, history_capacity: usize) -> Self {
        let state = DisplayState::new(history_capacity);
        let (publisher, _) = watch::channel(state.clone());
        Self {
            client,
            state,
            publisher,
        }
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Receiver that sees every published state.
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.publisher.subscribe()
    }

    /// One tick: fetch and apply. Returns `None` when the tick is skipped
    /// because a toggle is in flight.
    pub async fn poll(&mut self) -> Option<Result<WorkerSnapshot, FetchError>> {
        if !self.begin_poll() {
            return None;
        }
        let result = self.client.fetch_snapshot().await;
        Some(self.apply_fetch(result))
    }

    /// Enter `Polling` unless a toggle owns the loop.
    pub fn begin_poll(&mut self) -> bool {
        if self.state.pending() {
            debug!("Skipping tick while a toggle is in flight");
            return false;
        }
        self.state.phase = Phase::Polling;
        self.publish();
        true
    }

    /// Apply a tick's fetch result and go back to waiting.
    pub fn apply_fetch(
        &mut self,
        result: Result<WorkerSnapshot, FetchError>,
    ) -> Result<WorkerSnapshot, FetchError> {
        let result = self.record_fetch(result);
        self.state.phase = if result.is_ok() {
            Phase::Idle
        } else {
            Phase::Error
        };
        self.publish();
        result
    }

    /// Send the command opposite to the worker's reported state, then
    /// re-fetch so the display reflects what the worker actually did.
    ///
    /// `is_mining` is never flipped locally; only the resync fetch changes it.
    pub async fn toggle(&mut self) -> Result<ToggleOutcome, ToggleError> {
        let command = self.begin_toggle()?;
        let ack = self.client.send_command(command).await;
        let resync = self.client.fetch_snapshot().await;
        Ok(self.finish_toggle(command, ack, resync))
    }

    /// Enter `Toggling` and pick the command. Rejected while pending.
    pub fn begin_toggle(&mut self) -> Result<ControlCommand, ToggleError> {
        if self.state.pending() {
            debug!("Ignoring toggle: a command is already in flight");
            return Err(ToggleError::Pending);
        }
        let command = ControlCommand::toggling(self.state.current.is_mining);
        info!("Sending {} command to worker", command);
        self.state.phase = Phase::Toggling(command);
        self.publish();
        Ok(command)
    }

    /// Apply the command result and the resync fetch, then release the guard.
    pub fn finish_toggle(
        &mut self,
        command: ControlCommand,
        ack: Result<CommandAck, FetchError>,
        resync: Result<WorkerSnapshot, FetchError>,
    ) -> ToggleOutcome {
        match &ack {
            Ok(ack) => info!(
                "Worker acknowledged {}: {}",
                command,
                ack.status.as_deref().unwrap_or("ok")
            ),
            Err(e) => warn!("{} command failed: {}", command, e),
        }

        let _ = self.record_fetch(resync);
        if let Err(source) = &ack {
            // Outlives the resync so the indicator shows why nothing changed.
            self.state.last_error = Some(DashboardError::Command {
                command,
                source: source.clone(),
            });
        }

        self.state.phase = if self.state.last_error.is_some() {
            Phase::Error
        } else {
            Phase::Idle
        };
        self.publish();

        ToggleOutcome {
            command,
            ack,
            current: self.state.current,
        }
    }

    /// Update snapshot, history and error record. Leaves the phase alone.
    fn record_fetch(
        &mut self,
        result: Result<WorkerSnapshot, FetchError>,
    ) -> Result<WorkerSnapshot, FetchError> {
        match &result {
            Ok(snapshot) => {
                debug!(
                    "Snapshot: {} blocks, {:.2} blocks/s, mining={}",
                    snapshot.total_blocks, snapshot.mining_rate, snapshot.is_mining
                );
                if self.state.last_error.is_some() {
                    info!("Worker reachable again");
                }
                self.state.current = *snapshot;
                self.state
                    .history
                    .append(HistorySample::now(snapshot.mining_rate));
                self.state.last_error = None;
                self.state.update_count += 1;
                self.state.updated_at = Some(Local::now());
            }
            Err(e) => {
                let error = DashboardError::Fetch(e.clone());
                // Only log on change; an offline worker would otherwise warn every tick.
                if self.state.last_error.as_ref() != Some(&error) {
                    warn!("Failed to fetch worker stats: {}", e);
                } else {
                    debug!("Still failing to fetch worker stats: {}", e);
                }
                self.state.last_error = Some(error);
            }
        }
        result
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.clone());
    }
}
