use crate::client::WorkerClient;
use crate::dashboard::{Dashboard, DisplayState, ToggleError, ToggleOutcome};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Toggle requests that can wait behind an in-flight poll
const REQUEST_QUEUE_SIZE: usize = 4;

enum Request {
    Toggle {
        reply: Option<oneshot::Sender<Result<ToggleOutcome, ToggleError>>>,
    },
}

/// Owner of the background polling task.
///
/// The task holds the [`Dashboard`]; this handle only sends toggle requests
/// and reads published state. Dropping the handle stops the task.
pub struct DashboardHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<DisplayState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl DashboardHandle {
    /// Start polling. The first tick fires immediately.
    pub fn spawn<C: WorkerClient>(dashboard: Dashboard<C>, tick_interval: Duration) -> Self {
        let state = dashboard.subscribe();
        let (requests, requests_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(control_loop(
            dashboard,
            tick_interval,
            requests_rx,
            shutdown_rx,
        ));

        Self {
            requests,
            state,
            shutdown,
            task: Some(task),
        }
    }

    /// Receiver for rendering; sees every state the loop publishes.
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.state.clone()
    }

    /// Copy of the latest published state.
    pub fn current(&self) -> DisplayState {
        self.state.borrow().clone()
    }

    /// Toggle and wait for the command and its resync fetch to finish.
    pub async fn toggle(&self) -> Result<ToggleOutcome, ToggleError> {
        if self.state.borrow().pending() {
            return Err(ToggleError::Pending);
        }
        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(Request::Toggle { reply: Some(reply) })
            .await
            .map_err(|_| ToggleError::Stopped)?;
        outcome.await.map_err(|_| ToggleError::Stopped)?
    }

    /// Fire-and-forget toggle for synchronous callers such as a key handler.
    pub fn request_toggle(&self) -> Result<(), ToggleError> {
        if self.state.borrow().pending() {
            return Err(ToggleError::Pending);
        }
        self.requests
            .try_send(Request::Toggle { reply: None })
            .map_err(|e| match e {
                TrySendError::Full(_) => ToggleError::Pending,
                TrySendError::Closed(_) => ToggleError::Stopped,
            })
    }

    /// Stop polling and wait for the task to exit. An in-flight request is
    /// allowed to finish; its result is dropped.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Dashboard task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for DashboardHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn control_loop<C: WorkerClient>(
    mut dashboard: Dashboard<C>,
    tick_interval: Duration,
    mut requests: mpsc::Receiver<Request>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Polling worker every {:?}", tick_interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            request = requests.recv() => match request {
                Some(Request::Toggle { reply }) => {
                    let outcome =
                        toggle_rejecting_others(&mut dashboard, &mut requests, &shutdown).await;
                    if let Err(e) = &outcome {
                        debug!("Toggle not performed: {}", e);
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                    // The resync fetch stands in for this tick.
                    ticker.reset();
                }
                None => break,
            },

            _ = ticker.tick() => {
                if !dashboard.begin_poll() {
                    continue;
                }
                let result = dashboard.client().fetch_snapshot().await;
                if *shutdown.borrow() {
                    debug!("Discarding snapshot that completed during shutdown");
                    break;
                }
                let _ = dashboard.apply_fetch(result);
            }
        }
    }

    info!("Stopped polling worker");
}

/// Run one toggle while answering every other toggle request with `Pending`.
///
/// The command and its resync run to completion, but their results are
/// dropped if shutdown was requested in the meantime.
async fn toggle_rejecting_others<C: WorkerClient>(
    dashboard: &mut Dashboard<C>,
    requests: &mut mpsc::Receiver<Request>,
    shutdown: &watch::Receiver<bool>,
) -> Result<ToggleOutcome, ToggleError> {
    let command = dashboard.begin_toggle()?;

    let (ack, resync) = {
        let client = dashboard.client();
        let exchange = async {
            let ack = client.send_command(command).await;
            (ack, client.fetch_snapshot().await)
        };
        tokio::pin!(exchange);

        loop {
            tokio::select! {
                biased;

                results = &mut exchange => break results,

                Some(request) = requests.recv() => {
                    let Request::Toggle { reply } = request;
                    debug!("Rejecting toggle: a command is already in flight");
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(ToggleError::Pending));
                    }
                }
            }
        }
    };

    if *shutdown.borrow() {
        debug!("Discarding {} result that completed during shutdown", command);
        return Err(ToggleError::Stopped);
    }
    Ok(dashboard.finish_toggle(command, ack, resync))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CommandAck, ControlCommand};
    use crate::dashboard::Phase;
    use crate::snapshot::{FetchError, WorkerSnapshot};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;
    use tokio::time::{sleep, Instant};

    /// In-memory worker. Commands block until `release_commands` is called.
    struct FakeWorker {
        state: Mutex<WorkerSnapshot>,
        commands: Mutex<Vec<ControlCommand>>,
        command_gate: Semaphore,
        fetches: AtomicU32,
    }

    impl FakeWorker {
        fn new(gated: bool) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(WorkerSnapshot::default()),
                commands: Mutex::new(Vec::new()),
                command_gate: Semaphore::new(if gated { 0 } else { 1024 }),
                fetches: AtomicU32::new(0),
            })
        }

        fn release_commands(&self) {
            self.command_gate.add_permits(16);
        }

        fn commands(&self) -> Vec<ControlCommand> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl WorkerClient for Arc<FakeWorker> {
        async fn fetch_snapshot(&self) -> Result<WorkerSnapshot, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(*self.state.lock().unwrap())
        }

        async fn send_command(&self, command: ControlCommand) -> Result<CommandAck, FetchError> {
            self.commands.lock().unwrap().push(command);
            let permit = self
                .command_gate
                .acquire()
                .await
                .map_err(|e| FetchError::Unreachable(e.to_string()))?;
            permit.forget();
            let mut state = self.state.lock().unwrap();
            state.is_mining = command == ControlCommand::Start;
            state.mining_rate = if state.is_mining { 2.5 } else { 0.0 };
            Ok(CommandAck {
                status: Some(if state.is_mining { "started" } else { "stopped" }.into()),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_once_per_tick_starting_immediately() {
        let worker = FakeWorker::new(false);
        let handle = DashboardHandle::spawn(
            Dashboard::new(Arc::clone(&worker), 20),
            Duration::from_secs(1),
        );
        let start = Instant::now();
        let mut rx = handle.subscribe();

        rx.wait_for(|s| s.update_count >= 1).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        rx.wait_for(|s| s.update_count >= 3).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "elapsed {:?}", elapsed);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_toggle_is_rejected_while_first_in_flight() {
        let worker = FakeWorker::new(true);
        let handle = Arc::new(DashboardHandle::spawn(
            Dashboard::new(Arc::clone(&worker), 20),
            Duration::from_secs(1),
        ));
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.update_count >= 1).await.unwrap();

        let first = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move { handle.toggle().await }
        });
        rx.wait_for(|s| s.pending()).await.unwrap();
        let during = handle.current();
        assert_eq!(during.phase, Phase::Toggling(ControlCommand::Start));

        assert_eq!(handle.toggle().await, Err(ToggleError::Pending));
        assert_eq!(handle.request_toggle(), Err(ToggleError::Pending));

        // Bypass the handle's own check so the loop itself has to reject.
        let (reply, rejected) = oneshot::channel();
        handle
            .requests
            .send(Request::Toggle { reply: Some(reply) })
            .await
            .unwrap();
        assert_eq!(rejected.await.unwrap(), Err(ToggleError::Pending));

        // Ticks are suspended while toggling.
        let fetches = worker.fetches.load(Ordering::SeqCst);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(worker.fetches.load(Ordering::SeqCst), fetches);
        assert_eq!(handle.current().current, during.current);

        worker.release_commands();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.command, ControlCommand::Start);
        assert!(outcome.current.is_mining);
        assert_eq!(worker.commands(), vec![ControlCommand::Start]);

        let state = handle.current();
        assert!(!state.pending());
        assert!(state.current.is_mining);
        assert_eq!(state.current.mining_rate, 2.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_toggle_discards_resync() {
        let worker = FakeWorker::new(true);
        let handle = Arc::new(DashboardHandle::spawn(
            Dashboard::new(Arc::clone(&worker), 20),
            Duration::from_secs(1),
        ));
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.update_count >= 1).await.unwrap();

        let toggle = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move { handle.toggle().await }
        });
        rx.wait_for(|s| s.pending()).await.unwrap();

        worker.state.lock().unwrap().total_blocks = 77;
        handle.shutdown.send_replace(true);
        worker.release_commands();

        assert_eq!(toggle.await.unwrap(), Err(ToggleError::Stopped));
        if let Some(task) = handle.task.as_ref() {
            while !task.is_finished() {
                sleep(Duration::from_millis(10)).await;
            }
        }

        let last = handle.current();
        assert_eq!(last.current.total_blocks, 0);
        assert_eq!(last.update_count, 1);
        assert_eq!(last.history.len(), 1);
        assert_eq!(worker.commands(), vec![ControlCommand::Start]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_then_toggle_back() {
        let worker = FakeWorker::new(false);
        let handle = DashboardHandle::spawn(
            Dashboard::new(Arc::clone(&worker), 20),
            Duration::from_secs(1),
        );
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.update_count >= 1).await.unwrap();

        assert_eq!(handle.toggle().await.unwrap().command, ControlCommand::Start);
        assert_eq!(handle.toggle().await.unwrap().command, ControlCommand::Stop);
        assert_eq!(
            worker.commands(),
            vec![ControlCommand::Start, ControlCommand::Stop]
        );
        assert!(!handle.current().current.is_mining);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let worker = FakeWorker::new(false);
        let handle = DashboardHandle::spawn(
            Dashboard::new(Arc::clone(&worker), 20),
            Duration::from_secs(1),
        );
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.update_count >= 2).await.unwrap();

        let fetches = worker.fetches.load(Ordering::SeqCst);
        drop(handle);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(worker.fetches.load(Ordering::SeqCst), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_after_shutdown_reports_stopped() {
        let worker = FakeWorker::new(false);
        let handle = DashboardHandle::spawn(
            Dashboard::new(Arc::clone(&worker), 20),
            Duration::from_secs(1),
        );
        handle.shutdown.send_replace(true);
        if let Some(task) = handle.task.as_ref() {
            while !task.is_finished() {
                sleep(Duration::from_millis(10)).await;
            }
        }
        assert_eq!(handle.toggle().await, Err(ToggleError::Stopped));
        assert_eq!(handle.request_toggle(), Err(ToggleError::Stopped));
        assert!(worker.commands().is_empty());
    }
}
