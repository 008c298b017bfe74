use crate::config::{DashConfig, Endpoints};
use crate::snapshot::{decode_snapshot, FetchError, WorkerSnapshot};
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use tracing::debug;

/// Start/stop command sent to the worker's control endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
}

impl ControlCommand {
    /// The command that flips the worker out of its reported state.
    pub fn toggling(is_mining: bool) -> Self {
        if is_mining {
            ControlCommand::Stop
        } else {
            ControlCommand::Start
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Start => write!(f, "start"),
            ControlCommand::Stop => write!(f, "stop"),
        }
    }
}

/// Worker's reply to a control command.
///
/// The worker reports `started`, `already_running`, `stopped` or
/// `not_running`; an empty or unreadable body leaves `status` unset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub status: Option<String>,
}

impl CommandAck {
    fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Transport to the worker. The dashboard only ever talks to the worker
/// through this trait.
pub trait WorkerClient: Send + Sync + 'static {
    fn fetch_snapshot(&self) -> impl Future<Output = Result<WorkerSnapshot, FetchError>> + Send;

    fn send_command(
        &self,
        command: ControlCommand,
    ) -> impl Future<Output = Result<CommandAck, FetchError>> + Send;
}

/// [`WorkerClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpWorkerClient {
    pub fn new(config: &DashConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Unreachable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoints: config.endpoints(),
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Hit the worker's root endpoint; any 2xx counts as healthy.
    pub async fn probe_health(&self) -> Result<(), FetchError> {
        let response = self
            .http
            .get(&self.endpoints.health)
            .send()
            .await
            .map_err(unreachable)?;
        check_status(&response)?;
        Ok(())
    }
}

impl WorkerClient for HttpWorkerClient {
    async fn fetch_snapshot(&self) -> Result<WorkerSnapshot, FetchError> {
        let response = self
            .http
            .get(&self.endpoints.stats)
            .send()
            .await
            .map_err(unreachable)?;
        check_status(&response)?;
        let body = response.bytes().await.map_err(unreachable)?;
        decode_snapshot(&body)
    }

    async fn send_command(&self, command: ControlCommand) -> Result<CommandAck, FetchError> {
        let url = match command {
            ControlCommand::Start => &self.endpoints.start,
            ControlCommand::Stop => &self.endpoints.stop,
        };
        let response = self.http.post(url).send().await.map_err(unreachable)?;
        check_status(&response)?;
        // The body is informational only; a read failure here does not undo the command.
        let ack = match response.bytes().await {
            Ok(body) => CommandAck::from_body(&body),
            Err(e) => {
                debug!("Could not read {} acknowledgement: {}", command, e);
                CommandAck::default()
            }
        };
        Ok(ack)
    }
}

fn unreachable(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Unreachable(format!("request timed out: {}", error))
    } else {
        FetchError::Unreachable(error.to_string())
    }
}

fn check_status(response: &reqwest::Response) -> Result<(), FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(FetchError::BadStatus(status.as_u16()))
    }
}
