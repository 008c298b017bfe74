pub mod client;
pub mod config;
pub mod dashboard;
pub mod history;
pub mod retry;
pub mod runner;
pub mod snapshot;
pub mod ui;

pub use client::{CommandAck, ControlCommand, HttpWorkerClient, WorkerClient};
pub use config::{DashConfig, Endpoints};
pub use dashboard::{Dashboard, DashboardError, DisplayState, Phase, ToggleError, ToggleOutcome};
pub use history::{HistoryBuffer, HistorySample};
pub use runner::DashboardHandle;
pub use snapshot::{FetchError, WorkerSnapshot};
