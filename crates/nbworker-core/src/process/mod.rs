//! Worker process lifecycle: environment preparation and detached launch.

pub mod environment;
pub mod launcher;
pub mod worker;

pub use environment::{ProjectEnvironment, WorkerEnvironment};
pub use launcher::{platform_launcher, PowerShellLauncher, ProcessLauncher, SessionLauncher, SpawnSpec};
pub use worker::{worker_spawn_spec, StartOutcome, WorkerLauncher};
