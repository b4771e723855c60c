//! Runtime Adapters (spec §4.E): the common `Run(RunSpec) -> RunResult`
//! contract plus the Host, Container A (Docker-style), and Container B
//! (Apptainer-style) implementations.

mod container_apptainer;
mod container_docker;
mod host;

pub mod cancellation;

use async_trait::async_trait;
use indexmap::IndexMap;
use wfl_types::{ExecutionKind, GpuRequirement};

pub use cancellation::{CancellationSource, CancellationToken};
pub use container_apptainer::ApptainerAdapter;
pub use container_docker::DockerAdapter;
pub use host::HostAdapter;

/// A host bind mount: `host_path` made visible inside the container at
/// `container_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// The argv, environment, and container configuration for one invocation
/// (spec §4.E "Common contract").
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub argv: Vec<String>,
    pub work_dir: String,
    pub env: IndexMap<String, String>,
    pub stdin_path: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub image: Option<String>,
    pub volumes: Vec<Volume>,
    pub gpu: Option<GpuRequirement>,
    /// Set by Adapter B when the tool requests `dockerOutputDirectory`: the
    /// container path whose contents should be copied back to `work_dir`
    /// after the run completes.
    pub docker_output_directory: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout_capture: Option<String>,
    pub stderr_capture: Option<String>,
}

/// The contract every Runtime Adapter implements (spec §4.E).
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    async fn run(&self, spec: &RunSpec, cancel: CancellationToken) -> Result<RunResult, ExecutionKind>;
}
