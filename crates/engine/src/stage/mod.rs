//! The Staging Layer (spec §4.D): moves file objects into and out of a
//! per-task working directory through a two-operation interface, plus the
//! working-directory symlink and container bind-mount policies the
//! Execution Engine applies around it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use wfl_types::{FileObject, StageKind};

/// `StageIn`/`StageOut` (spec §4.D): the interface the Scheduler and Engine
/// consume without caring which scheme backs a given location.
#[async_trait]
pub trait Stager: Send + Sync {
    /// Copies the file referenced by `location` into `dest_path` on the host.
    async fn stage_in(&self, location: &str, dest_path: &Path) -> Result<(), StageKind>;

    /// Makes `src_path` visible to the submitter, returning the location it
    /// is now reachable at.
    async fn stage_out(&self, src_path: &Path, task_id: &str) -> Result<String, StageKind>;
}

/// Handles `file://` locations by copying between host paths.
#[derive(Debug, Default)]
pub struct FileStager;

#[async_trait]
impl Stager for FileStager {
    async fn stage_in(&self, location: &str, dest_path: &Path) -> Result<(), StageKind> {
        let source = strip_file_scheme(location).ok_or_else(|| StageKind::UnsupportedScheme(location.to_string()))?;
        tokio::fs::copy(source, dest_path).await.map_err(|e| StageKind::StageInFailed { location: location.to_string(), reason: e.to_string() })?;
        Ok(())
    }

    async fn stage_out(&self, src_path: &Path, _task_id: &str) -> Result<String, StageKind> {
        Ok(format!("file://{}", src_path.display()))
    }
}

/// Routes `StageIn`/`StageOut` calls to the handler registered for a
/// location's URI scheme (spec §4.D "Composite Stager"); unknown schemes
/// fail with [`StageKind::UnsupportedScheme`] rather than panicking, the
/// same "one trait, pluggable backends" shape the Executor Registry uses.
#[derive(Default)]
pub struct CompositeStager {
    handlers: HashMap<String, Box<dyn Stager>>,
}

impl CompositeStager {
    pub fn new() -> Self {
        let mut composite = Self::default();
        composite.register("file", Box::new(FileStager));
        composite
    }

    pub fn register(&mut self, scheme: &str, handler: Box<dyn Stager>) {
        self.handlers.insert(scheme.to_string(), handler);
    }

    fn handler_for(&self, location: &str) -> Result<&dyn Stager, StageKind> {
        let scheme = scheme_of(location).ok_or_else(|| StageKind::UnsupportedScheme(location.to_string()))?;
        self.handlers.get(scheme).map(|h| h.as_ref()).ok_or_else(|| StageKind::UnsupportedScheme(scheme.to_string()))
    }
}

#[async_trait]
impl Stager for CompositeStager {
    async fn stage_in(&self, location: &str, dest_path: &Path) -> Result<(), StageKind> {
        self.handler_for(location)?.stage_in(location, dest_path).await
    }

    async fn stage_out(&self, src_path: &Path, task_id: &str) -> Result<String, StageKind> {
        // Outbound transfers always land back through the file scheme: the
        // working directory is itself a host path.
        self.handlers.get("file").ok_or_else(|| StageKind::UnsupportedScheme("file".to_string()))?.stage_out(src_path, task_id).await
    }
}

fn scheme_of(location: &str) -> Option<&str> {
    location.split_once("://").map(|(scheme, _)| scheme)
}

fn strip_file_scheme(location: &str) -> Option<&str> {
    location.strip_prefix("file://")
}

/// Creates a symlink in `work_dir` pointing at `file`'s resolved host path,
/// named by its `basename`, so relative paths in tool commands resolve
/// (spec §4.D "Working-directory policy").
pub fn symlink_into_workdir(file: &FileObject, work_dir: &Path) -> Result<PathBuf, StageKind> {
    let link_path = work_dir.join(&file.basename);
    if link_path.exists() || link_path.is_symlink() {
        std::fs::remove_file(&link_path).map_err(|e| StageKind::StageInFailed { location: file.location.clone(), reason: e.to_string() })?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(&file.path, &link_path).map_err(|e| StageKind::StageInFailed { location: file.location.clone(), reason: e.to_string() })?;
    #[cfg(not(unix))]
    std::fs::copy(&file.path, &link_path).map_err(|e| StageKind::StageInFailed { location: file.location.clone(), reason: e.to_string() })?;
    Ok(link_path)
}

/// A host-path/container-path bind mount pair: the container always sees an
/// input file at the path it was originally configured for, read-only
/// (spec §4.D "For container executions...").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Resolves symlinks in `file.path` and returns the read-only bind mount a
/// Container adapter should add so the command sees the path it expects.
pub fn bind_mount_for(file: &FileObject) -> Result<BindMount, StageKind> {
    let resolved = std::fs::canonicalize(&file.path).map_err(|e| StageKind::StageInFailed { location: file.location.clone(), reason: e.to_string() })?;
    Ok(BindMount { host_path: resolved.display().to_string(), container_path: file.path.clone(), read_only: true })
}
