//! Container adapter B (spec §4.E, Apptainer/Singularity-style): `apptainer
//! exec --bind --pwd --env --nv docker://<image>` plus the
//! `dockerOutputDirectory` copy-back indirection.

use async_trait::async_trait;
use wfl_types::ExecutionKind;

use super::host::spawn_and_capture;
use super::{CancellationToken, RunResult, RunSpec, RuntimeAdapter};

#[derive(Debug, Default)]
pub struct ApptainerAdapter;

#[async_trait]
impl RuntimeAdapter for ApptainerAdapter {
    async fn run(&self, spec: &RunSpec, cancel: CancellationToken) -> Result<RunResult, ExecutionKind> {
        let image = spec.image.as_deref().ok_or_else(|| ExecutionKind::SpawnFailed("no image declared for container execution".to_string()))?;
        let argv = build_apptainer_argv(spec, image);
        let result = spawn_and_capture(&argv, &spec.work_dir, &spec.env, spec.stdin_path.as_deref(), spec.stdout_path.as_deref(), spec.stderr_path.as_deref(), cancel).await?;

        if let Some(container_dir) = &spec.docker_output_directory {
            copy_back_output_directory(spec, container_dir)?;
        }

        Ok(result)
    }
}

fn build_apptainer_argv(spec: &RunSpec, image: &str) -> Vec<String> {
    let mut argv = vec!["apptainer".to_string(), "exec".to_string()];

    for volume in &spec.volumes {
        let mode = if volume.read_only { "ro" } else { "rw" };
        argv.push("--bind".to_string());
        argv.push(format!("{}:{}:{}", volume.host_path, volume.container_path, mode));
    }

    argv.push("--pwd".to_string());
    argv.push(spec.work_dir.clone());

    for (name, value) in &spec.env {
        argv.push("--env".to_string());
        argv.push(format!("{name}={value}"));
    }

    if spec.gpu.is_some() {
        argv.push("--nv".to_string());
    }

    argv.push(format!("docker://{image}"));
    argv.extend(spec.argv.iter().cloned());
    argv
}

/// The `dockerOutputDirectory` indirection (spec §4.E "Adapter B
/// additionally implements..."): a second host directory was bind-mounted
/// at `container_dir`; once the run completes, its contents are copied
/// back into the task working directory.
fn copy_back_output_directory(spec: &RunSpec, container_dir: &str) -> Result<(), ExecutionKind> {
    let Some(volume) = spec.volumes.iter().find(|v| v.container_path == container_dir) else {
        return Err(ExecutionKind::SpawnFailed(format!("dockerOutputDirectory '{container_dir}' has no matching bind mount")));
    };

    let entries = std::fs::read_dir(&volume.host_path).map_err(|e| ExecutionKind::SpawnFailed(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| ExecutionKind::SpawnFailed(e.to_string()))?;
        let dest = std::path::Path::new(&spec.work_dir).join(entry.file_name());
        std::fs::copy(entry.path(), dest).map_err(|e| ExecutionKind::SpawnFailed(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_argv_places_image_after_bind_and_env_flags() {
        let spec = RunSpec { argv: vec!["echo".into(), "hi".into()], work_dir: "/task".into(), image: Some("alpine:3".into()), ..Default::default() };
        let argv = build_apptainer_argv(&spec, "alpine:3");
        assert_eq!(argv, vec!["apptainer", "exec", "--pwd", "/task", "docker://alpine:3", "echo", "hi"]);
    }

    #[test]
    fn gpu_requirement_adds_nv_flag() {
        let spec = RunSpec {
            argv: vec!["true".into()],
            image: Some("alpine:3".into()),
            gpu: Some(wfl_types::GpuRequirement { device_ids: Vec::new(), all: true }),
            ..Default::default()
        };
        let argv = build_apptainer_argv(&spec, "alpine:3");
        assert!(argv.contains(&"--nv".to_string()));
    }

    #[test]
    fn copy_back_output_directory_copies_files_into_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let container_output = dir.path().join("container-out");
        let work_dir = dir.path().join("task-1");
        std::fs::create_dir_all(&container_output).unwrap();
        std::fs::create_dir_all(&work_dir).unwrap();
        std::fs::write(container_output.join("result.txt"), b"ok").unwrap();

        let spec = RunSpec {
            work_dir: work_dir.display().to_string(),
            volumes: vec![super::super::Volume { host_path: container_output.display().to_string(), container_path: "/out".into(), read_only: false }],
            docker_output_directory: Some("/out".into()),
            ..Default::default()
        };

        copy_back_output_directory(&spec, "/out").unwrap();
        assert_eq!(std::fs::read_to_string(work_dir.join("result.txt")).unwrap(), "ok");
    }
}
