//! Container adapter A (spec §4.E, Docker-style): `docker run --rm -i` with
//! bind mounts, env flags, and GPU flags, working directory
//! `/var/spool/cwl`.

use async_trait::async_trait;
use wfl_types::{ExecutionKind, GpuRequirement};

use super::host::spawn_and_capture;
use super::{CancellationToken, RunResult, RunSpec, RuntimeAdapter};

const CONTAINER_WORKDIR: &str = "/var/spool/cwl";

#[derive(Debug, Default)]
pub struct DockerAdapter;

#[async_trait]
impl RuntimeAdapter for DockerAdapter {
    async fn run(&self, spec: &RunSpec, cancel: CancellationToken) -> Result<RunResult, ExecutionKind> {
        let image = spec.image.as_deref().ok_or_else(|| ExecutionKind::SpawnFailed("no image declared for container execution".to_string()))?;
        let argv = build_docker_argv(spec, image);
        spawn_and_capture(&argv, &spec.work_dir, &spec.env, spec.stdin_path.as_deref(), spec.stdout_path.as_deref(), spec.stderr_path.as_deref(), cancel).await
    }
}

fn build_docker_argv(spec: &RunSpec, image: &str) -> Vec<String> {
    let mut argv = vec!["docker".to_string(), "run".to_string(), "--rm".to_string(), "-i".to_string()];

    for volume in &spec.volumes {
        let mode = if volume.read_only { "ro" } else { "rw" };
        argv.push("-v".to_string());
        argv.push(format!("{}:{}:{}", volume.host_path, volume.container_path, mode));
    }

    for (name, value) in &spec.env {
        argv.push("-e".to_string());
        argv.push(format!("{name}={value}"));
    }

    if let Some(gpu) = &spec.gpu {
        argv.push("--gpus".to_string());
        argv.push(gpu_flag_value(gpu));
    }

    argv.push("-w".to_string());
    argv.push(CONTAINER_WORKDIR.to_string());

    argv.push(image.to_string());
    argv.extend(spec.argv.iter().cloned());
    argv
}

fn gpu_flag_value(gpu: &GpuRequirement) -> String {
    if gpu.all || gpu.device_ids.is_empty() {
        "all".to_string()
    } else {
        format!("device={}", gpu.device_ids.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_argv_places_image_and_workdir_before_user_argv() {
        let spec = RunSpec { argv: vec!["echo".into(), "hi".into()], image: Some("alpine:3".into()), ..Default::default() };
        let argv = build_docker_argv(&spec, "alpine:3");
        assert_eq!(argv, vec!["docker", "run", "--rm", "-i", "-w", "/var/spool/cwl", "alpine:3", "echo", "hi"]);
    }

    #[test]
    fn build_argv_adds_bind_mounts_and_gpu_flags() {
        let spec = RunSpec {
            argv: vec!["true".into()],
            image: Some("alpine:3".into()),
            volumes: vec![super::super::Volume { host_path: "/host/a".into(), container_path: "/in/a".into(), read_only: true }],
            gpu: Some(GpuRequirement { device_ids: vec![0, 1], all: false }),
            ..Default::default()
        };
        let argv = build_docker_argv(&spec, "alpine:3");
        assert!(argv.windows(2).any(|w| w == ["-v", "/host/a:/in/a:ro"]));
        assert!(argv.windows(2).any(|w| w == ["--gpus", "device=0,1"]));
    }

    #[test]
    fn gpu_all_flag_is_used_when_no_device_ids_declared() {
        let gpu = GpuRequirement { device_ids: Vec::new(), all: true };
        assert_eq!(gpu_flag_value(&gpu), "all");
    }
}
