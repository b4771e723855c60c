//! The Execution Engine (spec §4.G): owns one step invocation end-to-end —
//! merge defaults → build the runtime context → build the command (4.C) →
//! stage inputs (4.D) → run (4.E) → classify the exit code → collect
//! outputs (4.F). Every error is wrapped with the phase tag it originated
//! from (spec §7 "Propagation policy") so the Scheduler can report which
//! step of the pipeline failed without re-deriving it from the error value.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use wfl_types::{FileObject, RuntimeContext, StageKind, Tool, Value, LOAD_CONTENTS_LIMIT};

use crate::collect;
use crate::command;
use crate::runtime::{ApptainerAdapter, CancellationToken, DockerAdapter, HostAdapter, RunSpec, RuntimeAdapter, Volume};
use crate::stage;

/// Which backend a caller wants the Engine to use for this invocation.
/// `Auto` applies the policy spec §4.G step 5 describes; the other three
/// force a specific adapter, the shape the Container/Apptainer Executors
/// need (spec §4.I: "a thin shell over Runtime Adapter A/B").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeChoice {
    Auto,
    Host,
    Docker,
    Apptainer,
}

/// One step invocation's result: the three-way exit-code classification
/// spec §4.G step 6 describes, plus whatever the Output Collector produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    PermanentFailure,
    RetryableFailure,
}

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub outputs: IndexMap<String, Value>,
    pub exit_code: i32,
    pub stdout_capture: Option<String>,
    pub stderr_capture: Option<String>,
    pub outcome: ExitOutcome,
}

/// An Engine-level error wrapped with the phase it originated in (spec §7).
#[derive(Debug, Error)]
#[error("{phase}: {source}")]
pub struct PhaseError {
    pub phase: &'static str,
    #[source]
    pub source: wfl_types::WflError,
}

fn phase_err(phase: &'static str, source: impl Into<wfl_types::WflError>) -> PhaseError {
    PhaseError { phase, source: source.into() }
}

/// Cores/RAM requested by a step's hints (spec §4.G step 2: "min takes
/// precedence, then the bare field").
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceRequest {
    pub cores_min: Option<f64>,
    pub cores: Option<f64>,
    pub ram_min_mb: Option<f64>,
    pub ram_mb: Option<f64>,
}

impl ResourceRequest {
    fn cores(&self) -> u32 {
        self.cores_min.or(self.cores).unwrap_or(1.0).ceil().max(1.0) as u32
    }

    fn ram_mb(&self) -> u64 {
        self.ram_min_mb.or(self.ram_mb).unwrap_or(1024.0).max(0.0) as u64
    }
}

pub struct ExecutionEngine {
    pub suppress_container: bool,
}

impl ExecutionEngine {
    pub fn new(suppress_container: bool) -> Self {
        Self { suppress_container }
    }

    /// Runs one step invocation of `tool` against `inputs` inside `work_dir`,
    /// choosing a Runtime Adapter per `choice` (spec §4.G).
    pub async fn execute(
        &self,
        tool: &Tool,
        inputs: &IndexMap<String, Value>,
        work_dir: &Path,
        namespaces: &IndexMap<String, String>,
        resources: ResourceRequest,
        choice: RuntimeChoice,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome, PhaseError> {
        let merged = merge_defaults_and_load_contents(tool, inputs).map_err(|e| phase_err("validate", e))?;

        let tmp_dir = work_dir.join("_tmp");
        std::fs::create_dir_all(&tmp_dir).map_err(wfl_types::WflError::from).map_err(|e| phase_err("validate", e))?;
        let runtime_ctx = RuntimeContext::for_command_building(work_dir.display().to_string(), tmp_dir.display().to_string(), resources.cores(), resources.ram_mb());

        let plan = command::build_command(tool, &merged, &runtime_ctx).map_err(|e| phase_err("build_command", e))?;

        let volumes = self.stage_in(&merged, work_dir).map_err(|e| phase_err("stage_in", e))?;

        let image = tool.hints.docker_image.clone();
        let run_spec = RunSpec {
            argv: plan.argv,
            work_dir: work_dir.display().to_string(),
            env: tool.requirements.env_var_requirement.clone(),
            stdin_path: plan.stdin_path,
            stdout_path: plan.stdout_path,
            stderr_path: plan.stderr_path,
            image: image.clone(),
            volumes,
            gpu: tool.requirements.gpu.clone(),
            docker_output_directory: tool.requirements.docker_output_directory.clone(),
        };

        let adapter = self.select_adapter(choice, image.as_deref());
        let run_result = adapter.run(&run_spec, cancel).await.map_err(|e| phase_err("execute", e))?;

        let outcome = if tool.exit_is_success(run_result.exit_code) {
            ExitOutcome::Success
        } else if tool.exit_is_permanent_failure(run_result.exit_code) {
            ExitOutcome::PermanentFailure
        } else {
            ExitOutcome::RetryableFailure
        };

        let outputs = collect::collect_outputs(tool, work_dir, &run_result, &merged, &runtime_ctx, namespaces).map_err(|e| phase_err("collect_outputs", e))?;

        Ok(EngineOutcome { outputs, exit_code: run_result.exit_code, stdout_capture: run_result.stdout_capture, stderr_capture: run_result.stderr_capture, outcome })
    }

    fn select_adapter(&self, choice: RuntimeChoice, image: Option<&str>) -> Box<dyn RuntimeAdapter> {
        let wants_container = image.is_some() && !self.suppress_container;
        match choice {
            RuntimeChoice::Host => Box::new(HostAdapter),
            RuntimeChoice::Docker => Box::new(DockerAdapter),
            RuntimeChoice::Apptainer => Box::new(ApptainerAdapter),
            RuntimeChoice::Auto if wants_container => Box::new(DockerAdapter),
            RuntimeChoice::Auto => Box::new(HostAdapter),
        }
    }

    /// Symlinks every File input into `work_dir` and, for container runs,
    /// returns the read-only bind mounts each resolved host path needs
    /// (spec §4.D "Working-directory policy").
    fn stage_in(&self, inputs: &IndexMap<String, Value>, work_dir: &Path) -> Result<Vec<Volume>, StageKind> {
        let mut volumes = Vec::new();
        for value in inputs.values() {
            collect_files(value, &mut |file| {
                stage::symlink_into_workdir(file, work_dir)?;
                let mount = stage::bind_mount_for(file)?;
                volumes.push(Volume { host_path: mount.host_path, container_path: mount.container_path, read_only: mount.read_only });
                Ok(())
            })?;
        }
        Ok(volumes)
    }
}

fn collect_files(value: &Value, visit: &mut impl FnMut(&FileObject) -> Result<(), StageKind>) -> Result<(), StageKind> {
    match value {
        Value::File(file) => visit(file),
        Value::List(items) => {
            for item in items {
                collect_files(item, visit)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for item in map.values() {
                collect_files(item, visit)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Merges tool defaults into absent inputs and applies `loadContents` to
/// flagged file inputs, failing per-file over the 64 KiB limit (spec §4.G
/// step 1).
fn merge_defaults_and_load_contents(tool: &Tool, inputs: &IndexMap<String, Value>) -> Result<IndexMap<String, Value>, StageKind> {
    let mut merged = inputs.clone();
    for (id, decl) in &tool.inputs {
        let absent = !merged.contains_key(id) || matches!(merged.get(id), Some(Value::Null));
        if absent {
            if let Some(default) = &decl.default {
                merged.insert(id.clone(), Value::from_json(default.clone()));
            }
        }
        if decl.load_contents {
            if let Some(Value::File(file)) = merged.get_mut(id) {
                load_contents_into(file)?;
            }
        }
    }
    Ok(merged)
}

pub(crate) fn load_contents_into(file: &mut FileObject) -> Result<(), StageKind> {
    let path = PathBuf::from(&file.path);
    let bytes = std::fs::read(&path).map_err(|e| StageKind::StageInFailed { location: file.location.clone(), reason: e.to_string() })?;
    if bytes.len() > LOAD_CONTENTS_LIMIT {
        return Err(StageKind::StageInFailed { location: file.location.clone(), reason: format!("exceeds loadContents limit of {LOAD_CONTENTS_LIMIT} bytes") });
    }
    file.contents = Some(String::from_utf8_lossy(&bytes).into_owned());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cancellation::CancellationSource;
    use wfl_types::{BaseCommand, DocumentClass, InputBinding, OutputBinding, ToolInput, ToolOutput, ToolRequirements};

    fn echo_tool() -> Tool {
        Tool {
            id: "echo".into(),
            class: DocumentClass::CommandLineTool,
            base_command: Some(BaseCommand::Single("echo".into())),
            arguments: Vec::new(),
            inputs: {
                let mut m = IndexMap::new();
                m.insert(
                    "message".into(),
                    ToolInput {
                        id: "message".into(),
                        type_tag: "string".into(),
                        default: None,
                        input_binding: Some(InputBinding { position: 1, ..Default::default() }),
                        item_input_binding: None,
                        record_fields: Vec::new(),
                        secondary_files: Vec::new(),
                        load_contents: false,
                    },
                );
                m
            },
            outputs: {
                let mut m = IndexMap::new();
                m.insert("out".into(), ToolOutput { id: "out".into(), type_tag: "stdout".into(), output_binding: None, secondary_files: Vec::new(), record_fields: Vec::new(), format: None });
                m
            },
            success_codes: Vec::new(),
            permanent_fail_codes: Vec::new(),
            temporary_fail_codes: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            requirements: ToolRequirements::default(),
            hints: Default::default(),
        }
    }

    #[tokio::test]
    async fn echo_tool_scenario_produces_stdout_file_with_contents() {
        let dir = tempfile::tempdir().unwrap();
        let tool = echo_tool();
        let mut inputs = IndexMap::new();
        inputs.insert("message".into(), Value::String("hello world".into()));

        let engine = ExecutionEngine::new(true);
        let (_source, token) = CancellationSource::new();
        let outcome = engine
            .execute(&tool, &inputs, dir.path(), &IndexMap::new(), ResourceRequest::default(), RuntimeChoice::Host, token)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.outcome, ExitOutcome::Success);
        let Value::File(file) = &outcome.outputs["out"] else { panic!("expected file output") };
        assert_eq!(file.basename, "cwl.stdout.txt");
    }

    #[tokio::test]
    async fn touch_with_glob_scenario_names_output_by_input_filename() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = echo_tool();
        tool.base_command = Some(BaseCommand::Single("touch".into()));
        tool.inputs.clear();
        tool.inputs.insert(
            "filename".into(),
            ToolInput {
                id: "filename".into(),
                type_tag: "string".into(),
                default: None,
                input_binding: Some(InputBinding { position: 1, ..Default::default() }),
                item_input_binding: None,
                record_fields: Vec::new(),
                secondary_files: Vec::new(),
                load_contents: false,
            },
        );
        tool.outputs.clear();
        tool.outputs.insert(
            "result".into(),
            ToolOutput { id: "result".into(), type_tag: "File".into(), output_binding: Some(OutputBinding { glob: vec!["*.txt".into()], ..Default::default() }), secondary_files: Vec::new(), record_fields: Vec::new(), format: None },
        );

        let mut inputs = IndexMap::new();
        inputs.insert("filename".into(), Value::String("test-output.txt".into()));

        let engine = ExecutionEngine::new(true);
        let (_source, token) = CancellationSource::new();
        let outcome = engine
            .execute(&tool, &inputs, dir.path(), &IndexMap::new(), ResourceRequest::default(), RuntimeChoice::Host, token)
            .await
            .unwrap();

        let Value::File(file) = &outcome.outputs["result"] else { panic!("expected file output") };
        assert_eq!(file.basename, "test-output.txt");
    }

    #[tokio::test]
    async fn permanent_failure_code_is_classified_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = echo_tool();
        tool.base_command = Some(BaseCommand::Single("false".into()));
        tool.inputs.clear();
        tool.outputs.clear();
        tool.permanent_fail_codes = vec![1];

        let engine = ExecutionEngine::new(true);
        let (_source, token) = CancellationSource::new();
        let outcome = engine
            .execute(&tool, &IndexMap::new(), dir.path(), &IndexMap::new(), ResourceRequest::default(), RuntimeChoice::Host, token)
            .await
            .unwrap();

        assert_eq!(outcome.outcome, ExitOutcome::PermanentFailure);
    }
}
