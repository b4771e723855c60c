//! The Scheduler (spec §4.H): owns one submission's `<stepID>/<outputID>`
//! bindings map, walks the step DAG in topological order, resolves each
//! step's inputs, expands `scatter`, evaluates `when`, dispatches to the
//! Executor Registry, and folds results back into the bindings before
//! projecting the workflow's own outputs.

use std::path::PathBuf;

use indexmap::IndexMap;
use wfl_types::{ExecutorKind, GraphDocument, ScatterMethod, SourceReference, Step, Task, TaskState, ValidationKind, Value, WflError};

use crate::engine::ResourceRequest;
use crate::engine::load_contents_into;
use crate::executor::{Executor, ExecutorRegistry, select_executor};
use crate::expr::{self, EvalContext};
use crate::parser;
use crate::persistence::Store;
use std::sync::Arc;

/// One submission's live state: the bindings map plus everything needed to
/// dispatch steps against it.
pub struct Scheduler {
    document: GraphDocument,
    submission_id: String,
    store: Arc<dyn Store>,
    registry: ExecutorRegistry,
    outdir: PathBuf,
    /// Upper bound on concurrently in-flight scatter elements within one
    /// step (spec §4.H step 5 "bounded concurrency").
    concurrency: usize,
    /// Overrides every step's `hints.executor` when set (the CLI's
    /// `--docker` flag, spec §6 "force container adapter A").
    force_executor: Option<ExecutorKind>,
}

impl Scheduler {
    pub fn new(document: GraphDocument, submission_id: impl Into<String>, store: Arc<dyn Store>, registry: ExecutorRegistry, outdir: PathBuf, concurrency: usize) -> Self {
        Self { document, submission_id: submission_id.into(), store, registry, outdir, concurrency: concurrency.max(1), force_executor: None }
    }

    /// Forces every step to dispatch through `kind` regardless of its own
    /// `hints.executor` (spec §6 `--docker`).
    pub fn with_forced_executor(mut self, kind: ExecutorKind) -> Self {
        self.force_executor = Some(kind);
        self
    }

    /// Runs the whole workflow to completion, returning its declared
    /// outputs projected from the final bindings map.
    pub async fn run(&self, job_inputs: IndexMap<String, Value>) -> Result<IndexMap<String, Value>, WflError> {
        let order = parser::topological_order(&self.document.workflow).map_err(WflError::from)?;
        tracing::info!(submission_id = %self.submission_id, steps = order.len(), "scheduler: dispatch order resolved");
        let mut bindings: IndexMap<String, Value> = IndexMap::new();

        for step_id in &order {
            let step = &self.document.workflow.steps[step_id];
            let resolved = self.resolve_step_inputs(step, &job_inputs, &bindings)?;

            if let Some(when_expr) = &step.when {
                let ctx = EvalContext::new(resolved.clone(), Value::Null, IndexMap::new());
                let keep = matches!(expr::evaluate(when_expr, &ctx).map_err(WflError::from)?, Value::Bool(true));
                if !keep {
                    tracing::debug!(submission_id = %self.submission_id, step = %step_id, "scheduler: step skipped by when");
                    for out in &step.out {
                        bindings.insert(format!("{step_id}/{out}"), Value::Null);
                    }
                    continue;
                }
            }

            let invocations = expand_scatter(step, &resolved)?;
            tracing::info!(submission_id = %self.submission_id, step = %step_id, invocations = invocations.len(), "scheduler: dispatching step");
            let results = self.dispatch_step(step, invocations).await?;

            if step.scatter.is_empty() {
                let outputs = results.into_iter().next().unwrap_or_default();
                for out in &step.out {
                    bindings.insert(format!("{step_id}/{out}"), outputs.get(out).cloned().unwrap_or(Value::Null));
                }
            } else {
                for out in &step.out {
                    let gathered: Vec<Value> = results.iter().map(|o| o.get(out).cloned().unwrap_or(Value::Null)).collect();
                    bindings.insert(format!("{step_id}/{out}"), Value::List(gathered));
                }
            }
        }

        let mut outputs = IndexMap::new();
        for (id, output) in &self.document.workflow.outputs {
            outputs.insert(id.clone(), self.gather_source(&output.output_source, &job_inputs, &bindings));
        }
        tracing::info!(submission_id = %self.submission_id, outputs = outputs.len(), "scheduler: submission complete");
        Ok(outputs)
    }

    /// Resolves one step's bound inputs in the order spec §4.H step 1
    /// describes: gather from `source`, fall back to `default`, apply
    /// `loadContents`, then evaluate `valueFrom` with `self` bound to the
    /// value produced so far.
    fn resolve_step_inputs(&self, step: &Step, job_inputs: &IndexMap<String, Value>, bindings: &IndexMap<String, Value>) -> Result<IndexMap<String, Value>, WflError> {
        let mut resolved = IndexMap::new();
        for input in &step.in_ {
            let mut value = match &input.source {
                Some(source) => self.gather_source(source, job_inputs, bindings),
                None => Value::Null,
            };
            if matches!(value, Value::Null) {
                if let Some(default) = &input.default {
                    value = Value::from_json(default.clone());
                }
            }
            if input.load_contents {
                if let Value::File(file) = &mut value {
                    load_contents_into(file).map_err(WflError::from)?;
                }
            }
            if let Some(template) = &input.value_from {
                let ctx = EvalContext::new(resolved.clone(), value.clone(), IndexMap::new());
                value = expr::evaluate(template, &ctx).map_err(WflError::from)?;
            }
            resolved.insert(input.id.clone(), value);
        }
        Ok(resolved)
    }

    /// Resolves a single `SourceReference` against the workflow's own
    /// inputs or a prior step's recorded outputs. A `Multiple` reference
    /// merges every resolved source into one array (spec §4.H step 1,
    /// `linkMerge` default `merge_nested`).
    fn gather_source(&self, source: &SourceReference, job_inputs: &IndexMap<String, Value>, bindings: &IndexMap<String, Value>) -> Value {
        let lookup = |s: &str| -> Value {
            if let Some((step, output)) = SourceReference::split_step_output(s) {
                bindings.get(&format!("{step}/{output}")).cloned().unwrap_or(Value::Null)
            } else {
                job_inputs.get(s).cloned().unwrap_or(Value::Null)
            }
        };
        match source {
            SourceReference::Single(s) => lookup(s),
            SourceReference::Multiple(items) => Value::List(items.iter().map(|s| lookup(s)).collect()),
        }
    }

    /// Submits every scatter invocation of `step` concurrently (bounded by
    /// `self.concurrency`), cancelling the remaining in-flight invocations
    /// as soon as one terminally fails (spec §4.H step 6 "sibling
    /// cancellation").
    async fn dispatch_step(&self, step: &Step, invocations: Vec<IndexMap<String, Value>>) -> Result<Vec<IndexMap<String, Value>>, WflError> {
        let tool = self.document.tools.get(&step.run).ok_or_else(|| WflError::from(ValidationKind::UnresolvedReference(step.run.clone())))?;
        let executor = select_executor(self.force_executor.or(step.hints.executor), &self.registry);
        let resources = ResourceRequest { cores_min: step.hints.cores_min, cores: step.hints.cores, ram_min_mb: step.hints.ram_min_mb, ram_mb: step.hints.ram_mb };

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency));
        let task_ids: Vec<String> = (0..invocations.len()).map(|i| format!("{}-{}-{}", self.submission_id, step.id, i)).collect();
        let mut handles = Vec::new();

        for (index, inputs) in invocations.into_iter().enumerate() {
            let executor = executor.clone();
            let tool = tool.clone();
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let work_dir = self.outdir.join(&self.submission_id).join(&step.id).join(index.to_string());
            let task_id = task_ids[index].clone();
            let submission_id = self.submission_id.clone();
            let step_id = step.id.clone();
            let scatter_index = if step.scatter.is_empty() { None } else { Some(index) };
            let resources = resources;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                std::fs::create_dir_all(&work_dir).map_err(WflError::from)?;

                let mut task = Task::new(task_id, submission_id, step_id, executor_name(executor.kind()));
                task.scatter_index = scatter_index;
                task.inputs = inputs;
                task.max_retries = 1;
                task.transition(TaskState::Scheduled).ok();
                task.transition(TaskState::Queued).ok();
                store.create_task(task.clone()).await.map_err(WflError::from)?;

                loop {
                    executor.submit(&mut task, &tool, &IndexMap::new(), &work_dir, resources).await?;
                    store.update_task(task.clone()).await.map_err(WflError::from)?;
                    match task.state {
                        TaskState::Queued if task.executor == "worker" => {
                            wait_for_worker_completion(store.as_ref(), &mut task).await?;
                            break;
                        }
                        TaskState::Queued => continue,
                        _ => break,
                    }
                }

                Ok::<Task, WflError>(task)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut failure: Option<WflError> = None;
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(task)) if task.state == TaskState::Success => results.push(task.outputs),
                Ok(Ok(task)) => {
                    tracing::warn!(submission_id = %self.submission_id, step = %step.id, task = %task.id, error = ?task.error, "scheduler: step failed, cancelling siblings");
                    failure.get_or_insert_with(|| WflError::from(ValidationKind::Malformed(task.error.clone().unwrap_or_else(|| format!("step {} failed", step.id)))));
                    for later_id in task_ids.iter().skip(index + 1) {
                        let mut stub = Task::new(later_id.clone(), self.submission_id.clone(), step.id.clone(), "");
                        let _ = executor.cancel(&mut stub).await;
                    }
                    break;
                }
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                    break;
                }
                Err(join_err) => {
                    failure.get_or_insert_with(|| WflError::from(ValidationKind::Malformed(join_err.to_string())));
                    break;
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        Ok(results)
    }
}

fn executor_name(kind: ExecutorKind) -> &'static str {
    match kind {
        ExecutorKind::Local => "local",
        ExecutorKind::Container => "container",
        ExecutorKind::Apptainer => "apptainer",
        ExecutorKind::Worker => "worker",
    }
}

/// Polls the store until a worker-executed task leaves `Queued`/`Running`
/// (spec §4.J: the Scheduler learns of progress only through what a remote
/// worker writes back via `PUT .../status` and `.../complete`).
async fn wait_for_worker_completion(store: &dyn Store, task: &mut Task) -> Result<(), WflError> {
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let Some(stored) = store.get_task(&task.id).await.map_err(WflError::from)? else { continue };
        *task = stored;
        if task.state.is_terminal() {
            return Ok(());
        }
    }
}

/// Expands a step's scatter fields into one invocation per combination
/// (spec §4.H step 3, Glossary "Scatter"). Non-scattered inputs are copied
/// unchanged into every invocation.
fn expand_scatter(step: &Step, resolved: &IndexMap<String, Value>) -> Result<Vec<IndexMap<String, Value>>, WflError> {
    if step.scatter.is_empty() {
        return Ok(vec![resolved.clone()]);
    }

    let mut lists = Vec::with_capacity(step.scatter.len());
    for id in &step.scatter {
        match resolved.get(id) {
            Some(Value::List(items)) => lists.push((id.as_str(), items.clone())),
            _ => return Err(WflError::from(ValidationKind::TypeMismatch { field: id.clone(), expected: "array".to_string(), found: "non-array".to_string() })),
        }
    }

    let method = step.scatter_method.unwrap_or(ScatterMethod::DotProduct);
    let combos: Vec<Vec<Value>> = match method {
        ScatterMethod::DotProduct => {
            let len = lists[0].1.len();
            if lists.iter().any(|(_, l)| l.len() != len) {
                return Err(WflError::from(ValidationKind::Malformed("dotproduct scatter requires equal-length arrays".to_string())));
            }
            (0..len).map(|i| lists.iter().map(|(_, l)| l[i].clone()).collect()).collect()
        }
        ScatterMethod::CrossProduct => {
            let mut combos = vec![Vec::new()];
            for (_, values) in &lists {
                let mut next = Vec::with_capacity(combos.len() * values.len());
                for combo in &combos {
                    for value in values {
                        let mut extended = combo.clone();
                        extended.push(value.clone());
                        next.push(extended);
                    }
                }
                combos = next;
            }
            combos
        }
    };

    Ok(combos
        .into_iter()
        .map(|combo| {
            let mut invocation = resolved.clone();
            for ((id, _), value) in lists.iter().zip(combo) {
                invocation.insert(id.to_string(), value);
            }
            invocation
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfl_types::{BaseCommand, DocumentClass, HintsBlock, InputParameter, LanguageVersion, OutputParameter, StepInput, ToolRequirements, Workflow};

    fn step_with_scatter(scatter: Vec<&str>, method: Option<ScatterMethod>) -> Step {
        Step {
            id: "s".into(),
            run: "tool".into(),
            in_: vec![
                StepInput { id: "a".into(), source: None, default: None, value_from: None, load_contents: false },
                StepInput { id: "b".into(), source: None, default: None, value_from: None, load_contents: false },
            ],
            out: vec!["out".into()],
            scatter: scatter.into_iter().map(String::from).collect(),
            scatter_method: method,
            when: None,
            hints: HintsBlock::default(),
        }
    }

    #[test]
    fn dot_product_scatter_zips_equal_length_arrays() {
        let step = step_with_scatter(vec!["a", "b"], Some(ScatterMethod::DotProduct));
        let mut resolved = IndexMap::new();
        resolved.insert("a".to_string(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        resolved.insert("b".to_string(), Value::List(vec![Value::Int(10), Value::Int(20)]));

        let invocations = expand_scatter(&step, &resolved).unwrap();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0]["a"], Value::Int(1));
        assert_eq!(invocations[0]["b"], Value::Int(10));
        assert_eq!(invocations[1]["a"], Value::Int(2));
        assert_eq!(invocations[1]["b"], Value::Int(20));
    }

    #[test]
    fn cross_product_scatter_produces_full_cartesian_product() {
        let step = step_with_scatter(vec!["a", "b"], Some(ScatterMethod::CrossProduct));
        let mut resolved = IndexMap::new();
        resolved.insert("a".to_string(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        resolved.insert("b".to_string(), Value::List(vec![Value::Int(10), Value::Int(20)]));

        let invocations = expand_scatter(&step, &resolved).unwrap();
        assert_eq!(invocations.len(), 4);
    }

    #[test]
    fn dot_product_rejects_unequal_length_arrays() {
        let step = step_with_scatter(vec!["a", "b"], Some(ScatterMethod::DotProduct));
        let mut resolved = IndexMap::new();
        resolved.insert("a".to_string(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        resolved.insert("b".to_string(), Value::List(vec![Value::Int(10)]));

        assert!(expand_scatter(&step, &resolved).is_err());
    }

    fn single_step_document(tool_id: &str, step: Step) -> GraphDocument {
        let mut tools = IndexMap::new();
        tools.insert(
            tool_id.to_string(),
            wfl_types::Tool {
                id: tool_id.to_string(),
                class: DocumentClass::CommandLineTool,
                base_command: Some(BaseCommand::Single("true".into())),
                arguments: Vec::new(),
                inputs: IndexMap::new(),
                outputs: IndexMap::new(),
                success_codes: Vec::new(),
                permanent_fail_codes: Vec::new(),
                temporary_fail_codes: Vec::new(),
                stdin: None,
                stdout: None,
                stderr: None,
                requirements: ToolRequirements::default(),
                hints: HintsBlock::default(),
            },
        );
        let mut steps = IndexMap::new();
        steps.insert(step.id.clone(), step);
        let mut outputs = IndexMap::new();
        outputs.insert("final".to_string(), OutputParameter { id: "final".into(), type_tag: "string".into(), output_source: SourceReference::Single("s/out".into()), doc: None });
        GraphDocument {
            version: LanguageVersion::V1_2,
            original_class: DocumentClass::Workflow,
            workflow: Workflow { id: "wf".into(), doc: None, inputs: IndexMap::new(), outputs, steps },
            tools,
            namespaces: IndexMap::new(),
        }
    }

    #[tokio::test]
    async fn single_step_workflow_runs_to_completion_via_local_executor() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step { id: "s".into(), run: "tool".into(), in_: Vec::new(), out: vec!["out".into()], scatter: Vec::new(), scatter_method: None, when: None, hints: HintsBlock::default() };
        let document = single_step_document("tool", step);
        let store = crate::persistence::InMemoryStore::new();
        let registry = ExecutorRegistry::new(true, store.clone());
        let scheduler = Scheduler::new(document, "sub1", store, registry, dir.path().to_path_buf(), 4);

        let outputs = scheduler.run(IndexMap::new()).await.unwrap();
        assert_eq!(outputs["final"], Value::Null);
    }

    #[tokio::test]
    async fn when_false_skips_step_and_binds_null() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step { id: "s".into(), run: "tool".into(), in_: Vec::new(), out: vec!["out".into()], scatter: Vec::new(), scatter_method: None, when: Some("${ return false; }".into()), hints: HintsBlock::default() };
        let document = single_step_document("tool", step);
        let store = crate::persistence::InMemoryStore::new();
        let registry = ExecutorRegistry::new(true, store.clone());
        let scheduler = Scheduler::new(document, "sub1", store, registry, dir.path().to_path_buf(), 4);

        let outputs = scheduler.run(IndexMap::new()).await.unwrap();
        assert_eq!(outputs["final"], Value::Null);
    }

    #[tokio::test]
    async fn workflow_input_projects_directly_into_output() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step { id: "s".into(), run: "tool".into(), in_: Vec::new(), out: vec!["out".into()], scatter: Vec::new(), scatter_method: None, when: None, hints: HintsBlock::default() };
        let mut document = single_step_document("tool", step);
        document.workflow.inputs.insert("greeting".to_string(), InputParameter { id: "greeting".into(), type_tag: "string".into(), default: None, doc: None });
        document.workflow.outputs.insert("echoed".to_string(), OutputParameter { id: "echoed".into(), type_tag: "string".into(), output_source: SourceReference::Single("greeting".into()), doc: None });

        let store = crate::persistence::InMemoryStore::new();
        let registry = ExecutorRegistry::new(true, store.clone());
        let scheduler = Scheduler::new(document, "sub1", store, registry, dir.path().to_path_buf(), 4);

        let mut job_inputs = IndexMap::new();
        job_inputs.insert("greeting".to_string(), Value::String("hi".into()));
        let outputs = scheduler.run(job_inputs).await.unwrap();
        assert_eq!(outputs["echoed"], Value::String("hi".into()));
    }
}
