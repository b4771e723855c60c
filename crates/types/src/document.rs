//! The Graph Document data model: Workflow, Step, Tool, and their parameter
//! declarations.
//!
//! These types are the direct output of the Parser & Validator and the
//! direct input to the Scheduler and Execution Engine. A [`GraphDocument`] is
//! immutable after parse; it is created once per submission and discarded
//! when the run returns.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Top-level class tag carried by a parsed document or tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum DocumentClass {
    CommandLineTool,
    ExpressionTool,
    Workflow,
}

/// Recognized language versions. `draft-3` is tolerated at parse (spec §9,
/// Open Question iii) but not exercised by the test suite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LanguageVersion {
    #[serde(rename = "draft-3")]
    Draft3,
    #[serde(rename = "v1.0")]
    V1_0,
    #[serde(rename = "v1.1")]
    V1_1,
    #[serde(rename = "v1.2")]
    V1_2,
}

impl LanguageVersion {
    pub fn is_legacy(self) -> bool {
        matches!(self, LanguageVersion::Draft3)
    }
}

/// Immutable after parse. One workflow plus every tool it (transitively)
/// references, keyed by tool ID. If the source document was a bare tool, the
/// workflow is synthesized as a single-step wrapper (see
/// `wfl_engine::parser::wrap_bare_tool`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    pub version: LanguageVersion,
    pub original_class: DocumentClass,
    pub workflow: Workflow,
    pub tools: IndexMap<String, Tool>,
    /// Namespace prefix -> URI, used to resolve `format` fields on outputs.
    #[serde(default)]
    pub namespaces: IndexMap<String, String>,
}

/// A type tag for a parameter. Kept as a string rather than an enum because
/// WFL type tags are themselves a small DSL (`string`, `string?`,
/// `string[]`, `File`, unions written `["null", "File"]`, and so on); the
/// Parser & Validator only needs to recognize "declares a type" (spec §4.B
/// step 2), not fully type-check the graph.
pub type TypeTag = String;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParameterDoc {
    #[serde(default)]
    pub doc: Option<String>,
}

/// A workflow-level input parameter declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParameter {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(default)]
    pub default: Option<JsonValue>,
    #[serde(default)]
    pub doc: Option<String>,
}

/// A workflow-level output parameter: declared type plus the `outputSource`
/// reference that projects it from the final `bindings` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputParameter {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    pub output_source: SourceReference,
    #[serde(default)]
    pub doc: Option<String>,
}

/// A source reference: either a bare workflow input ID, or `stepID/outputID`
/// naming an upstream step's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum SourceReference {
    Single(String),
    Multiple(Vec<String>),
}

impl SourceReference {
    pub fn sources(&self) -> Vec<&str> {
        match self {
            SourceReference::Single(s) => vec![s.as_str()],
            SourceReference::Multiple(items) => items.iter().map(String::as_str).collect(),
        }
    }

    /// Splits a `stepID/outputID` reference; returns `None` for a bare
    /// workflow-input reference (no `/`).
    pub fn split_step_output(source: &str) -> Option<(&str, &str)> {
        source.split_once('/')
    }
}

/// Resource hints carried by a step (container image, preferred executor
/// kind, cores/RAM requests). Mirrors the subset of `ResourceRequirement` /
/// `DockerRequirement` the Execution Engine actually consults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HintsBlock {
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub executor: Option<ExecutorKind>,
    #[serde(default)]
    pub cores_min: Option<f64>,
    #[serde(default)]
    pub cores: Option<f64>,
    #[serde(default)]
    pub ram_min_mb: Option<f64>,
    #[serde(default)]
    pub ram_mb: Option<f64>,
}

/// An executor hint: which backend should run a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Local,
    Container,
    Apptainer,
    Worker,
}

/// A step input: the sources it draws from, plus the `valueFrom`/`default`/
/// `loadContents` machinery spec §4.H step 1 applies in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInput {
    pub id: String,
    #[serde(default)]
    pub source: Option<SourceReference>,
    #[serde(default)]
    pub default: Option<JsonValue>,
    #[serde(default)]
    pub value_from: Option<String>,
    #[serde(default)]
    pub load_contents: bool,
}

/// Scatter expansion mode (spec §4.H step 3 / Glossary "Scatter").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScatterMethod {
    DotProduct,
    CrossProduct,
}

/// One node of the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub run: String,
    #[serde(rename = "in", default)]
    pub in_: Vec<StepInput>,
    #[serde(default)]
    pub out: Vec<String>,
    #[serde(default)]
    pub scatter: Vec<String>,
    #[serde(default)]
    pub scatter_method: Option<ScatterMethod>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub hints: HintsBlock,
}

/// A workflow: ordered inputs/outputs/steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<String>,
    pub inputs: IndexMap<String, InputParameter>,
    pub outputs: IndexMap<String, OutputParameter>,
    pub steps: IndexMap<String, Step>,
}

/// One `arguments` entry or `inputBinding`: position/prefix/separator rules
/// consumed by the Command Builder (spec §4.C).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputBinding {
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_separate")]
    pub separate: bool,
    #[serde(default)]
    pub item_separator: Option<String>,
    #[serde(default)]
    pub value_from: Option<String>,
    #[serde(default)]
    pub shell_quote: bool,
}

fn default_separate() -> bool {
    true
}

/// A literal `arguments` entry, distinct from a positional `inputBinding`
/// because it has no associated input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentEntry {
    Literal(String),
    Binding(InputBinding),
}

/// A tool input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInput {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(default)]
    pub default: Option<JsonValue>,
    #[serde(default)]
    pub input_binding: Option<InputBinding>,
    #[serde(default)]
    pub item_input_binding: Option<InputBinding>,
    #[serde(default)]
    pub record_fields: Vec<ToolInput>,
    #[serde(default)]
    pub secondary_files: Vec<String>,
    #[serde(default)]
    pub load_contents: bool,
}

/// An `outputBinding`: glob + loadContents + outputEval (spec §4.F).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OutputBinding {
    #[serde(default)]
    pub glob: Vec<String>,
    #[serde(default)]
    pub load_contents: bool,
    #[serde(default)]
    pub output_eval: Option<String>,
}

/// A tool output parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(default)]
    pub output_binding: Option<OutputBinding>,
    #[serde(default)]
    pub secondary_files: Vec<String>,
    #[serde(default)]
    pub record_fields: Vec<ToolOutput>,
    #[serde(default)]
    pub format: Option<String>,
}

/// `baseCommand`: a single token or a list of tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BaseCommand {
    Single(String),
    Many(Vec<String>),
}

impl BaseCommand {
    pub fn tokens(&self) -> Vec<String> {
        match self {
            BaseCommand::Single(s) => vec![s.clone()],
            BaseCommand::Many(items) => items.clone(),
        }
    }
}

/// A redirection template field (`stdin`/`stdout`/`stderr`): a literal path
/// or an expression that resolves to one. Empty means "capture in memory".
pub type RedirectTemplate = Option<String>;

/// A `CommandLineTool` or `ExpressionTool` definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub id: String,
    #[serde(default = "default_tool_class")]
    pub class: DocumentClass,
    #[serde(default)]
    pub base_command: Option<BaseCommand>,
    #[serde(default)]
    pub arguments: Vec<ArgumentEntry>,
    pub inputs: IndexMap<String, ToolInput>,
    pub outputs: IndexMap<String, ToolOutput>,
    #[serde(default)]
    pub success_codes: Vec<i32>,
    #[serde(default)]
    pub permanent_fail_codes: Vec<i32>,
    #[serde(default)]
    pub temporary_fail_codes: Vec<i32>,
    #[serde(default)]
    pub stdin: RedirectTemplate,
    #[serde(default)]
    pub stdout: RedirectTemplate,
    #[serde(default)]
    pub stderr: RedirectTemplate,
    #[serde(default)]
    pub requirements: ToolRequirements,
    #[serde(default)]
    pub hints: HintsBlock,
}

/// The subset of CWL `requirements` this runner recognizes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequirements {
    #[serde(default)]
    pub shell_command: bool,
    #[serde(default)]
    pub docker_output_directory: Option<String>,
    #[serde(default)]
    pub env_var_requirement: IndexMap<String, String>,
    #[serde(default)]
    pub gpu: Option<GpuRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuRequirement {
    #[serde(default)]
    pub device_ids: Vec<u32>,
    #[serde(default)]
    pub all: bool,
}

fn default_tool_class() -> DocumentClass {
    DocumentClass::CommandLineTool
}

impl Tool {
    pub fn exit_is_success(&self, code: i32) -> bool {
        if self.success_codes.is_empty() {
            code == 0
        } else {
            self.success_codes.contains(&code)
        }
    }

    pub fn exit_is_permanent_failure(&self, code: i32) -> bool {
        self.permanent_fail_codes.contains(&code)
    }

    pub fn exit_is_retryable(&self, code: i32) -> bool {
        !self.exit_is_success(code) && !self.exit_is_permanent_failure(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_reference_splits_step_output_pairs() {
        assert_eq!(SourceReference::split_step_output("assemble/contigs"), Some(("assemble", "contigs")));
        assert_eq!(SourceReference::split_step_output("sample_name"), None);
    }

    #[test]
    fn tool_exit_code_policy_defaults_to_zero_success() {
        let tool = sample_tool();
        assert!(tool.exit_is_success(0));
        assert!(!tool.exit_is_success(1));
        assert!(tool.exit_is_retryable(1));
        assert!(!tool.exit_is_permanent_failure(1));
    }

    #[test]
    fn permanent_fail_codes_are_not_retryable() {
        let mut tool = sample_tool();
        tool.permanent_fail_codes = vec![2];
        assert!(tool.exit_is_permanent_failure(2));
        assert!(!tool.exit_is_retryable(2));
    }

    fn sample_tool() -> Tool {
        Tool {
            id: "echo".into(),
            class: DocumentClass::CommandLineTool,
            base_command: Some(BaseCommand::Single("echo".into())),
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
        }
    }
}
