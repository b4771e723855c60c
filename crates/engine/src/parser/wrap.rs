//! Auto-wraps a bare tool document into a single-step workflow whose
//! inputs/outputs mirror the tool's own (spec §4.B "bare tool" handling).

use indexmap::IndexMap;
use wfl_types::{InputParameter, OutputParameter, SourceReference, Step, StepInput, Tool, Workflow};

const WRAPPER_STEP_ID: &str = "main";

pub fn wrap_bare_tool(tool: &Tool) -> Workflow {
    let mut inputs = IndexMap::new();
    let mut step_inputs = Vec::new();
    for (id, tool_input) in &tool.inputs {
        inputs.insert(
            id.clone(),
            InputParameter {
                id: id.clone(),
                type_tag: tool_input.type_tag.clone(),
                default: tool_input.default.clone(),
                doc: None,
            },
        );
        step_inputs.push(StepInput {
            id: id.clone(),
            source: Some(SourceReference::Single(id.clone())),
            default: None,
            value_from: None,
            load_contents: false,
        });
    }

    let mut outputs = IndexMap::new();
    let mut step_outputs = Vec::new();
    for (id, tool_output) in &tool.outputs {
        outputs.insert(
            id.clone(),
            OutputParameter {
                id: id.clone(),
                type_tag: tool_output.type_tag.clone(),
                output_source: SourceReference::Single(format!("{WRAPPER_STEP_ID}/{id}")),
                doc: None,
            },
        );
        step_outputs.push(id.clone());
    }

    let mut steps = IndexMap::new();
    steps.insert(
        WRAPPER_STEP_ID.to_string(),
        Step {
            id: WRAPPER_STEP_ID.to_string(),
            run: tool.id.clone(),
            in_: step_inputs,
            out: step_outputs,
            scatter: Vec::new(),
            scatter_method: None,
            when: None,
            hints: tool.hints.clone(),
        },
    );

    Workflow {
        id: format!("{}-workflow", tool.id),
        doc: None,
        inputs,
        outputs,
        steps,
    }
}
