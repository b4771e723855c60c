//! The Parser & Validator (spec §4.B).
//!
//! Accepts either a packed `$graph` document or a bare tool document (the
//! latter auto-wrapped as a single-step workflow). Validation errors are
//! collected rather than short-circuited, grounded in the teacher's
//! `parse_workflow_file` dual-parse-attempt fallback pattern
//! (`engine/src/lib.rs`, now generalized into a proper accumulator instead
//! of a single try/fallback chain).

mod toposort;
mod validate;
mod wrap;

use indexmap::IndexMap;
use wfl_types::{DocumentClass, GraphDocument, LanguageVersion, Tool, ValidationKind, Workflow};

pub use toposort::topological_order;
pub use validate::{ValidationReport, validate_document};

/// Raw top-level document shape before we know whether it is packed,
/// bare-tool, or bare-workflow.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Packed {
        #[serde(rename = "$graph")]
        graph: Vec<RawEntry>,
        #[serde(rename = "cwlVersion")]
        version: LanguageVersion,
        #[serde(default)]
        namespaces: IndexMap<String, String>,
    },
    Bare(RawEntry),
}

#[derive(Debug, Clone, serde::Deserialize)]
struct RawEntry {
    class: DocumentClass,
    #[serde(rename = "cwlVersion", default)]
    version: Option<LanguageVersion>,
    #[serde(flatten)]
    body: serde_json::Value,
}

/// Parses a YAML or JSON source string into a [`GraphDocument`], running
/// the full validation pipeline (spec §4.B steps 1-6). Returns the parsed
/// document even when validation reports non-fatal findings; callers (the
/// Runner Facade's `validate` subcommand) decide whether findings are fatal.
pub fn parse_document(source: &str) -> Result<(GraphDocument, ValidationReport), ValidationKind> {
    let raw: RawDocument = serde_yaml::from_str(source)
        .or_else(|_| serde_json::from_str(source).map_err(|e| e.to_string()))
        .map_err(|e| ValidationKind::Malformed(e.to_string()))?;

    let document = match raw {
        RawDocument::Packed { graph, version, namespaces } => build_packed(graph, version, namespaces)?,
        RawDocument::Bare(entry) => build_bare(entry)?,
    };

    let report = validate_document(&document);
    Ok((document, report))
}

fn build_packed(graph: Vec<RawEntry>, version: LanguageVersion, namespaces: IndexMap<String, String>) -> Result<GraphDocument, ValidationKind> {
    let mut workflow = None;
    let mut tools = IndexMap::new();

    for entry in graph {
        match entry.class {
            DocumentClass::Workflow => {
                if workflow.is_some() {
                    return Err(ValidationKind::Malformed("packed document must contain exactly one Workflow".into()));
                }
                let wf: Workflow = serde_json::from_value(entry.body).map_err(|e| ValidationKind::Malformed(e.to_string()))?;
                workflow = Some(wf);
            }
            DocumentClass::CommandLineTool | DocumentClass::ExpressionTool => {
                let mut tool: Tool = serde_json::from_value(entry.body).map_err(|e| ValidationKind::Malformed(e.to_string()))?;
                tool.class = entry.class;
                tools.insert(tool.id.clone(), tool);
            }
        }
    }

    let workflow = workflow.ok_or_else(|| ValidationKind::Malformed("packed document contains no Workflow".into()))?;

    Ok(GraphDocument {
        version,
        original_class: DocumentClass::Workflow,
        workflow,
        tools,
        namespaces,
    })
}

fn build_bare(entry: RawEntry) -> Result<GraphDocument, ValidationKind> {
    let version = entry.version.unwrap_or(LanguageVersion::V1_2);
    match entry.class {
        DocumentClass::Workflow => {
            let workflow: Workflow = serde_json::from_value(entry.body).map_err(|e| ValidationKind::Malformed(e.to_string()))?;
            Ok(GraphDocument {
                version,
                original_class: DocumentClass::Workflow,
                workflow,
                tools: IndexMap::new(),
                namespaces: IndexMap::new(),
            })
        }
        DocumentClass::CommandLineTool | DocumentClass::ExpressionTool => {
            let mut tool: Tool = serde_json::from_value(entry.body).map_err(|e| ValidationKind::Malformed(e.to_string()))?;
            tool.class = entry.class;
            let workflow = wrap::wrap_bare_tool(&tool);
            let mut tools = IndexMap::new();
            tools.insert(tool.id.clone(), tool);
            Ok(GraphDocument {
                version,
                original_class: entry.class,
                workflow,
                tools,
                namespaces: IndexMap::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_tool_is_auto_wrapped_as_single_step_workflow() {
        let source = r#"
class: CommandLineTool
cwlVersion: v1.2
id: echo
baseCommand: [echo]
inputs:
  message:
    type: string
    inputBinding:
      position: 1
outputs:
  out:
    type: stdout
"#;
        let (doc, _report) = parse_document(source).unwrap();
        assert_eq!(doc.workflow.steps.len(), 1);
        assert!(doc.tools.contains_key("echo"));
    }
}
