//! The six-step validation pipeline (spec §4.B): errors are accumulated
//! into a [`ValidationReport`] rather than short-circuited on the first
//! finding, so the Runner Facade's `validate` subcommand can print every
//! field-level diagnostic in one pass.

use wfl_types::{GraphDocument, LanguageVersion, SourceReference, ValidationKind};

use super::toposort::topological_order;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub findings: Vec<ValidationKind>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.findings.is_empty()
    }

    fn push(&mut self, finding: ValidationKind) {
        self.findings.push(finding);
    }
}

/// Runs the full validation pipeline against an already-parsed document.
pub fn validate_document(document: &GraphDocument) -> ValidationReport {
    let mut report = ValidationReport::default();

    // 1. Language version recognized.
    if document.version.is_legacy() {
        report.push(ValidationKind::LegacyConstruct(
            "draft-3 is tolerated at parse but not fully supported downstream".to_string(),
        ));
    }

    // 2. Every workflow input declares a type.
    for (id, input) in &document.workflow.inputs {
        if input.type_tag.trim().is_empty() {
            report.push(ValidationKind::Malformed(format!("workflow input '{id}' declares no type")));
        }
    }

    // 3. Every step names a `run` target that resolves in the document.
    for (step_id, step) in &document.workflow.steps {
        let run_id = step.run.strip_suffix(".cwl").unwrap_or(&step.run);
        if !document.tools.contains_key(run_id) {
            report.push(ValidationKind::UnresolvedReference(format!("step '{step_id}' names unresolved run target '{}'", step.run)));
        }
    }

    // 4. Every step input names a valid source, default, or valueFrom.
    for (step_id, step) in &document.workflow.steps {
        for input in &step.in_ {
            let has_source = input.source.is_some();
            let has_default = input.default.is_some();
            let has_value_from = input.value_from.is_some();
            if !has_source && !has_default && !has_value_from {
                report.push(ValidationKind::Malformed(format!(
                    "step '{step_id}' input '{}' has no source, default, or valueFrom",
                    input.id
                )));
                continue;
            }
            if let Some(source) = &input.source {
                for source_ref in source.sources() {
                    if !source_resolves(document, source_ref) {
                        report.push(ValidationKind::UnresolvedReference(format!(
                            "step '{step_id}' input '{}' source '{source_ref}' does not resolve",
                            input.id
                        )));
                    }
                }
            }
        }
    }

    // 5. Every workflow outputSource names a step output or workflow input.
    for (output_id, output) in &document.workflow.outputs {
        for source_ref in output.output_source.sources() {
            if !source_resolves(document, source_ref) {
                report.push(ValidationKind::UnresolvedReference(format!(
                    "workflow output '{output_id}' outputSource '{source_ref}' does not resolve"
                )));
            }
        }
    }

    // 6. The step DAG is acyclic.
    if let Err(cycle) = topological_order(&document.workflow) {
        report.push(cycle);
    }

    report
}

fn source_resolves(document: &GraphDocument, source_ref: &str) -> bool {
    if let Some((step_id, output_id)) = SourceReference::split_step_output(source_ref) {
        return document
            .workflow
            .steps
            .get(step_id)
            .map(|step| step.out.iter().any(|o| o == output_id))
            .unwrap_or(false);
    }
    document.workflow.inputs.contains_key(source_ref)
}

pub fn is_legacy_version(version: LanguageVersion) -> bool {
    version.is_legacy()
}
