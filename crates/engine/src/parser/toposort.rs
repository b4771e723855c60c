//! Deterministic topological sort of the step DAG via Kahn's algorithm with
//! a lexicographic tie-break (spec §4.B "Topological sort"). On a cycle,
//! reports every node of the residual strongly-connected remainder rather
//! than just the first edge that closes the loop.

use std::collections::{BTreeSet, HashMap};

use wfl_types::{ValidationKind, Workflow};

/// Returns step IDs in a deterministic topological order, or a
/// [`ValidationKind::CyclicGraph`] naming every step left over once no more
/// in-degree-zero nodes remain (the residual SCC).
pub fn topological_order(workflow: &Workflow) -> Result<Vec<String>, ValidationKind> {
    let mut in_degree: HashMap<&str, usize> = workflow.steps.keys().map(|id| (id.as_str(), 0usize)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (step_id, step) in &workflow.steps {
        for input in &step.in_ {
            let Some(source) = &input.source else { continue };
            for source_ref in source.sources() {
                if let Some((upstream_step, _output)) = wfl_types::SourceReference::split_step_output(source_ref) {
                    if workflow.steps.contains_key(upstream_step) {
                        *in_degree.get_mut(step_id.as_str()).unwrap() += 1;
                        dependents.entry(upstream_step).or_default().push(step_id.as_str());
                    }
                }
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(id, _)| *id).collect();
    let mut order = Vec::with_capacity(workflow.steps.len());

    while let Some(&next) = ready.iter().next() {
        ready.remove(next);
        order.push(next.to_string());
        if let Some(downstream) = dependents.get(next) {
            for &d in downstream {
                let degree = in_degree.get_mut(d).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(d);
                }
            }
        }
    }

    if order.len() != workflow.steps.len() {
        let visited: std::collections::HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut residual: Vec<String> = workflow.steps.keys().filter(|id| !visited.contains(id.as_str())).cloned().collect();
        residual.sort();
        return Err(ValidationKind::CyclicGraph(residual.join(", ")));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use wfl_types::{SourceReference, Step, StepInput};

    fn step(id: &str, source: Option<&str>) -> Step {
        Step {
            id: id.to_string(),
            run: "noop".into(),
            in_: source
                .map(|s| {
                    vec![StepInput {
                        id: "in".into(),
                        source: Some(SourceReference::Single(s.into())),
                        default: None,
                        value_from: None,
                        load_contents: false,
                    }]
                })
                .unwrap_or_default(),
            out: vec!["out".into()],
            scatter: Vec::new(),
            scatter_method: None,
            when: None,
            hints: Default::default(),
        }
    }

    fn workflow_with_steps(steps: Vec<Step>) -> Workflow {
        let mut map = IndexMap::new();
        for s in steps {
            map.insert(s.id.clone(), s);
        }
        Workflow { id: "wf".into(), doc: None, inputs: IndexMap::new(), outputs: IndexMap::new(), steps: map }
    }

    #[test]
    fn linear_pipeline_sorts_in_dependency_order() {
        let wf = workflow_with_steps(vec![step("annotate", Some("assemble/contigs")), step("assemble", None)]);
        let order = topological_order(&wf).unwrap();
        assert_eq!(order, vec!["assemble".to_string(), "annotate".to_string()]);
    }

    #[test]
    fn ties_break_lexicographically() {
        let wf = workflow_with_steps(vec![step("zeta", None), step("alpha", None), step("mid", None)]);
        let order = topological_order(&wf).unwrap();
        assert_eq!(order, vec!["alpha".to_string(), "mid".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn cyclic_graph_is_rejected_naming_every_scc_member() {
        let wf = workflow_with_steps(vec![step("a", Some("b/out")), step("b", Some("a/out"))]);
        let err = topological_order(&wf).unwrap_err();
        match err {
            ValidationKind::CyclicGraph(members) => {
                assert!(members.contains('a'));
                assert!(members.contains('b'));
            }
            other => panic!("expected CyclicGraph, got {other:?}"),
        }
    }
}
