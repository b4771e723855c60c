//! The Command Builder (spec §4.C): turns a tool, bound inputs, and a
//! runtime context into a deterministic argv plus stdin/stdout/stderr
//! redirection paths.
//!
//! The algorithm has three phases: collect every binding site (the tool's
//! `arguments` entries, each input's `inputBinding`, each array element
//! under an `itemInputBinding`), sort them by `(position, source-order)`,
//! then render each site to zero or more argv tokens in that order.

use indexmap::IndexMap;
use wfl_types::{ArgumentEntry, ExpressionKind, InputBinding, RedirectTemplate, RuntimeContext, Tool, Value, stringify};

use crate::expr::{self, EvalContext};

/// The argv and redirection paths produced for one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandPlan {
    pub argv: Vec<String>,
    pub stdin_path: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
}

enum Site {
    Literal(String),
    Bound { binding: InputBinding, value: Value },
}

struct OrderedSite {
    position: i64,
    source_order: usize,
    site: Site,
}

/// Builds the command for `tool` given its bound `inputs` and the current
/// `runtime` context (spec §4.C algorithm steps 1-5).
pub fn build_command(tool: &Tool, inputs: &IndexMap<String, Value>, runtime: &RuntimeContext) -> Result<CommandPlan, ExpressionKind> {
    let mut sites = Vec::new();
    let mut order = 0usize;

    for entry in &tool.arguments {
        let (position, site) = match entry {
            ArgumentEntry::Literal(text) => (0, Site::Literal(text.clone())),
            ArgumentEntry::Binding(binding) => (binding.position, Site::Bound { binding: binding.clone(), value: Value::Null }),
        };
        sites.push(OrderedSite { position, source_order: order, site });
        order += 1;
    }

    for (id, tool_input) in &tool.inputs {
        let value = inputs.get(id).cloned().unwrap_or(Value::Null);
        if let (Value::List(items), Some(item_binding)) = (&value, &tool_input.item_input_binding) {
            for item in items {
                sites.push(OrderedSite {
                    position: item_binding.position,
                    source_order: order,
                    site: Site::Bound { binding: item_binding.clone(), value: item.clone() },
                });
                order += 1;
            }
            continue;
        }
        let Some(binding) = &tool_input.input_binding else { continue };
        sites.push(OrderedSite {
            position: binding.position,
            source_order: order,
            site: Site::Bound { binding: binding.clone(), value },
        });
        order += 1;
    }

    sites.sort_by(|a, b| a.position.cmp(&b.position).then(a.source_order.cmp(&b.source_order)));

    let mut tokens = Vec::new();
    for ordered in &sites {
        tokens.extend(render_site(&ordered.site, inputs, runtime)?);
    }

    let mut argv = tool.base_command.as_ref().map(|bc| bc.tokens()).unwrap_or_default();
    argv.extend(tokens);

    if tool.requirements.shell_command {
        argv = vec!["/bin/sh".to_string(), "-c".to_string(), wfl_util::shell_lexing::rejoin_for_shell(&argv)];
    }

    Ok(CommandPlan {
        argv,
        stdin_path: resolve_template(&tool.stdin, inputs, runtime)?,
        stdout_path: resolve_template(&tool.stdout, inputs, runtime)?,
        stderr_path: resolve_template(&tool.stderr, inputs, runtime)?,
    })
}

fn render_site(site: &Site, inputs: &IndexMap<String, Value>, runtime: &RuntimeContext) -> Result<Vec<String>, ExpressionKind> {
    match site {
        Site::Literal(text) => Ok(vec![text.clone()]),
        Site::Bound { binding, value } => {
            let resolved = match &binding.value_from {
                Some(source) => {
                    let ctx = EvalContext::new(inputs.clone(), value.clone(), expr::runtime_to_map(runtime));
                    expr::evaluate(source, &ctx)?
                }
                None => value.clone(),
            };
            Ok(render_bound_value(binding, &resolved))
        }
    }
}

fn render_bound_value(binding: &InputBinding, value: &Value) -> Vec<String> {
    let is_list = matches!(value, Value::List(_));
    let item_tokens: Vec<String> = match value {
        Value::Null => return Vec::new(),
        Value::List(items) => items.iter().filter_map(element_token).collect(),
        other => element_token(other).into_iter().collect(),
    };
    if item_tokens.is_empty() {
        return Vec::new();
    }

    let value_tokens = if is_list {
        match &binding.item_separator {
            Some(sep) => vec![item_tokens.join(sep)],
            None => item_tokens,
        }
    } else {
        item_tokens
    };

    let Some(prefix) = &binding.prefix else {
        return value_tokens;
    };

    if binding.separate {
        let mut out = Vec::with_capacity(value_tokens.len() + 1);
        out.push(prefix.clone());
        out.extend(value_tokens);
        out
    } else {
        let mut out = value_tokens;
        match out.first_mut() {
            Some(first) => *first = format!("{prefix}{first}"),
            None => out.push(prefix.clone()),
        }
        out
    }
}

/// The token a single (non-list) value contributes. File/Directory objects
/// contribute their host `path` rather than a JSON rendering (spec §4.C
/// step 3, "File values contribute their path").
fn element_token(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::File(file) => Some(file.path.clone()),
        Value::Directory(dir) => Some(dir.path.clone()),
        other => Some(stringify(other)),
    }
}

fn resolve_template(template: &RedirectTemplate, inputs: &IndexMap<String, Value>, runtime: &RuntimeContext) -> Result<Option<String>, ExpressionKind> {
    let Some(source) = template else { return Ok(None) };
    let ctx = EvalContext::new(inputs.clone(), Value::Null, expr::runtime_to_map(runtime));
    let resolved = stringify(&expr::evaluate(source, &ctx)?);
    Ok(if resolved.trim().is_empty() { None } else { Some(resolved) })
}
