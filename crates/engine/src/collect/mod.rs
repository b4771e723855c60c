//! The Output Collector (spec §4.F): resolves stdout/stderr captures,
//! matches `outputBinding` globs, builds File/Directory objects with
//! checksums and (optionally) loaded contents, derives `secondaryFiles`,
//! honors a `cwl.output.json` override, and resolves namespaced `format`
//! URIs.

use std::path::Path;

use indexmap::IndexMap;
use sha1::{Digest, Sha1};
use wfl_types::{CollectKind, DirectoryObject, FileObject, RuntimeContext, Tool, ToolOutput, Value, LOAD_CONTENTS_LIMIT};

use crate::expr::{self, EvalContext};
use crate::runtime::RunResult;

const DEFAULT_STDOUT_NAME: &str = "cwl.stdout.txt";
const DEFAULT_STDERR_NAME: &str = "cwl.stderr.txt";
const OUTPUT_OVERRIDE_FILE: &str = "cwl.output.json";

/// Collects every declared output of `tool` out of `work_dir` after a run
/// (spec §4.F steps 1-5).
pub fn collect_outputs(
    tool: &Tool,
    work_dir: &Path,
    run_result: &RunResult,
    inputs: &IndexMap<String, Value>,
    runtime: &RuntimeContext,
    namespaces: &IndexMap<String, String>,
) -> Result<IndexMap<String, Value>, CollectKind> {
    if let Some(overridden) = read_output_override(work_dir)? {
        return Ok(overridden);
    }

    let mut outputs = IndexMap::new();
    for (id, tool_output) in &tool.outputs {
        let value = collect_one_output(tool_output, work_dir, run_result, inputs, runtime, namespaces)?;
        outputs.insert(id.clone(), value);
    }
    Ok(outputs)
}

fn collect_one_output(
    output: &ToolOutput,
    work_dir: &Path,
    run_result: &RunResult,
    inputs: &IndexMap<String, Value>,
    runtime: &RuntimeContext,
    namespaces: &IndexMap<String, String>,
) -> Result<Value, CollectKind> {
    match output.type_tag.trim_end_matches('?') {
        "stdout" => return resolve_stream(work_dir, DEFAULT_STDOUT_NAME, run_result.stdout_capture.as_deref()).map(Value::File),
        "stderr" => return resolve_stream(work_dir, DEFAULT_STDERR_NAME, run_result.stderr_capture.as_deref()).map(Value::File),
        _ => {}
    }

    let Some(binding) = &output.output_binding else {
        return Ok(Value::Null);
    };

    let is_array = output.type_tag.trim_end_matches('?').ends_with("[]");
    let is_optional = output.type_tag.trim_end_matches("[]").ends_with('?');

    let mut matches = Vec::new();
    for pattern_source in &binding.glob {
        let pattern = evaluate_glob_pattern(pattern_source, inputs, runtime)?;
        for entry in glob_matches(work_dir, &pattern)? {
            matches.push(build_match_object(&entry, binding.load_contents)?);
        }
    }

    if matches.is_empty() && !is_array && !is_optional {
        return Err(CollectKind::GlobEmpty(binding.glob.join(", ")));
    }

    let value = if let Some(output_eval_source) = &binding.output_eval {
        let self_value = Value::List(matches);
        let ctx = EvalContext::new(inputs.clone(), self_value, expr::runtime_to_map(runtime)).for_output_eval();
        expr::evaluate(output_eval_source, &ctx).map_err(|e| CollectKind::OutputEvalFailed(e.to_string()))?
    } else if is_array {
        Value::List(matches)
    } else {
        matches.into_iter().next().unwrap_or(Value::Null)
    };

    let value = attach_secondary_files(value, &output.secondary_files)?;
    Ok(resolve_format(value, output.format.as_deref(), namespaces))
}

fn resolve_stream(work_dir: &Path, default_name: &str, captured: Option<&str>) -> Result<FileObject, CollectKind> {
    let path = work_dir.join(default_name);
    if let Some(contents) = captured {
        std::fs::write(&path, contents).map_err(|e| CollectKind::ChecksumFailed { path: path.display().to_string(), reason: e.to_string() })?;
    }
    build_file_object(&path, false)
}

fn evaluate_glob_pattern(source: &str, inputs: &IndexMap<String, Value>, runtime: &RuntimeContext) -> Result<String, CollectKind> {
    let ctx = EvalContext::new(inputs.clone(), Value::Null, expr::runtime_to_map(runtime));
    let value = expr::evaluate(source, &ctx).map_err(|e| CollectKind::MalformedOverride(e.to_string()))?;
    Ok(wfl_types::stringify(&value))
}

fn glob_matches(work_dir: &Path, pattern: &str) -> Result<Vec<std::path::PathBuf>, CollectKind> {
    let full_pattern = work_dir.join(pattern);
    let pattern_str = full_pattern.to_string_lossy().to_string();
    let paths = glob::glob(&pattern_str).map_err(|e| CollectKind::MalformedOverride(e.to_string()))?;
    let mut matches = Vec::new();
    for entry in paths {
        matches.push(entry.map_err(|e| CollectKind::ChecksumFailed { path: pattern.to_string(), reason: e.to_string() })?);
    }
    matches.sort();
    Ok(matches)
}

fn build_match_object(path: &Path, load_contents: bool) -> Result<Value, CollectKind> {
    if path.is_dir() {
        Ok(Value::Directory(build_directory_object(path)?))
    } else {
        Ok(Value::File(build_file_object(path, load_contents)?))
    }
}

fn build_file_object(path: &Path, load_contents: bool) -> Result<FileObject, CollectKind> {
    let metadata = std::fs::metadata(path).map_err(|e| CollectKind::ChecksumFailed { path: path.display().to_string(), reason: e.to_string() })?;
    let bytes = std::fs::read(path).map_err(|e| CollectKind::ChecksumFailed { path: path.display().to_string(), reason: e.to_string() })?;

    let mut file = FileObject::from_path(path.display().to_string());
    file.size = Some(metadata.len());
    file.checksum = Some(sha1_checksum(&bytes));

    if load_contents {
        if bytes.len() > LOAD_CONTENTS_LIMIT {
            return Err(CollectKind::ChecksumFailed { path: path.display().to_string(), reason: format!("exceeds loadContents limit of {LOAD_CONTENTS_LIMIT} bytes") });
        }
        file.contents = Some(String::from_utf8_lossy(&bytes).into_owned());
    }

    Ok(file)
}

fn build_directory_object(path: &Path) -> Result<DirectoryObject, CollectKind> {
    let mut directory = DirectoryObject::from_path(path.display().to_string());
    let entries = std::fs::read_dir(path).map_err(|e| CollectKind::ChecksumFailed { path: path.display().to_string(), reason: e.to_string() })?;
    for entry in entries {
        let entry = entry.map_err(|e| CollectKind::ChecksumFailed { path: path.display().to_string(), reason: e.to_string() })?;
        directory.listing.push(build_match_object(&entry.path(), false)?);
    }
    Ok(directory)
}

fn sha1_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("sha1${:x}", hasher.finalize())
}

/// Derives and attaches `secondaryFiles` (spec §4.F step 3): strip as many
/// trailing extensions as leading `^`s in the pattern, then append the
/// pattern remainder; attach only if the resulting file exists.
fn attach_secondary_files(value: Value, patterns: &[String]) -> Result<Value, CollectKind> {
    if patterns.is_empty() {
        return Ok(value);
    }
    match value {
        Value::File(mut file) => {
            for pattern in patterns {
                if let Some(secondary) = derive_secondary_file(&file, pattern)? {
                    file.secondary_files.push(Value::File(secondary));
                }
            }
            Ok(Value::File(file))
        }
        other => Ok(other),
    }
}

fn derive_secondary_file(primary: &FileObject, pattern: &str) -> Result<Option<FileObject>, CollectKind> {
    let carets = pattern.chars().take_while(|c| *c == '^').count();
    let suffix = &pattern[carets..];

    let mut stem = primary.basename.clone();
    for _ in 0..carets {
        stem = match stem.rfind('.') {
            Some(0) | None => stem,
            Some(idx) => stem[..idx].to_string(),
        };
    }

    let secondary_name = format!("{stem}{suffix}");
    let secondary_path = if primary.dirname.is_empty() { secondary_name.clone() } else { format!("{}/{}", primary.dirname, secondary_name) };

    if !std::path::Path::new(&secondary_path).exists() {
        return Ok(None);
    }
    Ok(Some(build_file_object(std::path::Path::new(&secondary_path), false)?))
}

fn resolve_format(value: Value, format: Option<&str>, namespaces: &IndexMap<String, String>) -> Value {
    let Some(format) = format else { return value };
    let Value::File(mut file) = value else { return value };
    file.format = Some(resolve_namespaced_uri(format, namespaces));
    Value::File(file)
}

fn resolve_namespaced_uri(format: &str, namespaces: &IndexMap<String, String>) -> String {
    match format.split_once(':') {
        Some((prefix, rest)) if namespaces.contains_key(prefix) => format!("{}{}", namespaces[prefix], rest),
        _ => format.to_string(),
    }
}

/// Reads a `cwl.output.json` override (spec §4.F step 4), if present,
/// filling in `size`/`checksum`/`basename` for any File/Directory entries
/// and making their paths absolute relative to `work_dir`.
fn read_output_override(work_dir: &Path) -> Result<Option<IndexMap<String, Value>>, CollectKind> {
    let override_path = work_dir.join(OUTPUT_OVERRIDE_FILE);
    if !override_path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&override_path).map_err(|e| CollectKind::MalformedOverride(e.to_string()))?;
    let parsed: IndexMap<String, serde_json::Value> = serde_json::from_str(&raw).map_err(|e| CollectKind::MalformedOverride(e.to_string()))?;

    let mut outputs = IndexMap::new();
    for (id, json) in parsed {
        outputs.insert(id, normalize_override_value(json, work_dir)?);
    }
    Ok(Some(outputs))
}

fn normalize_override_value(json: serde_json::Value, work_dir: &Path) -> Result<Value, CollectKind> {
    let mut value = Value::from_json(json);
    if let Value::File(file) = &mut value {
        normalize_override_path(&mut file.path, &mut file.location, work_dir);
        if file.basename.is_empty() {
            file.basename = Path::new(&file.path).file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        }
        if file.size.is_none() || file.checksum.is_none() {
            let rebuilt = build_file_object(Path::new(&file.path), false)?;
            file.size = file.size.or(rebuilt.size);
            file.checksum = file.checksum.clone().or(rebuilt.checksum);
        }
    }
    if let Value::Directory(dir) = &mut value {
        normalize_override_path(&mut dir.path, &mut dir.location, work_dir);
    }
    Ok(value)
}

fn normalize_override_path(path: &mut String, location: &mut String, work_dir: &Path) {
    if !path.starts_with('/') {
        *path = work_dir.join(&path).display().to_string();
    }
    *location = format!("file://{path}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfl_types::OutputBinding;

    fn runtime_ctx(work_dir: &Path) -> RuntimeContext {
        RuntimeContext::for_command_building(work_dir.display().to_string(), "/tmp/wfl".to_string(), 1, 1024)
    }

    #[test]
    fn stdout_capture_is_written_and_checksummed() {
        let dir = tempfile::tempdir().unwrap();
        let result = RunResult { exit_code: 0, stdout_capture: Some("hello world\n".to_string()), stderr_capture: None };

        let file = resolve_stream(dir.path(), DEFAULT_STDOUT_NAME, result.stdout_capture.as_deref()).unwrap();
        assert_eq!(file.basename, "cwl.stdout.txt");
        assert!(file.checksum.unwrap().starts_with("sha1$"));
        assert_eq!(std::fs::read_to_string(dir.path().join("cwl.stdout.txt")).unwrap(), "hello world\n");
    }

    #[test]
    fn glob_match_populates_basename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test-output.txt"), b"").unwrap();

        let mut tool = sample_tool();
        tool.outputs.insert(
            "result".into(),
            ToolOutput {
                id: "result".into(),
                type_tag: "File".into(),
                output_binding: Some(OutputBinding { glob: vec!["*.txt".into()], ..Default::default() }),
                secondary_files: Vec::new(),
                record_fields: Vec::new(),
                format: None,
            },
        );

        let runtime = runtime_ctx(dir.path());
        let result = RunResult::default();
        let outputs = collect_outputs(&tool, dir.path(), &result, &IndexMap::new(), &runtime, &IndexMap::new()).unwrap();
        let Value::File(file) = &outputs["result"] else { panic!("expected file") };
        assert_eq!(file.basename, "test-output.txt");
    }

    #[test]
    fn empty_glob_for_non_optional_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = sample_tool();
        tool.outputs.insert(
            "result".into(),
            ToolOutput {
                id: "result".into(),
                type_tag: "File".into(),
                output_binding: Some(OutputBinding { glob: vec!["*.missing".into()], ..Default::default() }),
                secondary_files: Vec::new(),
                record_fields: Vec::new(),
                format: None,
            },
        );
        let runtime = runtime_ctx(dir.path());
        let err = collect_outputs(&tool, dir.path(), &RunResult::default(), &IndexMap::new(), &runtime, &IndexMap::new()).unwrap_err();
        assert!(matches!(err, CollectKind::GlobEmpty(_)));
    }

    #[test]
    fn empty_glob_for_array_type_returns_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = sample_tool();
        tool.outputs.insert(
            "results".into(),
            ToolOutput {
                id: "results".into(),
                type_tag: "File[]".into(),
                output_binding: Some(OutputBinding { glob: vec!["*.missing".into()], ..Default::default() }),
                secondary_files: Vec::new(),
                record_fields: Vec::new(),
                format: None,
            },
        );
        let runtime = runtime_ctx(dir.path());
        let outputs = collect_outputs(&tool, dir.path(), &RunResult::default(), &IndexMap::new(), &runtime, &IndexMap::new()).unwrap();
        assert_eq!(outputs["results"], Value::List(Vec::new()));
    }

    #[test]
    fn secondary_file_is_attached_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sample.bam"), b"bam").unwrap();
        std::fs::write(dir.path().join("sample.bam.bai"), b"index").unwrap();

        let mut tool = sample_tool();
        tool.outputs.insert(
            "alignment".into(),
            ToolOutput {
                id: "alignment".into(),
                type_tag: "File".into(),
                output_binding: Some(OutputBinding { glob: vec!["*.bam".into()], ..Default::default() }),
                secondary_files: vec![".bai".into()],
                record_fields: Vec::new(),
                format: None,
            },
        );
        let runtime = runtime_ctx(dir.path());
        let outputs = collect_outputs(&tool, dir.path(), &RunResult::default(), &IndexMap::new(), &runtime, &IndexMap::new()).unwrap();
        let Value::File(file) = &outputs["alignment"] else { panic!("expected file") };
        assert_eq!(file.secondary_files.len(), 1);
    }

    #[test]
    fn load_contents_at_exactly_the_limit_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![b'a'; LOAD_CONTENTS_LIMIT]).unwrap();

        let mut tool = sample_tool();
        tool.outputs.insert(
            "result".into(),
            ToolOutput {
                id: "result".into(),
                type_tag: "File".into(),
                output_binding: Some(OutputBinding { glob: vec!["big.txt".into()], load_contents: true, ..Default::default() }),
                secondary_files: Vec::new(),
                record_fields: Vec::new(),
                format: None,
            },
        );
        let runtime = runtime_ctx(dir.path());
        let outputs = collect_outputs(&tool, dir.path(), &RunResult::default(), &IndexMap::new(), &runtime, &IndexMap::new()).unwrap();
        let Value::File(file) = &outputs["result"] else { panic!("expected file") };
        assert_eq!(file.contents.as_ref().unwrap().len(), LOAD_CONTENTS_LIMIT);
    }

    #[test]
    fn load_contents_over_the_limit_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![b'a'; LOAD_CONTENTS_LIMIT + 1]).unwrap();

        let mut tool = sample_tool();
        tool.outputs.insert(
            "result".into(),
            ToolOutput {
                id: "result".into(),
                type_tag: "File".into(),
                output_binding: Some(OutputBinding { glob: vec!["big.txt".into()], load_contents: true, ..Default::default() }),
                secondary_files: Vec::new(),
                record_fields: Vec::new(),
                format: None,
            },
        );
        let runtime = runtime_ctx(dir.path());
        let err = collect_outputs(&tool, dir.path(), &RunResult::default(), &IndexMap::new(), &runtime, &IndexMap::new()).unwrap_err();
        assert!(matches!(err, CollectKind::ChecksumFailed { .. }));
    }

    fn sample_tool() -> Tool {
        use wfl_types::{BaseCommand, DocumentClass, ToolRequirements};
        Tool {
            id: "tool".into(),
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
            hints: Default::default(),
        }
    }
}
