//! The polymorphic value model and the File/Directory object shapes.
//!
//! Input and output values are a sum type: `null | bool | int | float |
//! string | list | mapping | File | Directory`. File and Directory are never
//! plain strings — they are always mappings carrying a `class` discriminator,
//! which is why [`Value`] models them as dedicated variants rather than
//! leaning on `serde_json::Value`'s untyped object representation.

use std::fmt;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Maximum number of bytes `loadContents` will read into a [`FileObject`].
pub const LOAD_CONTENTS_LIMIT: usize = 64 * 1024;

/// A polymorphic WFL value.
///
/// File and Directory are plain JSON objects distinguished only by a
/// `class` field, which an untagged enum's usual "try each variant in
/// order" deserialization can't see — it would match `Mapping` before ever
/// trying `File`/`Directory`. [`Value`] instead implements [`Deserialize`]
/// by hand, inspecting `class` up front (see [`Value::from_json`]).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Mapping(indexmap::IndexMap<String, Value>),
    File(FileObject),
    Directory(DirectoryObject),
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = JsonValue::deserialize(deserializer)?;
        Ok(Value::from_json(json))
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Returns the length used by the `.length` strictness rule in the
    /// Expression Evaluator: defined only for lists and strings. A mapping's
    /// `.length` is not its entry count — it resolves as an ordinary member
    /// lookup of a declared `length` field, which the evaluator handles
    /// itself rather than through this method.
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(items.len()),
            Value::String(text) => Some(text.chars().count()),
            _ => None,
        }
    }

    /// True for any non-`Null` value.
    pub fn is_present(&self) -> bool {
        !matches!(self, Value::Null)
    }

    /// The host path a command-line argument contributes for this value, if
    /// any (only File and Directory objects contribute paths).
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Value::File(file) => Some(file.path.as_str()),
            Value::Directory(dir) => Some(dir.path.as_str()),
            _ => None,
        }
    }

    /// Converts to a [`serde_json::Value`] for interchange with the
    /// Expression Evaluator and output serialization.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Builds a `Value` back from JSON, used when the evaluator hands a raw
    /// JSON result back to the caller. Objects carrying `"class": "File"` or
    /// `"class": "Directory"` become the matching variant; every other
    /// object becomes a [`Value::Mapping`].
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => match map.get("class").and_then(JsonValue::as_str) {
                Some("File") => serde_json::from_value(JsonValue::Object(map)).map(Value::File).unwrap_or(Value::Null),
                Some("Directory") => serde_json::from_value(JsonValue::Object(map)).map(Value::Directory).unwrap_or(Value::Null),
                _ => Value::Mapping(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect()),
            },
        }
    }
}

/// Deterministic string conversion per spec §4.A "String conversion":
/// `null` -> `"null"`; booleans -> `"true"`/`"false"`; integers -> decimal;
/// floats -> fixed notation (never scientific); strings -> themselves;
/// mappings/lists -> JSON with `", "`/`": "` separators and lexicographically
/// sorted keys, so output is deterministic and cross-implementation
/// comparable.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float_fixed(*f),
        Value::String(s) => s.clone(),
        Value::List(_) | Value::Mapping(_) => stringify_json(&value.to_json()),
        Value::File(file) => stringify_json(&serde_json::to_value(file).unwrap_or(JsonValue::Null)),
        Value::Directory(dir) => stringify_json(&serde_json::to_value(dir).unwrap_or(JsonValue::Null)),
    }
}

fn format_float_fixed(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        let mut s = format!("{f}");
        if s.contains('e') || s.contains('E') {
            s = format!("{f:.17}");
            while s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.push('0');
            }
        }
        s
    }
}

fn stringify_json(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body = keys
                .iter()
                .map(|k| format!("\"{}\": {}", k, stringify_json(&map[*k])))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{body}}}")
        }
        JsonValue::Array(items) => {
            let body = items.iter().map(stringify_json).collect::<Vec<_>>().join(", ");
            format!("[{body}]")
        }
        JsonValue::String(s) => format!("\"{s}\""),
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
    }
}

/// A File object: `class="File"`, always a mapping, never a bare string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileObject {
    #[serde(default = "file_class")]
    pub class: String,
    pub location: String,
    pub path: String,
    pub basename: String,
    pub dirname: String,
    pub nameroot: String,
    pub nameext: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    /// Present only if `loadContents` was requested; bounded to
    /// [`LOAD_CONTENTS_LIMIT`] bytes.
    #[serde(default)]
    pub contents: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub secondary_files: Vec<Value>,
}

fn file_class() -> String {
    "File".to_string()
}

impl FileObject {
    /// Builds a File object from an absolute host path, deriving
    /// `location`/`basename`/`dirname`/`nameroot`/`nameext` per the
    /// invariants in spec §3.
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let (dirname, basename) = split_dirname_basename(&path);
        let (nameroot, nameext) = split_nameroot_ext(&basename);
        Self {
            class: file_class(),
            location: format!("file://{path}"),
            path,
            basename,
            dirname,
            nameroot,
            nameext,
            size: None,
            checksum: None,
            contents: None,
            format: None,
            secondary_files: Vec::new(),
        }
    }
}

/// A Directory object: `class="Directory"`, recursive `listing`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DirectoryObject {
    #[serde(default = "dir_class")]
    pub class: String,
    pub location: String,
    pub path: String,
    pub basename: String,
    #[serde(default)]
    pub listing: Vec<Value>,
}

fn dir_class() -> String {
    "Directory".to_string()
}

impl DirectoryObject {
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let (_, basename) = split_dirname_basename(&path);
        Self {
            class: dir_class(),
            location: format!("file://{path}"),
            path,
            basename,
            listing: Vec::new(),
        }
    }
}

fn split_dirname_basename(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((dir, base)) if !dir.is_empty() => (dir.to_string(), base.to_string()),
        Some((_, base)) => ("/".to_string(), base.to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn split_nameroot_ext(basename: &str) -> (String, String) {
    match basename.rfind('.') {
        Some(0) => (basename.to_string(), String::new()),
        Some(idx) => (basename[..idx].to_string(), basename[idx..].to_string()),
        None => (basename.to_string(), String::new()),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&stringify(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_from_path_derives_name_parts() {
        let file = FileObject::from_path("/work/output/sample.contigs.fasta");
        assert_eq!(file.location, "file:///work/output/sample.contigs.fasta");
        assert_eq!(file.basename, "sample.contigs.fasta");
        assert_eq!(file.dirname, "/work/output");
        assert_eq!(file.nameroot, "sample.contigs");
        assert_eq!(file.nameext, ".fasta");
        assert_eq!(format!("{}{}", file.nameroot, file.nameext), file.basename);
    }

    #[test]
    fn length_is_defined_for_lists_and_strings_only() {
        assert_eq!(Value::String("abc".into()).length(), Some(3));
        assert_eq!(Value::List(vec![Value::Int(1), Value::Int(2)]).length(), Some(2));
        assert_eq!(Value::Int(5).length(), None);
        assert_eq!(Value::Bool(true).length(), None);
        assert_eq!(Value::Mapping(indexmap::IndexMap::new()).length(), None);
    }

    #[test]
    fn stringify_integers_never_use_scientific_notation() {
        let s = stringify(&Value::Int(1_000_000));
        assert!(!s.contains('e') && !s.contains('E'));
        assert_eq!(s, "1000000");
    }

    #[test]
    fn stringify_floats_use_fixed_notation() {
        let s = stringify(&Value::Float(3.5));
        assert!(!s.contains('e') && !s.contains('E'));
        assert_eq!(s, "3.5");
    }

    #[test]
    fn stringify_mappings_sort_keys_lexicographically() {
        let mut map = indexmap::IndexMap::new();
        map.insert("zeta".to_string(), Value::Int(1));
        map.insert("alpha".to_string(), Value::Int(2));
        let s = stringify(&Value::Mapping(map));
        assert_eq!(s, "{\"alpha\": 2, \"zeta\": 1}");
    }
}
