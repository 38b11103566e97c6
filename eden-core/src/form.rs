//! Request bodies, multipart form data and files
//!
//! JSON cannot hold binary data, so a JSON body carries its files out of band
//! as `(path, file)` pairs where `path` is a dotted path into the JSON value
//! (`"avatar"`, `"photos.1"`, `"profile.avatar"`). Depending on where the files
//! sit, the resolver sends such a body either as flat multipart fields or as a
//! `body` + `files.path`/`files.file` envelope.

use bytes::Bytes;
use serde_json::{Map, Value};

/// An in-memory file
#[derive(Debug, Clone, PartialEq)]
pub struct EdenFile {
    /// File name reported in the multipart part
    pub name: String,
    /// MIME type, if known
    pub content_type: Option<String>,
    /// File contents
    pub data: Bytes,
}

impl EdenFile {
    /// Create a file without a content type
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    /// Set the MIME type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// One multipart field value
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File(EdenFile),
}

impl FormValue {
    /// The text value, if this is a text field
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormValue::Text(s) => Some(s),
            FormValue::File(_) => None,
        }
    }

    /// The file, if this is a file field
    pub fn as_file(&self) -> Option<&EdenFile> {
        match self {
            FormValue::File(f) => Some(f),
            FormValue::Text(_) => None,
        }
    }
}

/// Ordered multipart form; names may repeat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text field
    pub fn append_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries
            .push((name.into(), FormValue::Text(value.into())));
    }

    /// Append a file field
    pub fn append_file(&mut self, name: impl Into<String>, file: EdenFile) {
        self.entries.push((name.into(), FormValue::File(file)));
    }

    /// Append any field value
    pub fn append(&mut self, name: impl Into<String>, value: FormValue) {
        self.entries.push((name.into(), value));
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Every value for `name`, in insertion order
    pub fn get_all(&self, name: &str) -> Vec<&FormValue> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn into_entries(self) -> Vec<(String, FormValue)> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any field is a file
    pub fn has_files(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, v)| matches!(v, FormValue::File(_)))
    }

    /// Flatten a JSON object plus top-level files into form fields
    ///
    /// Strings are sent as-is, other scalars in their JSON spelling, nested
    /// values as JSON text and `null` is skipped. A file at `name.<index>` is
    /// appended under `name`.
    pub fn from_json_with_files(value: &Value, files: &[(String, EdenFile)]) -> Self {
        let mut form = FormData::new();

        if let Value::Object(map) = value {
            for (key, field) in map {
                if let Some(text) = form_text(field) {
                    form.append_text(key.clone(), text);
                }
            }
        }

        for (path, file) in files {
            let name = path.split('.').next().unwrap_or(path);
            form.append_file(name, file.clone());
        }

        form
    }

    /// Wrap serialized JSON and its files into the `body` + `files.*` envelope
    pub fn file_envelope(body: &str, files: &[(String, EdenFile)]) -> Self {
        let mut form = FormData::new();
        form.append_text("body", body);
        for (path, file) in files {
            form.append_text("files.path", path.clone());
            form.append_file("files.file", file.clone());
        }
        form
    }
}

/// Text representation of a JSON value inside a form field
pub fn form_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A request body
#[derive(Debug, Clone, PartialEq)]
pub enum EdenBody {
    /// JSON value with files referenced by dotted path
    Json {
        value: Value,
        files: Vec<(String, EdenFile)>,
    },
    /// Multipart form, sent unchanged
    Form(FormData),
    /// Plain text
    Text(String),
}

impl EdenBody {
    /// JSON body without files
    pub fn json(value: Value) -> Self {
        EdenBody::Json {
            value,
            files: Vec::new(),
        }
    }

    /// Attach a file at `path`; no effect on non-JSON bodies
    pub fn with_file(mut self, path: impl Into<String>, file: EdenFile) -> Self {
        if let EdenBody::Json { files, .. } = &mut self {
            files.push((path.into(), file));
        }
        self
    }

    /// Whether the body carries any file
    pub fn has_files(&self) -> bool {
        match self {
            EdenBody::Json { files, .. } => !files.is_empty(),
            EdenBody::Form(form) => form.has_files(),
            EdenBody::Text(_) => false,
        }
    }

    /// The JSON value, if this is a JSON body
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            EdenBody::Json { value, .. } => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for EdenBody {
    fn from(value: Value) -> Self {
        EdenBody::json(value)
    }
}

impl From<FormData> for EdenBody {
    fn from(form: FormData) -> Self {
        EdenBody::Form(form)
    }
}

impl From<&str> for EdenBody {
    fn from(text: &str) -> Self {
        EdenBody::Text(text.to_string())
    }
}

impl From<String> for EdenBody {
    fn from(text: String) -> Self {
        EdenBody::Text(text)
    }
}

/// Whether every file path names a top-level field or an item of one
///
/// `"avatar"` and `"photos.3"` are top level, `"profile.avatar"` is not.
pub fn files_are_top_level(files: &[(String, EdenFile)]) -> bool {
    files.iter().all(|(path, _)| {
        let mut parts = path.split('.');
        let _field = parts.next();
        match (parts.next(), parts.next()) {
            (None, _) => true,
            (Some(index), None) => !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()),
            _ => false,
        }
    })
}

/// Remove the values at file paths from `value`
///
/// Callers may leave placeholders (usually `null`) where files belong; those
/// are dropped before the JSON is sent.
pub fn strip_file_paths(value: &mut Value, files: &[(String, EdenFile)]) {
    for (path, _) in files {
        let segments: Vec<&str> = path.split('.').collect();
        remove_path(value, &segments);
    }
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    match segments {
        [] => {}
        [last] => match value {
            Value::Object(map) => {
                map.remove(*last);
            }
            Value::Array(items) => {
                if let Some(slot) = last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    *slot = Value::Null;
                }
            }
            _ => {}
        },
        [first, rest @ ..] => {
            let child = match value {
                Value::Object(map) => map.get_mut(*first),
                Value::Array(items) => first.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
                _ => None,
            };
            if let Some(child) = child {
                remove_path(child, rest);
            }
        }
    }
}

/// Build a JSON object from text form fields, collecting repeated names
pub fn form_to_json(form: &FormData) -> Value {
    let mut map = Map::new();
    for (name, value) in form.entries() {
        let item = match value {
            FormValue::Text(text) => Value::String(text.to_string()),
            FormValue::File(file) => file_summary(file),
        };
        insert_repeated(&mut map, name, item);
    }
    Value::Object(map)
}

/// `{filename, contentType, size}` description of a file
pub fn file_summary(file: &EdenFile) -> Value {
    serde_json::json!({
        "filename": file.name,
        "contentType": file.content_type,
        "size": file.size(),
    })
}

/// Insert `item` under `name`, turning repeats into an array
pub fn insert_repeated(map: &mut Map<String, Value>, name: &str, item: Value) {
    match map.get_mut(name) {
        None => {
            map.insert(name.to_string(), item);
        }
        Some(Value::Array(items)) => items.push(item),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, item]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(name: &str) -> EdenFile {
        EdenFile::new(name, b"hello".to_vec()).with_content_type("text/plain")
    }

    #[test]
    fn test_top_level_file_paths() {
        assert!(files_are_top_level(&[("avatar".into(), file("a.png"))]));
        assert!(files_are_top_level(&[("photos.2".into(), file("b.png"))]));
        assert!(!files_are_top_level(&[(
            "profile.avatar".into(),
            file("c.png")
        )]));
        assert!(!files_are_top_level(&[("photos.2.raw".into(), file("d.png"))]));
    }

    #[test]
    fn test_flat_form_from_json() {
        let files = vec![
            ("photos.0".to_string(), file("one.png")),
            ("photos.1".to_string(), file("two.png")),
        ];
        let form = FormData::from_json_with_files(
            &json!({"title": "trip", "count": 2, "draft": false, "skip": null}),
            &files,
        );

        assert_eq!(form.get("title").and_then(|v| v.as_text()), Some("trip"));
        assert_eq!(form.get("count").and_then(|v| v.as_text()), Some("2"));
        assert_eq!(form.get("draft").and_then(|v| v.as_text()), Some("false"));
        assert!(form.get("skip").is_none());
        assert_eq!(form.get_all("photos").len(), 2);
    }

    #[test]
    fn test_file_envelope_pairs() {
        let files = vec![("profile.avatar".to_string(), file("me.png"))];
        let form = FormData::file_envelope(r#"{"profile":{}}"#, &files);

        assert_eq!(
            form.get("body").and_then(|v| v.as_text()),
            Some(r#"{"profile":{}}"#)
        );
        assert_eq!(
            form.get("files.path").and_then(|v| v.as_text()),
            Some("profile.avatar")
        );
        assert_eq!(
            form.get("files.file")
                .and_then(|v| v.as_file())
                .map(|f| f.name.as_str()),
            Some("me.png")
        );
    }

    #[test]
    fn test_strip_file_paths() {
        let mut value = json!({"profile": {"avatar": null, "name": "x"}, "photos": [null, 1]});
        strip_file_paths(
            &mut value,
            &[
                ("profile.avatar".to_string(), file("a")),
                ("photos.0".to_string(), file("b")),
            ],
        );
        assert_eq!(value, json!({"profile": {"name": "x"}, "photos": [null, 1]}));
    }

    #[test]
    fn test_form_to_json_collects_repeats() {
        let mut form = FormData::new();
        form.append_text("tag", "a");
        form.append_text("tag", "b");
        form.append_file("upload", file("x.txt"));

        let value = form_to_json(&form);
        assert_eq!(value["tag"], json!(["a", "b"]));
        assert_eq!(value["upload"]["filename"], json!("x.txt"));
        assert_eq!(value["upload"]["size"], json!(5));
    }
}
