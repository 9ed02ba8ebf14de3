use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Result, WeftError};

/// A type-erased value tagged with the Rust type it was created from.
///
/// Step outputs and context entries travel through the engine as
/// `ContextValue`s. Decoding checks the recorded type tag, so asking for a
/// `u32` where a `String` was stored fails instead of silently coercing.
///
/// Tags are compared without module paths, and borrowed forms fold into
/// their owned equivalents: a value put as `&str` reads back as `String`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextValue {
    type_name: String,
    value: serde_json::Value,
}

impl ContextValue {
    /// Wrap a value, remembering its type.
    pub fn of<T: Serialize + ?Sized + 'static>(value: &T) -> Result<Self> {
        Ok(Self {
            type_name: type_tag::<T>(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Build an envelope from raw JSON with an explicit type descriptor.
    pub fn from_json(type_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    /// Name of the type this value was created from.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Raw JSON payload.
    pub fn as_json(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.matches_type(&type_tag::<T>())
    }

    /// Whether this value was created from the type named `type_name`.
    pub fn matches_type(&self, type_name: &str) -> bool {
        normalize_type_name(&self.type_name) == normalize_type_name(type_name)
    }

    /// Decode into `T`, failing on a type mismatch. `key` names the value in
    /// the error.
    pub fn decode<T: DeserializeOwned + 'static>(&self, key: &str) -> Result<T> {
        if !self.is::<T>() {
            return Err(WeftError::TypeMismatch {
                key: key.to_string(),
                expected: type_tag::<T>(),
                actual: self.type_name.clone(),
            });
        }
        serde_json::from_value(self.value.clone()).map_err(|e| WeftError::TypeMismatch {
            key: key.to_string(),
            expected: type_tag::<T>(),
            actual: format!("{} ({})", self.type_name, e),
        })
    }
}

/// Tag recorded for values of type `T`.
pub(crate) fn type_tag<T: ?Sized>() -> String {
    normalize_type_name(std::any::type_name::<T>())
}

/// Drop module paths and leading references; `str` becomes `String` and an
/// unsized slice `[T]` becomes `Vec<T>`, matching how they serialize.
pub(crate) fn normalize_type_name(name: &str) -> String {
    let mut name = name.trim();
    loop {
        if let Some(rest) = name.strip_prefix('&') {
            name = rest.trim_start();
        } else if let Some(rest) = name.strip_prefix("mut ") {
            name = rest;
        } else {
            break;
        }
    }

    let short = strip_paths(name);
    if short == "str" {
        return "String".to_string();
    }
    if let Some(element) = short.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if !element.contains(';') {
            return format!("Vec<{}>", element);
        }
    }
    short
}

fn strip_paths(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut path = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            path.push(c);
        } else {
            out.push_str(last_segment(&path));
            path.clear();
            out.push(c);
        }
    }
    out.push_str(last_segment(&path));
    out
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Immutable key/value data threaded through step executions.
///
/// Every mutating operation returns a new context and leaves the original
/// untouched, so steps running concurrently can share one safely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowContext {
    entries: Arc<BTreeMap<String, ContextValue>>,
}

impl WorkflowContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `key` set to `value`.
    pub fn put<T: Serialize + 'static>(&self, key: impl Into<String>, value: T) -> Result<Self> {
        Ok(self.put_value(key, ContextValue::of(&value)?))
    }

    /// Return a copy with `key` set to an already wrapped value.
    pub fn put_value(&self, key: impl Into<String>, value: ContextValue) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(key.into(), value);
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Return a copy with all `values` inserted.
    pub fn put_all<I, K>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, ContextValue)>,
        K: Into<String>,
    {
        let mut entries = (*self.entries).clone();
        for (key, value) in values {
            entries.insert(key.into(), value);
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Return a copy containing this context's entries overlaid by `other`'s.
    pub fn merge(&self, other: &WorkflowContext) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        self.put_all(
            other
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        )
    }

    /// Return a copy without `key`.
    pub fn remove(&self, key: &str) -> Self {
        if !self.entries.contains_key(key) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.remove(key);
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Typed lookup. An absent key yields `Ok(None)`; a value stored under a
    /// different type yields `TypeMismatch`.
    pub fn get<T: DeserializeOwned + 'static>(&self, key: &str) -> Result<Option<T>> {
        self.entries
            .get(key)
            .map(|value| value.decode(key))
            .transpose()
    }

    /// Typed lookup that fails when the key is absent.
    pub fn get_required<T: DeserializeOwned + 'static>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| WeftError::MissingContextKey(key.to_string()))
    }

    /// Untyped lookup of the wrapped value.
    pub fn get_value(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContextValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Page {
        url: String,
        words: u32,
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let page = Page {
            url: "https://example.com".into(),
            words: 120,
        };
        let ctx = WorkflowContext::new().put("page", page.clone()).unwrap();

        let loaded: Option<Page> = ctx.get("page").unwrap();
        assert_eq!(loaded, Some(page));
    }

    #[test]
    fn test_get_absent_key_is_none() {
        let ctx = WorkflowContext::new();
        let value: Option<String> = ctx.get("missing").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_get_required_absent_key_fails() {
        let ctx = WorkflowContext::new();
        let err = ctx.get_required::<String>("missing").unwrap_err();
        assert!(matches!(err, WeftError::MissingContextKey(k) if k == "missing"));
    }

    #[test]
    fn test_get_with_wrong_type_fails() {
        let ctx = WorkflowContext::new().put("count", 3u32).unwrap();
        let err = ctx.get::<String>("count").unwrap_err();
        assert!(matches!(err, WeftError::TypeMismatch { ref key, .. } if key == "count"));
    }

    #[test]
    fn test_put_is_copy_on_write() {
        let original = WorkflowContext::new().put("a", 1i64).unwrap();
        let updated = original.put("b", 2i64).unwrap();

        assert_eq!(original.len(), 1);
        assert_eq!(updated.len(), 2);
        assert!(!original.contains_key("b"));
    }

    #[test]
    fn test_merge_overlays_other() {
        let left = WorkflowContext::new()
            .put("a", 1i64)
            .unwrap()
            .put("b", 2i64)
            .unwrap();
        let right = WorkflowContext::new().put("b", 20i64).unwrap();

        let merged = left.merge(&right);
        assert_eq!(merged.get::<i64>("a").unwrap(), Some(1));
        assert_eq!(merged.get::<i64>("b").unwrap(), Some(20));
        assert_eq!(left.get::<i64>("b").unwrap(), Some(2));
    }

    #[test]
    fn test_remove_returns_new_context() {
        let ctx = WorkflowContext::new().put("a", true).unwrap();
        let removed = ctx.remove("a");
        assert!(ctx.contains_key("a"));
        assert!(removed.is_empty());
    }

    #[test]
    fn test_context_serializes_with_type_tags() {
        let ctx = WorkflowContext::new().put("n", 5u8).unwrap();
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["n"]["type_name"], "u8");

        let restored: WorkflowContext = serde_json::from_value(json).unwrap();
        assert_eq!(restored.get::<u8>("n").unwrap(), Some(5));
    }

    #[test]
    fn test_borrowed_str_reads_back_as_string() {
        let ctx = WorkflowContext::new()
            .put("url", "https://example.com")
            .unwrap();

        assert_eq!(ctx.get_value("url").unwrap().type_name(), "String");
        assert_eq!(
            ctx.get::<String>("url").unwrap().as_deref(),
            Some("https://example.com")
        );
        assert!(ctx.get::<u64>("url").is_err());
    }

    #[test]
    fn test_stored_tags_with_module_paths_still_decode() {
        let json = serde_json::json!({
            "url": {"type_name": "alloc::string::String", "value": "https://example.com"},
            "tags": {"type_name": "alloc::vec::Vec<alloc::string::String>", "value": ["news"]},
            "count": {"type_name": "u64", "value": 3}
        });
        let ctx: WorkflowContext = serde_json::from_value(json).unwrap();

        assert_eq!(
            ctx.get::<String>("url").unwrap(),
            Some("https://example.com".to_string())
        );
        assert_eq!(ctx.get::<Vec<String>>("tags").unwrap(), Some(vec!["news".to_string()]));
        let err = ctx.get::<String>("count").unwrap_err();
        assert!(matches!(err, WeftError::TypeMismatch { ref actual, .. } if actual == "u64"));
    }

    #[test]
    fn test_type_names_normalize() {
        assert_eq!(normalize_type_name("&str"), "String");
        assert_eq!(normalize_type_name("&mut alloc::string::String"), "String");
        assert_eq!(normalize_type_name("[u8]"), "Vec<u8>");
        assert_eq!(normalize_type_name("[u8; 4]"), "[u8; 4]");
        assert_eq!(
            normalize_type_name("core::option::Option<my_app::Page>"),
            "Option<Page>"
        );
        assert_eq!(type_tag::<&[u16]>(), "Vec<u16>");
    }
}
