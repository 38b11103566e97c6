//! Data transformers and the transformer registry
//!
//! A transformer rewrites JSON payloads on their way to and from the server,
//! for example to encode big integers or dates JSON has no type for. The
//! request body goes through `input.serialize`; response data goes through
//! `output.deserialize`.
//!
//! # Ids
//!
//! The server picks the matching transformer from the `transformer-id`
//! header, so both sides must derive ids the same way from the same
//! registry. [`resolve_transformers`] flattens a registry into a list:
//!
//! - a transformer with its own id keeps it
//! - otherwise its id is its position: the list index or map key, joined with
//!   `.` for nested registries
//! - a lone transformer without an id gets `"0"`
//!
//! # Examples
//!
//! ```rust
//! use eden_core::transformer::{resolve_transformers, FnTransformer, TransformerInput};
//! use std::sync::Arc;
//!
//! let plain = TransformerInput::single(Arc::new(FnTransformer::identity()));
//! let registry = TransformerInput::Keyed(vec![("plain".to_string(), plain)]);
//!
//! let resolved = resolve_transformers(&registry);
//! assert_eq!(resolved[0].id, "plain");
//! ```

use crate::error::Result;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Serialize/deserialize pair applied to payloads
pub trait DataTransformer: Send + Sync {
    /// Turn an application value into its wire form
    fn serialize(&self, value: &Value) -> Result<Value>;

    /// Turn a wire value back into its application form
    fn deserialize(&self, value: &Value) -> Result<Value>;

    /// Stable id used for wire tagging
    fn id(&self) -> Option<&str> {
        None
    }
}

type TransformFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Transformer built from two closures
#[derive(Clone)]
pub struct FnTransformer {
    id: Option<String>,
    serialize: TransformFn,
    deserialize: TransformFn,
}

impl FnTransformer {
    pub fn new<S, D>(serialize: S, deserialize: D) -> Self
    where
        S: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
        D: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            id: None,
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        }
    }

    /// Transformer that passes values through unchanged
    pub fn identity() -> Self {
        Self::new(|v| Ok(v.clone()), |v| Ok(v.clone()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl DataTransformer for FnTransformer {
    fn serialize(&self, value: &Value) -> Result<Value> {
        (self.serialize)(value)
    }

    fn deserialize(&self, value: &Value) -> Result<Value> {
        (self.deserialize)(value)
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Separate transformers for requests and responses
#[derive(Clone)]
pub struct CombinedTransformer {
    pub id: Option<String>,
    pub input: Arc<dyn DataTransformer>,
    pub output: Arc<dyn DataTransformer>,
}

/// A transformer or a registry of them
#[derive(Clone)]
pub enum TransformerInput {
    Single(Arc<dyn DataTransformer>),
    Combined(Arc<CombinedTransformer>),
    List(Vec<TransformerInput>),
    Keyed(Vec<(String, TransformerInput)>),
}

impl TransformerInput {
    pub fn single(transformer: Arc<dyn DataTransformer>) -> Self {
        TransformerInput::Single(transformer)
    }

    pub fn combined(
        input: Arc<dyn DataTransformer>,
        output: Arc<dyn DataTransformer>,
    ) -> Self {
        TransformerInput::Combined(Arc::new(CombinedTransformer {
            id: None,
            input,
            output,
        }))
    }

    fn leaf(&self) -> Option<TransformerOriginal> {
        match self {
            TransformerInput::Single(t) => Some(TransformerOriginal::Single(Arc::clone(t))),
            TransformerInput::Combined(c) => Some(TransformerOriginal::Combined(Arc::clone(c))),
            TransformerInput::List(_) | TransformerInput::Keyed(_) => None,
        }
    }
}

impl fmt::Debug for TransformerInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformerInput::Single(t) => write!(f, "Single({:?})", t.id()),
            TransformerInput::Combined(c) => write!(f, "Combined({:?})", c.id),
            TransformerInput::List(items) => f.debug_list().entries(items).finish(),
            TransformerInput::Keyed(pairs) => f
                .debug_map()
                .entries(pairs.iter().map(|(k, v)| (k, v)))
                .finish(),
        }
    }
}

/// The leaf a resolved transformer came from
#[derive(Clone)]
pub enum TransformerOriginal {
    Single(Arc<dyn DataTransformer>),
    Combined(Arc<CombinedTransformer>),
}

impl TransformerOriginal {
    /// Whether both refer to the same transformer instance
    pub fn same(&self, other: &TransformerOriginal) -> bool {
        match (self, other) {
            (TransformerOriginal::Single(a), TransformerOriginal::Single(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (TransformerOriginal::Combined(a), TransformerOriginal::Combined(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }

    /// Whether this is the leaf `input`
    pub fn is(&self, input: &TransformerInput) -> bool {
        input.leaf().is_some_and(|leaf| self.same(&leaf))
    }
}

/// A registry entry with its wire id
#[derive(Clone)]
pub struct ResolvedTransformer {
    pub id: String,
    pub input: Arc<dyn DataTransformer>,
    pub output: Arc<dyn DataTransformer>,
    pub original: TransformerOriginal,
}

impl ResolvedTransformer {
    /// Serialize a request payload
    pub fn serialize(&self, value: &Value) -> Result<Value> {
        self.input.serialize(value)
    }

    /// Deserialize a response payload
    pub fn deserialize(&self, value: &Value) -> Result<Value> {
        self.output.deserialize(value)
    }
}

impl fmt::Debug for ResolvedTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTransformer")
            .field("id", &self.id)
            .finish()
    }
}

fn join(prefix: Option<&str>, segment: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}.{}", prefix, segment),
        None => segment.to_string(),
    }
}

fn walk(input: &TransformerInput, position: Option<&str>, out: &mut Vec<ResolvedTransformer>) {
    let fallback = || position.unwrap_or("0").to_string();
    match input {
        TransformerInput::Single(transformer) => out.push(ResolvedTransformer {
            id: transformer.id().map(str::to_string).unwrap_or_else(fallback),
            input: Arc::clone(transformer),
            output: Arc::clone(transformer),
            original: TransformerOriginal::Single(Arc::clone(transformer)),
        }),
        TransformerInput::Combined(combined) => out.push(ResolvedTransformer {
            id: combined.id.clone().unwrap_or_else(fallback),
            input: Arc::clone(&combined.input),
            output: Arc::clone(&combined.output),
            original: TransformerOriginal::Combined(Arc::clone(combined)),
        }),
        TransformerInput::List(items) => {
            for (index, item) in items.iter().enumerate() {
                walk(item, Some(&join(position, &index.to_string())), out);
            }
        }
        TransformerInput::Keyed(pairs) => {
            for (key, item) in pairs {
                walk(item, Some(&join(position, key)), out);
            }
        }
    }
}

/// Flatten a transformer or registry into entries with stable ids
pub fn resolve_transformers(input: &TransformerInput) -> Vec<ResolvedTransformer> {
    let mut out = Vec::new();
    walk(input, None, &mut out);
    out
}

/// Find `transformer` in `registry` by identity, else resolve it on its own
pub fn match_transformer(
    registry: &[ResolvedTransformer],
    transformer: &TransformerInput,
) -> Option<ResolvedTransformer> {
    registry
        .iter()
        .find(|resolved| resolved.original.is(transformer))
        .cloned()
        .or_else(|| resolve_transformers(transformer).into_iter().next())
}

/// Find a registry entry by wire id
pub fn find_transformer<'a>(
    registry: &'a [ResolvedTransformer],
    id: &str,
) -> Option<&'a ResolvedTransformer> {
    registry.iter().find(|resolved| resolved.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn tagging(tag: &'static str) -> Arc<dyn DataTransformer> {
        Arc::new(FnTransformer::new(
            move |v| Ok(json!({ "tag": tag, "value": v })),
            |v| {
                v.get("value")
                    .cloned()
                    .ok_or_else(|| Error::Transformer("missing value".to_string()))
            },
        ))
    }

    #[test]
    fn test_lone_transformer_gets_zero() {
        let resolved = resolve_transformers(&TransformerInput::single(tagging("a")));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "0");
    }

    #[test]
    fn test_positional_and_own_ids() {
        let named: Arc<dyn DataTransformer> = Arc::new(FnTransformer::identity().with_id("superjson"));
        let registry = TransformerInput::Keyed(vec![
            ("dates".to_string(), TransformerInput::single(tagging("d"))),
            (
                "nested".to_string(),
                TransformerInput::List(vec![
                    TransformerInput::single(tagging("x")),
                    TransformerInput::single(named),
                ]),
            ),
        ]);

        let ids: Vec<String> = resolve_transformers(&registry)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["dates", "nested.0", "superjson"]);
    }

    #[test]
    fn test_match_returns_same_original() {
        let target = TransformerInput::single(tagging("t"));
        let registry = TransformerInput::List(vec![
            TransformerInput::single(tagging("other")),
            target.clone(),
        ]);

        let resolved = resolve_transformers(&registry);
        let matched = match_transformer(&resolved, &target).unwrap();

        assert!(matched.original.is(&target));
        assert_eq!(matched.id, "1");
    }

    #[test]
    fn test_match_falls_back_to_resolution() {
        let unknown = TransformerInput::single(tagging("u"));
        let matched = match_transformer(&[], &unknown).unwrap();

        assert!(matched.original.is(&unknown));
        assert_eq!(matched.id, "0");
    }

    #[test]
    fn test_combined_uses_input_and_output() {
        let combined = TransformerInput::combined(tagging("in"), Arc::new(FnTransformer::identity()));
        let resolved = &resolve_transformers(&combined)[0];

        let wire = resolved.serialize(&json!(1)).unwrap();
        assert_eq!(wire, json!({"tag": "in", "value": 1}));
        assert_eq!(resolved.deserialize(&json!(5)).unwrap(), json!(5));
    }

    #[test]
    fn test_find_by_id() {
        let resolved = resolve_transformers(&TransformerInput::List(vec![
            TransformerInput::single(tagging("a")),
            TransformerInput::single(tagging("b")),
        ]));
        assert!(find_transformer(&resolved, "1").is_some());
        assert!(find_transformer(&resolved, "2").is_none());
    }
}
