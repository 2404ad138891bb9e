//! Kubeconfig post-processing: placeholder rewrite and document merge.
//!
//! Pure functions only, no I/O.

use std::sync::LazyLock;

use regex::bytes::{Captures, Regex};
use serde_yaml::{Mapping, Value};

use crate::domain::error::ProvisionError;

/// Context name k3s writes into its generated kubeconfig.
pub const DEFAULT_CONTEXT: &str = "default";

/// Top-level kubeconfig lists whose entries are keyed by `name`.
pub const NAMED_LISTS: &[&str] = &["clusters", "contexts", "users"];

// Alternation order matters only for overlapping tokens; these three never
// share a prefix, so a single leftmost scan is order-independent.
static PLACEHOLDERS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // literal pattern
    Regex::new(r"127\.0\.0\.1|localhost|default").expect("placeholder pattern is valid")
});

/// Rewrites the loopback address, `localhost` and the `default` context name.
///
/// Every `127.0.0.1` and `localhost` becomes `target_address`, and every
/// `default` becomes `context` (or stays `default` when `context` is empty).
/// The scan is a single left-to-right pass: substituted text is never
/// rescanned, and all other bytes are preserved.
#[must_use]
pub fn rewrite(document: &[u8], target_address: &str, context: &str) -> Vec<u8> {
    let context = if context.is_empty() {
        DEFAULT_CONTEXT
    } else {
        context
    };
    PLACEHOLDERS
        .replace_all(document, |caps: &Captures<'_>| -> Vec<u8> {
            if &caps[0] == b"default" {
                context.as_bytes().to_vec()
            } else {
                target_address.as_bytes().to_vec()
            }
        })
        .into_owned()
}

/// Merges `incoming` over `existing`.
///
/// - mappings are unioned recursively
/// - `clusters`, `contexts` and `users` are concatenated and deduplicated by
///   `name`; an entry keeps its first position and takes the later value
/// - any other key present in both takes the value from `incoming`
///
/// An empty `existing` document yields `incoming` unchanged in content.
///
/// # Errors
///
/// Returns `ProvisionError::ConfigDocument` if either input is not a YAML
/// mapping, or if the result cannot be serialized.
pub fn merge_documents(existing: &[u8], incoming: &[u8]) -> Result<Vec<u8>, ProvisionError> {
    let base = parse_document(existing, "existing kubeconfig")?;
    let overlay = parse_document(incoming, "new kubeconfig")?;
    let merged = merge_mappings(base, overlay);
    serde_yaml::to_string(&Value::Mapping(merged))
        .map(String::into_bytes)
        .map_err(|e| ProvisionError::ConfigDocument {
            origin: "merged kubeconfig".to_string(),
            reason: e.to_string(),
        })
}

fn parse_document(bytes: &[u8], origin: &str) -> Result<Mapping, ProvisionError> {
    let invalid = |reason: String| ProvisionError::ConfigDocument {
        origin: origin.to_string(),
        reason,
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_slice::<Value>(bytes).map_err(|e| invalid(e.to_string()))? {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(Mapping::new()),
        other => Err(invalid(format!(
            "expected a mapping at the top level, found {}",
            kind_of(&other)
        ))),
    }
}

fn merge_mappings(mut base: Mapping, overlay: Mapping) -> Mapping {
    for (key, incoming) in overlay {
        let named = key.as_str().is_some_and(|k| NAMED_LISTS.contains(&k));
        match base.get_mut(&key) {
            Some(slot) => {
                let current = std::mem::take(slot);
                *slot = merge_values(current, incoming, named);
            }
            None => {
                base.insert(key, incoming);
            }
        }
    }
    base
}

fn merge_values(current: Value, incoming: Value, named: bool) -> Value {
    match (current, incoming) {
        (Value::Mapping(a), Value::Mapping(b)) => Value::Mapping(merge_mappings(a, b)),
        (Value::Sequence(a), Value::Sequence(b)) if named => Value::Sequence(merge_named(a, b)),
        (_, incoming) => incoming,
    }
}

fn merge_named(existing: Vec<Value>, incoming: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(existing.len() + incoming.len());
    for entry in existing.into_iter().chain(incoming) {
        let slot = entry_name(&entry).and_then(|name| {
            out.iter()
                .position(|seen| entry_name(seen).is_some_and(|n| n == name))
        });
        match slot {
            Some(i) => out[i] = entry,
            None => out.push(entry),
        }
    }
    out
}

fn entry_name(entry: &Value) -> Option<&str> {
    entry.get("name").and_then(Value::as_str)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
