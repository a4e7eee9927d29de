//! Template resolution module
//!
//! Dataflow between nodes is expressed as `{{path.to.value}}` expressions
//! embedded in node input mappings. The resolver substitutes them against a
//! context keyed by node id (plus the reserved `input` key). Unresolvable
//! tokens are left verbatim so the caller can decide whether that is an
//! error.

use serde_json::{Map, Value};

/// Resolve all template expressions in `value` against `ctx`.
///
/// Strings that are exactly one `{{…}}` token preserve the native type of
/// the resolved value; tokens embedded in surrounding text are stringified
/// and spliced in. Maps and sequences are walked recursively and returned
/// with the same structure. Input must be tree shaped.
pub fn resolve(value: &Value, ctx: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => resolve_str(s, ctx),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, ctx)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        other => other.clone(),
    }
}

/// Resolve template expressions within a single string.
pub fn resolve_str(s: &str, ctx: &Map<String, Value>) -> Value {
    // Whole-string template: preserve the native type of the target.
    if let Some(inner) = whole_token(s) {
        return match lookup(inner, ctx) {
            Some(found) => found.clone(),
            None => Value::String(s.to_string()),
        };
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };
        let inner = &rest[start + 2..start + 2 + end];
        out.push_str(&rest[..start]);
        match lookup(inner, ctx) {
            Some(found) => out.push_str(&stringify(found)),
            // Unresolved or empty: keep the token verbatim.
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &rest[start + 2 + end + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

/// Collect template tokens that survived resolution.
///
/// Deliberate `{{}}` literals are not reported; everything else that still
/// looks like a token is, so the engine can fail input resolution.
pub fn unresolved_tokens(value: &Value) -> Vec<String> {
    let mut tokens = Vec::new();
    collect_tokens(value, &mut tokens);
    tokens
}

fn collect_tokens(value: &Value, tokens: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("{{") {
                let Some(end) = rest[start + 2..].find("}}") else {
                    break;
                };
                let inner = rest[start + 2..start + 2 + end].trim();
                if !inner.is_empty() {
                    tokens.push(format!("{{{{{inner}}}}}"));
                }
                rest = &rest[start + 2 + end + 2..];
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_tokens(v, tokens);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_tokens(v, tokens);
            }
        }
        _ => {}
    }
}

/// Return the inner path when `s` is exactly one `{{…}}` token.
fn whole_token(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    // A second opener means this is interpolation, not a single token.
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

/// Walk a dotted path through the context. Segments are trimmed; an empty
/// path resolves to nothing (the token stays literal).
fn lookup<'a>(path: &str, ctx: &'a Map<String, Value>) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let mut segments = path.split('.').map(str::trim);
    let first = segments.next()?;
    let mut current = ctx.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object context")
    }

    #[test]
    fn test_non_templated_values_round_trip() {
        let ctx = ctx(json!({ "a": 1 }));
        for value in [
            json!("plain text"),
            json!(42),
            json!(true),
            json!(null),
            json!({ "k": [1, 2, "x"] }),
        ] {
            assert_eq!(resolve(&value, &ctx), value);
        }
    }

    #[test]
    fn test_whole_token_preserves_native_type() {
        let ctx = ctx(json!({
            "a": { "count": 7, "items": ["x", "y"] },
            "input": { "m": "hi" }
        }));
        assert_eq!(resolve(&json!("{{a.count}}"), &ctx), json!(7));
        assert_eq!(resolve(&json!("{{a.items}}"), &ctx), json!(["x", "y"]));
        assert_eq!(resolve(&json!("{{a}}"), &ctx), json!({ "count": 7, "items": ["x", "y"] }));
        assert_eq!(resolve(&json!("{{input.m}}"), &ctx), json!("hi"));
    }

    #[test]
    fn test_interpolation_stringifies() {
        let ctx = ctx(json!({ "p": 7, "name": "ada" }));
        assert_eq!(resolve(&json!("x-{{p}}-y"), &ctx), json!("x-7-y"));
        assert_eq!(resolve(&json!("hello {{name}}!"), &ctx), json!("hello ada!"));
        assert_eq!(
            resolve(&json!("{{p}} and {{name}}"), &ctx),
            json!("7 and ada")
        );
    }

    #[test]
    fn test_missing_segments_leave_token_untouched() {
        let ctx = ctx(json!({ "a": { "b": 1 } }));
        assert_eq!(resolve(&json!("{{a.c}}"), &ctx), json!("{{a.c}}"));
        assert_eq!(resolve(&json!("v={{nope}}"), &ctx), json!("v={{nope}}"));
    }

    #[test]
    fn test_empty_token_is_literal() {
        let ctx = ctx(json!({}));
        assert_eq!(resolve(&json!("{{}}"), &ctx), json!("{{}}"));
        assert_eq!(resolve(&json!("a{{ }}b"), &ctx), json!("a{{ }}b"));
    }

    #[test]
    fn test_whitespace_around_segments_is_trimmed() {
        let ctx = ctx(json!({ "a": { "b": "ok" } }));
        assert_eq!(resolve(&json!("{{ a.b }}"), &ctx), json!("ok"));
        assert_eq!(resolve(&json!("{{ a . b }}"), &ctx), json!("ok"));
    }

    #[test]
    fn test_sequence_index_access() {
        let ctx = ctx(json!({ "a": ["zero", "one"] }));
        assert_eq!(resolve(&json!("{{a.1}}"), &ctx), json!("one"));
        assert_eq!(resolve(&json!("{{a.9}}"), &ctx), json!("{{a.9}}"));
    }

    #[test]
    fn test_structured_inputs_resolve_recursively() {
        let ctx = ctx(json!({ "input": { "m": "hello" }, "a": "upstream" }));
        let inputs = json!({
            "text": "{{a}}",
            "nested": { "greeting": "say {{input.m}}" },
            "list": ["{{a}}", "literal"]
        });
        assert_eq!(
            resolve(&inputs, &ctx),
            json!({
                "text": "upstream",
                "nested": { "greeting": "say hello" },
                "list": ["upstream", "literal"]
            })
        );
    }

    #[test]
    fn test_unresolved_tokens_reported_after_resolution() {
        let ctx = ctx(json!({ "a": 1 }));
        let resolved = resolve(&json!({ "x": "{{missing.path}}", "y": "{{a}}", "z": "{{}}" }), &ctx);
        let tokens = unresolved_tokens(&resolved);
        assert_eq!(tokens, vec!["{{missing.path}}".to_string()]);
    }

    #[test]
    fn test_unterminated_token_left_alone() {
        let ctx = ctx(json!({ "a": 1 }));
        assert_eq!(resolve(&json!("{{a"), &ctx), json!("{{a"));
    }
}
