//! Reference-expression interpreter for layout documents.
//!
//! Layout documents may embed `${name}`, `${name.subkey}`, `${name[0]}` and
//! `${name:default}` references anywhere a string value is legal. Resolution
//! is lazy and type-preserving: a field whose entire value is `"${b}"` where
//! `b == 200` flattens to the integer `200`, not the string `"200"`.
//!
//! Deserialization never resolves references (edit mode); the generator
//! consumes the output of [`flatten`], which resolves everything and strips
//! the `variables` map.

use crate::error::{Error, Result};
use crate::models::LayoutData;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").unwrap())
}

/// One parsed segment of a reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parses `timeouts.values[0]` into key/index segments.
fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
                let mut index = String::new();
                for ic in chars.by_ref() {
                    if ic == ']' {
                        break;
                    }
                    index.push(ic);
                }
                let parsed = index.parse::<usize>().map_err(|_| Error::LayoutInvalid(
                    format!("invalid array index '[{index}]' in variable reference '{path}'"),
                ))?;
                segments.push(PathSegment::Index(parsed));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(PathSegment::Key(current));
    }
    if segments.is_empty() {
        return Err(Error::LayoutInvalid(format!(
            "empty variable reference '{path}'"
        )));
    }
    Ok(segments)
}

/// Resolves references against a document's `variables` map.
pub struct VariableResolver<'a> {
    variables: &'a Map<String, Value>,
}

impl<'a> VariableResolver<'a> {
    #[must_use]
    pub fn new(variables: &'a Map<String, Value>) -> Self {
        Self { variables }
    }

    /// Resolves every reference inside `value`, recursively.
    pub fn resolve_value(&self, value: &Value) -> Result<Value> {
        let mut stack = Vec::new();
        self.resolve_inner(value, &mut stack)
    }

    fn resolve_inner(&self, value: &Value, stack: &mut Vec<String>) -> Result<Value> {
        match value {
            Value::String(s) => self.resolve_string(s, stack),
            Value::Array(items) => {
                let resolved: Result<Vec<Value>> = items
                    .iter()
                    .map(|item| self.resolve_inner(item, stack))
                    .collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_inner(item, stack)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolves a string which may be a whole reference (type-preserving) or
    /// contain embedded references (stringified by natural representation).
    fn resolve_string(&self, s: &str, stack: &mut Vec<String>) -> Result<Value> {
        let re = reference_regex();
        let Some(first) = re.find(s) else {
            return Ok(Value::String(s.to_string()));
        };

        // Whole-string reference: the resolved value keeps its type.
        if first.start() == 0 && first.end() == s.len() {
            let expr = &s[2..s.len() - 1];
            return self.lookup(expr, stack);
        }

        // Embedded references: each must resolve to a scalar.
        let mut out = String::new();
        let mut last_end = 0;
        for caps in re.captures_iter(s) {
            let whole = caps.get(0).unwrap();
            out.push_str(&s[last_end..whole.start()]);
            let resolved = self.lookup(&caps[1], stack)?;
            match resolved {
                Value::String(v) => out.push_str(&v),
                Value::Number(n) => out.push_str(&n.to_string()),
                Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
                Value::Null | Value::Array(_) | Value::Object(_) => {
                    return Err(Error::LayoutInvalid(format!(
                        "variable '{}' resolves to a non-scalar value and cannot be \
                         interpolated into '{s}'",
                        &caps[1]
                    )));
                }
            }
            last_end = whole.end();
        }
        out.push_str(&s[last_end..]);
        Ok(Value::String(out))
    }

    /// Looks up a single `path[:default]` expression.
    fn lookup(&self, expr: &str, stack: &mut Vec<String>) -> Result<Value> {
        let (path, default) = match expr.find(':') {
            Some(pos) => (&expr[..pos], Some(&expr[pos + 1..])),
            None => (expr, None),
        };

        if stack.iter().any(|entry| entry == path) {
            let mut chain = stack.clone();
            chain.push(path.to_string());
            return Err(Error::VariableCycle { chain });
        }

        let segments = parse_path(path)?;
        let PathSegment::Key(root) = &segments[0] else {
            return Err(Error::LayoutInvalid(format!(
                "variable reference '{path}' cannot start with an index"
            )));
        };

        let Some(raw) = self.variables.get(root) else {
            // The default is taken literally, with no further parsing.
            if let Some(default) = default {
                return Ok(Value::String(default.to_string()));
            }
            return Err(Error::UndefinedVariable {
                path: path.to_string(),
            });
        };

        // Navigate the raw value first, resolving only what the path passes
        // through. Resolving the whole root eagerly would make sibling keys
        // that reference each other look like cycles.
        stack.push(path.to_string());
        let mut current = raw.clone();
        for segment in &segments[1..] {
            if matches!(current, Value::String(_)) {
                current = self.resolve_inner(&current, stack).inspect_err(|_| {
                    stack.pop();
                })?;
            }
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(mut map)) => match map.remove(key) {
                    Some(v) => v,
                    None => {
                        stack.pop();
                        if let Some(default) = default {
                            return Ok(Value::String(default.to_string()));
                        }
                        return Err(Error::UndefinedVariable {
                            path: path.to_string(),
                        });
                    }
                },
                (PathSegment::Index(idx), Value::Array(mut items)) => {
                    if *idx < items.len() {
                        items.swap_remove(*idx)
                    } else {
                        stack.pop();
                        if let Some(default) = default {
                            return Ok(Value::String(default.to_string()));
                        }
                        return Err(Error::UndefinedVariable {
                            path: path.to_string(),
                        });
                    }
                }
                _ => {
                    stack.pop();
                    if let Some(default) = default {
                        return Ok(Value::String(default.to_string()));
                    }
                    return Err(Error::UndefinedVariable {
                        path: path.to_string(),
                    });
                }
            };
        }

        let resolved = self.resolve_inner(&current, stack);
        stack.pop();
        resolved
    }
}

/// Resolves every `${...}` reference in the document and strips `variables`.
///
/// The result is the shape the DTSI generator always consumes.
pub fn flatten(layout: &LayoutData) -> Result<LayoutData> {
    let mut doc = serde_json::to_value(layout)
        .map_err(|e| Error::LayoutInvalid(format!("layout serialization failed: {e}")))?;

    let resolver = VariableResolver::new(&layout.variables);
    let Value::Object(map) = &mut doc else {
        return Err(Error::LayoutInvalid("layout is not an object".to_string()));
    };

    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        if key == "variables" {
            continue;
        }
        let resolved = resolver.resolve_value(&map[&key])?;
        map.insert(key, resolved);
    }
    map.remove("variables");

    let flattened: LayoutData = serde_json::from_value(doc)
        .map_err(|e| Error::LayoutInvalid(format!("flattened layout is invalid: {e}")))?;
    flattened.validate()?;
    Ok(flattened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_whole_string_reference_preserves_type() {
        let vars = vars(json!({"t": 200}));
        let resolver = VariableResolver::new(&vars);
        let resolved = resolver.resolve_value(&json!("${t}")).unwrap();
        assert_eq!(resolved, json!(200));
    }

    #[test]
    fn test_chain_resolution() {
        let vars = vars(json!({"a": "${b}", "b": 200}));
        let resolver = VariableResolver::new(&vars);
        assert_eq!(resolver.resolve_value(&json!("${a}")).unwrap(), json!(200));
    }

    #[test]
    fn test_interpolation_stringifies() {
        let vars = vars(json!({"t": 200}));
        let resolver = VariableResolver::new(&vars);
        let resolved = resolver.resolve_value(&json!("Timeout: ${t}ms")).unwrap();
        assert_eq!(resolved, json!("Timeout: 200ms"));
    }

    #[test]
    fn test_default_value_is_literal() {
        let vars = vars(json!({}));
        let resolver = VariableResolver::new(&vars);
        assert_eq!(
            resolver.resolve_value(&json!("${x:foo}")).unwrap(),
            json!("foo")
        );
        // Defaults are not parsed further, even if they look like references.
        assert_eq!(
            resolver.resolve_value(&json!("${x:${y}}")).unwrap(),
            json!("${y}")
        );
    }

    #[test]
    fn test_undefined_variable_names_path() {
        let vars = vars(json!({}));
        let resolver = VariableResolver::new(&vars);
        let err = resolver.resolve_value(&json!("${nope}")).unwrap_err();
        match err {
            Error::UndefinedVariable { path } => assert_eq!(path, "nope"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_names_each_node() {
        let vars = vars(json!({"a": "${b}", "b": "${a}"}));
        let resolver = VariableResolver::new(&vars);
        let err = resolver.resolve_value(&json!("${a}")).unwrap_err();
        match err {
            Error::VariableCycle { chain } => {
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_subkey_and_index_access() {
        let vars = vars(json!({"timeouts": {"tap": 150, "seq": [10, 20]}}));
        let resolver = VariableResolver::new(&vars);
        assert_eq!(
            resolver.resolve_value(&json!("${timeouts.tap}")).unwrap(),
            json!(150)
        );
        assert_eq!(
            resolver
                .resolve_value(&json!("${timeouts.seq[1]}"))
                .unwrap(),
            json!(20)
        );
    }

    #[test]
    fn test_non_scalar_interpolation_fails() {
        let vars = vars(json!({"arr": [1, 2]}));
        let resolver = VariableResolver::new(&vars);
        let err = resolver.resolve_value(&json!("${arr}ms")).unwrap_err();
        assert_eq!(err.kind(), "layout_invalid");
        // Whole-string array reference is fine.
        assert_eq!(
            resolver.resolve_value(&json!("${arr}")).unwrap(),
            json!([1, 2])
        );
    }

    #[test]
    fn test_resolution_inside_arrays_and_objects() {
        let vars = vars(json!({"k": "Q"}));
        let resolver = VariableResolver::new(&vars);
        let resolved = resolver
            .resolve_value(&json!({"list": ["${k}", "W"], "nested": {"v": "${k}"}}))
            .unwrap();
        assert_eq!(resolved, json!({"list": ["Q", "W"], "nested": {"v": "Q"}}));
    }

    #[test]
    fn test_flatten_strips_variables_and_resolves() {
        let mut layout = LayoutData::new("test", "Test");
        layout.layer_names = vec!["base".to_string()];
        layout.layers = vec![vec![crate::models::LayoutBinding::with_words("&kp", &["Q"])]];
        layout
            .variables
            .insert("a".to_string(), json!("${b}"));
        layout.variables.insert("b".to_string(), json!(200));
        layout.hold_taps.push(crate::models::HoldTapBehavior {
            name: "hm".to_string(),
            description: None,
            bindings: vec!["&kp".to_string(), "&kp".to_string()],
            tapping_term_ms: Some(crate::models::IntValue::Var("${a}".to_string())),
            quick_tap_ms: None,
            require_prior_idle_ms: None,
            flavor: None,
            hold_trigger_key_positions: Vec::new(),
            hold_trigger_on_release: false,
            retro_tap: false,
        });

        let flattened = flatten(&layout).unwrap();
        assert!(flattened.variables.is_empty());
        assert_eq!(
            flattened.hold_taps[0].tapping_term_ms,
            Some(crate::models::IntValue::Int(200))
        );
    }

    #[test]
    fn test_flatten_fails_on_undefined() {
        let mut layout = LayoutData::new("test", "Test");
        layout.layer_names = vec!["base".to_string()];
        layout.layers = vec![vec![crate::models::LayoutBinding::with_words("&kp", &["Q"])]];
        layout.notes = Some("${missing}".to_string());
        let err = flatten(&layout).unwrap_err();
        assert_eq!(err.kind(), "undefined_variable");
        assert!(err.to_string().contains("missing"));
    }
}
