//! Predicate parsing and matching.
//!
//! Supports: equals, deepEquals, contains, startsWith, endsWith, matches, exists, not, or, and,
//! plus injected JavaScript predicates.
//!
//! Built-in operators compare against the JSON view of the request
//! ([`crate::model::Request::to_script_value`]). Object-valued expectations
//! descend into sub-objects (query, headers, form, JSON bodies); scalars
//! compare as strings.

use crate::imposter::types::{ImposterError, Operator, Predicate, PredicateOptions};
use crate::scripting::{is_truthy, Sandbox};
use futures::future::BoxFuture;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::borrow::Cow;
use tracing::{debug, warn};

const LOGICAL_KEYS: [&str; 3] = ["not", "or", "and"];

fn invalid(message: impl Into<String>) -> ImposterError {
    ImposterError::InvalidDefinition(message.into())
}

// ============================================================================
// Parsing
// ============================================================================

/// Compile the predicates of one stub.
pub fn parse_predicates(values: &[Value]) -> Result<Vec<Predicate>, ImposterError> {
    values.iter().map(parse_predicate).collect()
}

/// Compile a single predicate entry.
///
/// `inject` wins over any operator keys in the same entry. Injected source is
/// stored untouched; only its type (string) is checked.
pub fn parse_predicate(value: &Value) -> Result<Predicate, ImposterError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("each predicate must be an object"))?;

    for selector in ["jsonpath", "xpath"] {
        if obj.contains_key(selector) {
            return Err(invalid(format!("{selector} selectors are not supported")));
        }
    }

    let operators: Vec<&str> = Operator::ALL
        .iter()
        .map(Operator::key)
        .chain(LOGICAL_KEYS)
        .filter(|key| obj.contains_key(*key))
        .collect();

    if let Some(source) = obj.get("inject") {
        let source = source
            .as_str()
            .ok_or_else(|| invalid("inject must be a string of JavaScript"))?;
        if !operators.is_empty() {
            warn!(
                operators = ?operators,
                "Predicate has both inject and operator keys; using inject"
            );
        }
        return Ok(Predicate::Inject(source.to_string()));
    }

    let key = match operators.as_slice() {
        [key] => *key,
        [] => return Err(invalid("predicate has no recognised operator")),
        many => {
            return Err(invalid(format!(
                "predicate has more than one operator: {}",
                many.join(", ")
            )))
        }
    };
    let body = &obj[key];

    match key {
        "not" => Ok(Predicate::Not(Box::new(parse_predicate(body)?))),
        "or" | "and" => {
            let children = body
                .as_array()
                .ok_or_else(|| invalid(format!("{key} expects an array of predicates")))?
                .iter()
                .map(parse_predicate)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if key == "or" {
                Predicate::Or(children)
            } else {
                Predicate::And(children)
            })
        }
        _ => {
            let operator = Operator::ALL
                .iter()
                .copied()
                .find(|op| op.key() == key)
                .ok_or_else(|| invalid(format!("unknown operator {key}")))?;
            let fields = body
                .as_object()
                .cloned()
                .ok_or_else(|| invalid(format!("{key} expects an object of request fields")))?;
            let options = parse_options(obj)?;
            if operator == Operator::Matches {
                validate_patterns(&fields, options.case_sensitive)?;
            }
            Ok(Predicate::Operator {
                operator,
                fields,
                options,
            })
        }
    }
}

fn parse_options(obj: &Map<String, Value>) -> Result<PredicateOptions, ImposterError> {
    let case_sensitive = match obj.get("caseSensitive") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(invalid("caseSensitive must be a boolean")),
    };

    let except = match obj.get("except") {
        None | Some(Value::Null) => None,
        Some(Value::String(pattern)) if pattern.is_empty() => None,
        Some(Value::String(pattern)) => Some(
            build_regex(pattern, case_sensitive)
                .map_err(|e| invalid(format!("invalid except pattern: {e}")))?,
        ),
        Some(_) => return Err(invalid("except must be a string")),
    };

    Ok(PredicateOptions {
        case_sensitive,
        except,
    })
}

fn validate_patterns(fields: &Map<String, Value>, case_sensitive: bool) -> Result<(), ImposterError> {
    for value in fields.values() {
        match value {
            Value::String(pattern) => {
                build_regex(pattern, case_sensitive)
                    .map_err(|e| invalid(format!("invalid matches pattern: {e}")))?;
            }
            Value::Object(nested) => validate_patterns(nested, case_sensitive)?,
            _ => {}
        }
    }
    Ok(())
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
}

// ============================================================================
// Matching
// ============================================================================

/// Check whether every predicate matches. An empty list matches everything.
/// Evaluation stops at the first predicate that fails.
pub async fn stub_matches(predicates: &[Predicate], request: &Value, sandbox: &Sandbox) -> bool {
    for predicate in predicates {
        if !predicate_matches(predicate, request, sandbox).await {
            return false;
        }
    }
    true
}

/// Evaluate a single predicate. Injected predicates that fault count as a non-match.
pub fn predicate_matches<'a>(
    predicate: &'a Predicate,
    request: &'a Value,
    sandbox: &'a Sandbox,
) -> BoxFuture<'a, bool> {
    Box::pin(async move {
        match predicate {
            Predicate::Operator {
                operator,
                fields,
                options,
            } => operator_matches(*operator, fields, request, options),
            Predicate::Not(inner) => !predicate_matches(inner, request, sandbox).await,
            Predicate::Or(children) => {
                for child in children {
                    if predicate_matches(child, request, sandbox).await {
                        return true;
                    }
                }
                false
            }
            Predicate::And(children) => stub_matches(children, request, sandbox).await,
            Predicate::Inject(source) => match sandbox.evaluate_predicate(source, request).await {
                Ok(value) => {
                    debug!(result = %value, "Injected predicate returned");
                    is_truthy(&value)
                }
                Err(fault) => {
                    warn!(error = %fault, "Injected predicate failed, treating as no match");
                    false
                }
            },
        }
    })
}

/// Evaluate a built-in operator against the request's JSON view.
pub fn operator_matches(
    operator: Operator,
    fields: &Map<String, Value>,
    request: &Value,
    options: &PredicateOptions,
) -> bool {
    let Some(actual) = request.as_object() else {
        return false;
    };
    fields.iter().all(|(field, expected)| {
        let actual_value = lookup(actual, field, options.case_sensitive);
        matches_value(operator, expected, actual_value, options)
    })
}

fn lookup<'a>(map: &'a Map<String, Value>, key: &str, case_sensitive: bool) -> Option<&'a Value> {
    if case_sensitive {
        return map.get(key);
    }
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Strings holding JSON are treated as the structure they encode when the
/// expectation is structured.
fn as_object(value: &Value) -> Option<Cow<'_, Map<String, Value>>> {
    match value {
        Value::Object(map) => Some(Cow::Borrowed(map)),
        Value::String(s) => match serde_json::from_str(s) {
            Ok(Value::Object(map)) => Some(Cow::Owned(map)),
            _ => None,
        },
        _ => None,
    }
}

fn as_array(value: &Value) -> Option<Cow<'_, [Value]>> {
    match value {
        Value::Array(items) => Some(Cow::Borrowed(items.as_slice())),
        Value::String(s) => match serde_json::from_str(s) {
            Ok(Value::Array(items)) => Some(Cow::Owned(items)),
            _ => None,
        },
        _ => None,
    }
}

fn matches_value(
    operator: Operator,
    expected: &Value,
    actual: Option<&Value>,
    options: &PredicateOptions,
) -> bool {
    if operator == Operator::Exists {
        return exists_matches(expected, actual, options);
    }
    let Some(actual) = actual else {
        return false;
    };

    match expected {
        Value::Object(expected_fields) => {
            let Some(actual_fields) = as_object(actual) else {
                return false;
            };
            if operator == Operator::DeepEquals && actual_fields.len() != expected_fields.len() {
                return false;
            }
            expected_fields.iter().all(|(key, value)| {
                let nested = lookup(&actual_fields, key, options.case_sensitive);
                matches_value(operator, value, nested, options)
            })
        }
        Value::Array(expected_items) => {
            let Some(actual_items) = as_array(actual) else {
                return false;
            };
            if operator == Operator::DeepEquals && actual_items.len() != expected_items.len() {
                return false;
            }
            expected_items.iter().all(|item| {
                actual_items
                    .iter()
                    .any(|candidate| matches_value(operator, item, Some(candidate), options))
            })
        }
        _ => match actual {
            Value::Array(items) if operator != Operator::DeepEquals => items
                .iter()
                .any(|item| matches_value(operator, expected, Some(item), options)),
            _ => compare_text(operator, &text_of(expected), &text_of(actual), options),
        },
    }
}

fn text_of(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}

fn compare_text(operator: Operator, expected: &str, actual: &str, options: &PredicateOptions) -> bool {
    let actual = match &options.except {
        Some(except) => except.replace_all(actual, ""),
        None => Cow::Borrowed(actual),
    };

    if operator == Operator::Matches {
        return build_regex(expected, options.case_sensitive)
            .map(|re| re.is_match(&actual))
            .unwrap_or(false);
    }

    let (expected, actual) = if options.case_sensitive {
        (Cow::Borrowed(expected), actual)
    } else {
        (
            Cow::Owned(expected.to_lowercase()),
            Cow::Owned(actual.to_lowercase()),
        )
    };

    match operator {
        Operator::Equals | Operator::DeepEquals => actual == expected,
        Operator::Contains => actual.contains(expected.as_ref()),
        Operator::StartsWith => actual.starts_with(expected.as_ref()),
        Operator::EndsWith => actual.ends_with(expected.as_ref()),
        Operator::Matches | Operator::Exists => false,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn exists_matches(expected: &Value, actual: Option<&Value>, options: &PredicateOptions) -> bool {
    match expected {
        Value::Bool(should_exist) => {
            let present = actual.is_some_and(|v| !is_empty_value(v));
            present == *should_exist
        }
        Value::Object(expected_fields) => {
            let actual_fields = actual.and_then(as_object);
            expected_fields.iter().all(|(key, value)| {
                let nested = actual_fields
                    .as_deref()
                    .and_then(|fields| lookup(fields, key, options.case_sensitive));
                exists_matches(value, nested, options)
            })
        }
        _ => false,
    }
}
