//! Response building: literal responses, injected responses and the merge of
//! partial responses over defaults.

use crate::imposter::types::{ImposterError, ResponseSpec};
use crate::model::{BodyMode, Protocol, Response};
use crate::scripting::{InjectionFault, Sandbox};
use serde_json::{Map, Value};
use tracing::warn;

/// Header set on the generic error response produced for a faulting injection.
pub const INJECT_ERROR_HEADER: &str = "x-decoy-inject-error";

/// Payload written to TCP clients when an injected response faults.
pub const TCP_FAULT_PAYLOAD: &str = "injection error\n";

fn invalid(message: impl Into<String>) -> ImposterError {
    ImposterError::InvalidDefinition(message.into())
}

/// Compile the responses of one stub. An empty list behaves as a single
/// literal response carrying only the defaults.
pub fn parse_responses(
    values: &[Value],
    defaults: &Response,
    protocol: Protocol,
) -> Result<Vec<ResponseSpec>, ImposterError> {
    if values.is_empty() {
        return Ok(vec![ResponseSpec::Is(defaults.clone())]);
    }
    values
        .iter()
        .map(|value| parse_response(value, defaults, protocol))
        .collect()
}

/// Compile a single response entry. Injected source is stored untouched.
pub fn parse_response(
    value: &Value,
    defaults: &Response,
    protocol: Protocol,
) -> Result<ResponseSpec, ImposterError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("each response must be an object"))?;

    for unsupported in ["proxy", "fault"] {
        if obj.contains_key(unsupported) {
            return Err(invalid(format!("{unsupported} responses are not supported")));
        }
    }
    for ignored in ["_behaviors", "behaviors", "repeat"] {
        if obj.contains_key(ignored) {
            warn!(field = ignored, "Ignoring unsupported response field");
        }
    }

    match (obj.get("is"), obj.get("inject")) {
        (Some(_), Some(_)) => Err(invalid(
            "a response may have either is or inject, not both",
        )),
        (None, Some(Value::String(source))) => Ok(ResponseSpec::Inject(source.clone())),
        (None, Some(_)) => Err(invalid("inject must be a string of JavaScript")),
        (Some(Value::Object(partial)), None) => merge_partial(defaults, partial, protocol)
            .map(ResponseSpec::Is)
            .map_err(invalid),
        (Some(_), None) => Err(invalid("is must be an object")),
        (None, None) if obj.keys().all(|k| k.starts_with('_') || k == "behaviors" || k == "repeat") => {
            Ok(ResponseSpec::Is(defaults.clone()))
        }
        (None, None) => Err(invalid("unrecognised response type")),
    }
}

/// Merge a partial response over `defaults`.
///
/// Provided headers replace the default headers; HTTP responses always end
/// up with a `connection` header (`close` unless given).
pub fn merge_partial(
    defaults: &Response,
    partial: &Map<String, Value>,
    protocol: Protocol,
) -> Result<Response, String> {
    let mut response = defaults.clone();

    if let Some(mode) = partial.get("_mode") {
        response.mode = serde_json::from_value::<BodyMode>(mode.clone())
            .map_err(|_| format!("_mode must be text or binary, got {mode}"))?;
    }

    if !protocol.is_http() {
        if let Some(data) = partial.get("data") {
            response.body = body_text(data);
        }
        return Ok(response);
    }

    if let Some(status) = partial.get("statusCode") {
        if !status.is_null() {
            response.status_code = parse_status(status)?;
        }
    }

    if let Some(headers) = partial.get("headers") {
        match headers {
            Value::Null => {}
            Value::Object(map) => {
                response.headers = map
                    .iter()
                    .map(|(k, v)| (k.clone(), header_text(v)))
                    .collect();
            }
            other => return Err(format!("headers must be an object, got {other}")),
        }
    }

    if let Some(body) = partial.get("body") {
        if !body.is_null() {
            response.body = body_text(body);
        }
    }

    if response.header("connection").is_none() {
        response
            .headers
            .insert("connection".to_string(), "close".to_string());
    }

    Ok(response)
}

fn parse_status(value: &Value) -> Result<u16, String> {
    let code = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match code {
        Some(code @ 100..=999) => Ok(code as u16),
        _ => Err(format!("statusCode must be a number between 100 and 999, got {value}")),
    }
}

fn body_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn header_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(body_text).collect::<Vec<_>>().join(", "),
        other => body_text(other),
    }
}

/// Produce the response for one resolved spec.
///
/// Injected responses see a copy of `state` and write their changes back to it
/// whether or not they fault.
pub async fn resolve(
    spec: &ResponseSpec,
    request: &Value,
    state: &mut Map<String, Value>,
    sandbox: &Sandbox,
    defaults: &Response,
    protocol: Protocol,
) -> Result<Response, InjectionFault> {
    match spec {
        ResponseSpec::Is(response) => Ok(response.clone()),
        ResponseSpec::Inject(source) => {
            let execution = sandbox
                .run_response(source, request, std::mem::take(state))
                .await;
            *state = execution.state;
            match execution.result? {
                Value::Object(partial) => merge_partial(defaults, &partial, protocol)
                    .map_err(InjectionFault::InvalidResponse),
                Value::Null => Ok(defaults.clone()),
                other => Err(InjectionFault::InvalidResponse(format!(
                    "expected an object, got {other}"
                ))),
            }
        }
    }
}

/// Generic error returned in place of a faulting injected response. Details
/// go to the log, not to the client.
pub fn fault_response(protocol: Protocol) -> Response {
    let mut response = Response::defaults_for(protocol);
    if protocol.is_http() {
        response.status_code = 500;
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
            .headers
            .insert(INJECT_ERROR_HEADER.to_string(), "true".to_string());
        response.body = serde_json::json!({
            "errors": [{
                "code": "injection error",
                "message": "the injected response function failed; see the server log"
            }]
        })
        .to_string();
    } else {
        response.mode = BodyMode::Text;
        response.body = TCP_FAULT_PAYLOAD.to_string();
    }
    response
}
