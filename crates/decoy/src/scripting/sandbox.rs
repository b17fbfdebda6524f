use super::convert::{js_to_json, json_to_js};
use super::host::{
    completion_callback, create_logger, install_globals, CompletionGuard, TimerGuard,
};
use super::{InjectionFault, ScriptLimits, ScriptRole};
use crate::metrics;
use boa_engine::{js_string, Context, JsObject, JsValue, Source};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn, Span};

/// Response functions declaring at least this many parameters are asynchronous
/// and receive a completion callback as the fourth argument.
const ASYNC_ARITY: usize = 4;

/// Executes injected JavaScript for predicates and responses.
///
/// # Calling conventions
///
/// Predicates: `function (request, logger) { return <truthy>; }`
///
/// Responses, synchronous: `function (request, state, logger) { return {...}; }`
///
/// Responses, asynchronous: `function (request, state, logger, callback) { callback({...}); }`.
/// Only the first value passed to `callback` counts; the return value is ignored.
/// `callback` may be invoked from a `setTimeout` callback: pending timers run in
/// deadline order until the callback fires or no timers remain.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: ScriptLimits,
}

/// Result of a response invocation plus the state bag as the script left it.
/// The state is returned even when the invocation faulted.
#[derive(Debug)]
pub struct ResponseExecution {
    pub result: Result<Value, InjectionFault>,
    pub state: Map<String, Value>,
}

enum Completion {
    Returned(Value),
    Callback(oneshot::Receiver<Value>),
}

struct Finished {
    completion: Result<Completion, InjectionFault>,
    state: Option<Map<String, Value>>,
}

impl Sandbox {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    /// Run an injected predicate and return whatever it returned.
    pub async fn evaluate_predicate(
        &self,
        source: &str,
        request: &Value,
    ) -> Result<Value, InjectionFault> {
        let started = Instant::now();
        let finished = self
            .run(ScriptRole::Predicate, source, request, None)
            .await;
        let result = match finished {
            Ok(finished) => self.settle(finished.completion).await,
            Err(fault) => Err(fault),
        };
        metrics::record_injection(ScriptRole::Predicate, &result, started.elapsed());
        result
    }

    /// Run an injected response function against a copy of the state bag.
    pub async fn run_response(
        &self,
        source: &str,
        request: &Value,
        state: Map<String, Value>,
    ) -> ResponseExecution {
        let started = Instant::now();
        let finished = self
            .run(ScriptRole::Response, source, request, Some(state.clone()))
            .await;
        let (result, state) = match finished {
            Ok(finished) => {
                let updated = finished.state.unwrap_or(state);
                (self.settle(finished.completion).await, updated)
            }
            Err(fault) => (Err(fault), state),
        };
        metrics::record_injection(ScriptRole::Response, &result, started.elapsed());
        ResponseExecution { result, state }
    }

    async fn run(
        &self,
        role: ScriptRole,
        source: &str,
        request: &Value,
        state: Option<Map<String, Value>>,
    ) -> Result<Finished, InjectionFault> {
        let limits = self.limits;
        let source = source.to_string();
        let request = request.clone();
        let span = Span::current();

        let started = Instant::now();
        let handle = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            execute_blocking(limits, started, role, &source, &request, state)
        });

        let joined = match self.limits.timeout {
            Some(limit) => tokio::time::timeout(limit, handle)
                .await
                .map_err(|_| InjectionFault::TimedOut(limit))?,
            None => handle.await,
        };
        joined.map_err(|e| InjectionFault::WorkerCrashed(e.to_string()))
    }

    async fn settle(
        &self,
        completion: Result<Completion, InjectionFault>,
    ) -> Result<Value, InjectionFault> {
        match completion? {
            Completion::Returned(value) => Ok(value),
            Completion::Callback(rx) => {
                // The worker has already finished, so the sender is either
                // resolved or dropped by now.
                rx.await.map_err(|_| InjectionFault::NeverCompleted)
            }
        }
    }
}

fn execute_blocking(
    limits: ScriptLimits,
    started: Instant,
    role: ScriptRole,
    source: &str,
    request: &Value,
    state: Option<Map<String, Value>>,
) -> Finished {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iterations);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion);
    let timers = TimerGuard::new();
    let deadline = limits.timeout.map(|limit| (started + limit, limit));

    let mut state_js = None;
    let completion = invoke(
        &mut context,
        role,
        source,
        request,
        state.as_ref(),
        &mut state_js,
        &Timers { queue: &timers, deadline },
    );
    context.run_jobs();

    let state = match (state, state_js) {
        (Some(original), Some(js)) => match js_to_json(&mut context, &js) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => Some(original),
            Err(e) => {
                warn!(error = %e, "Could not read back imposter state");
                Some(original)
            }
        },
        (original, _) => original,
    };

    Finished { completion, state }
}

struct Timers<'a> {
    queue: &'a TimerGuard,
    deadline: Option<(Instant, Duration)>,
}

fn invoke(
    context: &mut Context,
    role: ScriptRole,
    source: &str,
    request: &Value,
    state: Option<&Map<String, Value>>,
    state_js: &mut Option<JsValue>,
    timers: &Timers<'_>,
) -> Result<Completion, InjectionFault> {
    install_globals(context).map_err(|e| InjectionFault::Host(e.to_string()))?;
    let function = compile(context, source)?;

    let request_js =
        json_to_js(context, request).map_err(|e| InjectionFault::Host(e.to_string()))?;
    let logger = create_logger(context).map_err(|e| InjectionFault::Host(e.to_string()))?;

    if role == ScriptRole::Predicate {
        let returned = function
            .call(&JsValue::undefined(), &[request_js, logger], context)
            .map_err(|e| InjectionFault::Thrown(e.to_string()))?;
        let value =
            js_to_json(context, &returned).map_err(|e| InjectionFault::Thrown(e.to_string()))?;
        return Ok(Completion::Returned(value));
    }

    let state_value = Value::Object(state.cloned().unwrap_or_default());
    let state_obj =
        json_to_js(context, &state_value).map_err(|e| InjectionFault::Host(e.to_string()))?;
    *state_js = Some(state_obj.clone());

    if arity(context, &function) >= ASYNC_ARITY {
        let (tx, rx) = oneshot::channel();
        let guard = CompletionGuard::arm(tx);
        let callback = completion_callback(context);
        let called = function.call(
            &JsValue::undefined(),
            &[request_js, state_obj, logger, callback],
            context,
        );
        match called {
            Err(e) if !guard.fired() => return Err(InjectionFault::Thrown(e.to_string())),
            Err(e) => warn!(error = %e, "Injected function threw after invoking its callback"),
            Ok(_) => {}
        }
        context.run_jobs();
        run_timers(context, &guard, timers)?;
        if !guard.fired() {
            debug!("Injected function finished without invoking its callback");
        }
        drop(guard);
        return Ok(Completion::Callback(rx));
    }

    let returned = function
        .call(&JsValue::undefined(), &[request_js, state_obj, logger], context)
        .map_err(|e| InjectionFault::Thrown(e.to_string()))?;
    let value =
        js_to_json(context, &returned).map_err(|e| InjectionFault::Thrown(e.to_string()))?;
    Ok(Completion::Returned(value))
}

/// Fire pending timers in deadline order until the completion callback has
/// been invoked or the queue is empty.
fn run_timers(
    context: &mut Context,
    guard: &CompletionGuard,
    timers: &Timers<'_>,
) -> Result<(), InjectionFault> {
    while !guard.fired() {
        let Some(timer) = timers.queue.next_due() else {
            return Ok(());
        };
        if let Some((deadline, limit)) = timers.deadline {
            if timer.deadline > deadline {
                return Err(InjectionFault::TimedOut(limit));
            }
        }
        let wait = timer.deadline.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        match timer
            .callback
            .call(&JsValue::undefined(), &timer.args, context)
        {
            Err(e) if !guard.fired() => return Err(InjectionFault::Thrown(e.to_string())),
            Err(e) => warn!(error = %e, "Timer callback threw after completion"),
            Ok(_) => {}
        }
        context.run_jobs();
    }
    Ok(())
}

/// Evaluate the source as a parenthesized expression so both declarations
/// and arrow functions yield a callable.
fn compile(context: &mut Context, source: &str) -> Result<JsObject, InjectionFault> {
    let trimmed = source.trim().trim_end_matches(';');
    let wrapped = format!("(\n{trimmed}\n)");
    let value = context
        .eval(Source::from_bytes(wrapped.as_bytes()))
        .map_err(|e| InjectionFault::Compile(e.to_string()))?;

    match value.as_object() {
        Some(obj) if obj.is_callable() => Ok(obj.clone()),
        _ => Err(InjectionFault::NotCallable(type_name(&value).to_string())),
    }
}

fn type_name(value: &JsValue) -> &'static str {
    if value.is_undefined() {
        "undefined"
    } else if value.is_null() {
        "null"
    } else if value.is_boolean() {
        "boolean"
    } else if value.is_number() {
        "number"
    } else if value.is_string() {
        "string"
    } else {
        "object"
    }
}

fn arity(context: &mut Context, function: &JsObject) -> usize {
    function
        .get(js_string!("length"), context)
        .ok()
        .and_then(|len| len.as_number())
        .map(|n| n as usize)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn request() -> Value {
        json!({"method": "GET", "path": "/test", "query": {"key": "value"}, "headers": {}, "body": ""})
    }

    #[tokio::test]
    async fn test_predicate_returns_value() {
        let sandbox = Sandbox::default();
        let result = sandbox
            .evaluate_predicate("function (request) { return request.path === '/test'; }", &request())
            .await;
        assert_eq!(result, Ok(json!(true)));
    }

    #[tokio::test]
    async fn test_arrow_function_and_trailing_semicolon() {
        let sandbox = Sandbox::default();
        let result = sandbox
            .evaluate_predicate("(request) => request.query.key;", &request())
            .await;
        assert_eq!(result, Ok(json!("value")));
    }

    #[tokio::test]
    async fn test_non_function_source_is_fault() {
        let sandbox = Sandbox::default();
        let result = sandbox.evaluate_predicate("return true;", &request()).await;
        assert!(matches!(result, Err(InjectionFault::Compile(_))));

        let result = sandbox.evaluate_predicate("42", &request()).await;
        assert!(matches!(result, Err(InjectionFault::NotCallable(t)) if t == "number"));
    }

    #[tokio::test]
    async fn test_throwing_predicate_is_fault() {
        let sandbox = Sandbox::default();
        let result = sandbox
            .evaluate_predicate("function () { throw new Error('boom'); }", &request())
            .await;
        assert!(matches!(result, Err(InjectionFault::Thrown(msg)) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_sync_response_and_state_mutation() {
        let sandbox = Sandbox::default();
        let source = "function (request, state) {
            state.calls = (state.calls || 0) + 1;
            return { body: String(state.calls) };
        }";
        let first = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(first.result, Ok(json!({"body": "1"})));
        assert_eq!(first.state.get("calls"), Some(&json!(1)));

        let second = sandbox.run_response(source, &request(), first.state).await;
        assert_eq!(second.result, Ok(json!({"body": "2"})));
    }

    #[tokio::test]
    async fn test_state_survives_fault() {
        let sandbox = Sandbox::default();
        let source = "function (request, state) { state.touched = true; throw 'late'; }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert!(execution.result.is_err());
        assert_eq!(execution.state.get("touched"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_async_response_uses_callback_value() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) {
            callback({ statusCode: 202, body: 'async' });
            return { statusCode: 500 };
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Ok(json!({"statusCode": 202, "body": "async"})));
    }

    #[tokio::test]
    async fn test_async_first_callback_wins() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) {
            callback({ body: 'first' });
            callback({ body: 'second' });
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Ok(json!({"body": "first"})));
    }

    #[tokio::test]
    async fn test_async_callback_from_promise_job() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) {
            Promise.resolve('later').then(function (v) { callback({ body: v }); });
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Ok(json!({"body": "later"})));
    }

    #[tokio::test]
    async fn test_async_throw_after_callback_keeps_value() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) {
            callback({ body: 'done' });
            throw new Error('ignored');
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Ok(json!({"body": "done"})));
    }

    #[tokio::test]
    async fn test_async_without_callback_never_completes() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) { return { body: 'x' }; }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Err(InjectionFault::NeverCompleted));
    }

    #[tokio::test]
    async fn test_callback_slot_does_not_leak_between_invocations() {
        let sandbox = Sandbox::new(ScriptLimits::default());
        for _ in 0..4 {
            let pending = "function (request, state, logger, callback) {}";
            let execution = sandbox.run_response(pending, &request(), Map::new()).await;
            assert_eq!(execution.result, Err(InjectionFault::NeverCompleted));
        }
    }

    #[tokio::test]
    async fn test_process_env_is_visible() {
        let sandbox = Sandbox::default();
        let source = "function () { return { body: typeof process.env === 'object' ? 'yes' : 'no' }; }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Ok(json!({"body": "yes"})));
    }

    #[tokio::test]
    async fn test_logger_calls_do_not_fault() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger) {
            logger.info('path', request.path);
            logger.warn({ a: 1 });
            console.log('console works too');
            return {};
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Ok(json!({})));
    }

    #[tokio::test]
    async fn test_runaway_loop_is_stopped() {
        let sandbox = Sandbox::new(ScriptLimits {
            loop_iterations: 10_000,
            ..ScriptLimits::default()
        });
        let result = sandbox
            .evaluate_predicate("function () { while (true) {} }", &request())
            .await;
        assert!(matches!(result, Err(InjectionFault::Thrown(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let sandbox = Sandbox::new(ScriptLimits {
            loop_iterations: 2_000_000,
            recursion: 400,
            timeout: Some(Duration::from_millis(5)),
        });
        let result = sandbox
            .evaluate_predicate("function () { for (var i = 0; i < 1e12; i++) {} }", &request())
            .await;
        assert_eq!(result, Err(InjectionFault::TimedOut(Duration::from_millis(5))));
    }

    #[tokio::test]
    async fn test_callback_from_timer_after_delay() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) {
            state.scheduled = true;
            setTimeout(function (body) { callback({ body: body }); }, 30, 'timed');
        }";
        let started = Instant::now();
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Ok(json!({"body": "timed"})));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(execution.state.get("scheduled"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_timers_fire_in_deadline_order() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) {
            setTimeout(function () { callback({ body: 'slow' }); }, 40);
            setTimeout(function () { callback({ body: 'fast' }); }, 5);
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Ok(json!({"body": "fast"})));
    }

    #[tokio::test]
    async fn test_cleared_timer_never_completes() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) {
            var id = setTimeout(function () { callback({ body: 'x' }); }, 5);
            clearTimeout(id);
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(execution.result, Err(InjectionFault::NeverCompleted));
    }

    #[tokio::test]
    async fn test_throwing_timer_is_fault() {
        let sandbox = Sandbox::default();
        let source = "function (request, state, logger, callback) {
            setTimeout(function () { throw new Error('tick'); }, 1);
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert!(matches!(execution.result, Err(InjectionFault::Thrown(msg)) if msg.contains("tick")));
    }

    #[tokio::test]
    async fn test_timer_past_timeout_is_reported() {
        let sandbox = Sandbox::new(ScriptLimits {
            timeout: Some(Duration::from_millis(50)),
            ..ScriptLimits::default()
        });
        let source = "function (request, state, logger, callback) {
            setTimeout(function () { callback({}); }, 10000);
        }";
        let started = Instant::now();
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert_eq!(
            execution.result,
            Err(InjectionFault::TimedOut(Duration::from_millis(50)))
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_huge_sparse_array_is_fault() {
        let sandbox = Sandbox::default();
        let source = "function (request, state) {
            var a = [];
            a.length = 4294967295;
            return { body: a };
        }";
        let execution = sandbox.run_response(source, &request(), Map::new()).await;
        assert!(matches!(execution.result, Err(InjectionFault::Thrown(_))));
    }
}
