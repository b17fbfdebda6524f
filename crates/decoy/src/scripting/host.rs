//! Host objects exposed to injected code: `process.env`, the logger, timers,
//! and the completion callback handed to asynchronous response functions.
//!
//! Native functions in Boa are plain function pointers, so per-invocation host
//! state (the completion sender, pending timers) lives in thread-locals that
//! are armed right before the call and cleared by guards afterwards.

use super::convert::{js_to_json, new_object};
use boa_engine::{
    js_string, native_function::NativeFunction, property::PropertyKey, Context, JsNativeError,
    JsObject, JsResult, JsValue,
};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Longest delay `setTimeout` honours.
const MAX_TIMER_DELAY: Duration = Duration::from_secs(60);
const MAX_PENDING_TIMERS: usize = 10_000;

thread_local! {
    static COMPLETION: RefCell<Option<oneshot::Sender<Value>>> = const { RefCell::new(None) };
    static TIMERS: RefCell<Vec<Timer>> = const { RefCell::new(Vec::new()) };
    static NEXT_TIMER_ID: Cell<u32> = const { Cell::new(1) };
}

/// A callback scheduled with `setTimeout`.
pub(crate) struct Timer {
    id: u32,
    pub(crate) deadline: Instant,
    pub(crate) callback: JsObject,
    pub(crate) args: Vec<JsValue>,
}

/// Owns the timer queue for one invocation. Pending timers are discarded on
/// drop, which must happen before the context that created them goes away.
pub(crate) struct TimerGuard(());

impl TimerGuard {
    pub(crate) fn new() -> Self {
        TIMERS.with(|timers| timers.borrow_mut().clear());
        TimerGuard(())
    }

    /// Remove and return the timer due first.
    pub(crate) fn next_due(&self) -> Option<Timer> {
        TIMERS.with(|timers| {
            let mut timers = timers.borrow_mut();
            let index = timers
                .iter()
                .enumerate()
                .min_by_key(|(_, t)| (t.deadline, t.id))
                .map(|(i, _)| i)?;
            Some(timers.remove(index))
        })
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        TIMERS.with(|timers| timers.borrow_mut().clear());
    }
}

fn set_timeout(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let callback = args
        .first()
        .and_then(JsValue::as_object)
        .filter(|f| f.is_callable())
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("setTimeout needs a function"))?;
    let millis = match args.get(1) {
        Some(delay) => delay.to_number(ctx)?,
        None => 0.0,
    };
    let delay = if millis.is_finite() && millis > 0.0 {
        Duration::from_secs_f64(millis / 1000.0).min(MAX_TIMER_DELAY)
    } else {
        Duration::ZERO
    };

    let id = NEXT_TIMER_ID.with(|next| {
        let id = next.get();
        next.set(id.wrapping_add(1));
        id
    });
    TIMERS.with(|timers| {
        let mut timers = timers.borrow_mut();
        if timers.len() >= MAX_PENDING_TIMERS {
            return Err(JsNativeError::range().with_message("too many pending timers"));
        }
        timers.push(Timer {
            id,
            deadline: Instant::now() + delay,
            callback,
            args: args.get(2..).unwrap_or_default().to_vec(),
        });
        Ok(())
    })?;
    Ok(JsValue::from(id))
}

fn clear_timeout(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    if let Some(id) = args.first() {
        let id = id.to_number(ctx)?;
        TIMERS.with(|timers| timers.borrow_mut().retain(|t| f64::from(t.id) != id));
    }
    Ok(JsValue::undefined())
}

/// Holds the completion slot for the duration of one asynchronous invocation.
pub(crate) struct CompletionGuard(());

impl CompletionGuard {
    pub(crate) fn arm(sender: oneshot::Sender<Value>) -> Self {
        COMPLETION.with(|slot| *slot.borrow_mut() = Some(sender));
        CompletionGuard(())
    }

    /// True once the callback has delivered a value.
    pub(crate) fn fired(&self) -> bool {
        COMPLETION.with(|slot| slot.borrow().is_none())
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // Dropping an unused sender is what tells the waiting request the
        // callback never came.
        COMPLETION.with(|slot| slot.borrow_mut().take());
    }
}

fn complete(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let armed = COMPLETION.with(|slot| slot.borrow().is_some());
    if !armed {
        debug!("inject callback invoked more than once, ignoring");
        return Ok(JsValue::undefined());
    }

    let value = match args.first() {
        Some(v) => js_to_json(ctx, v)?,
        None => Value::Null,
    };
    if let Some(sender) = COMPLETION.with(|slot| slot.borrow_mut().take()) {
        let _ = sender.send(value);
    }
    Ok(JsValue::undefined())
}

/// Function object that resolves the current invocation's completion slot.
pub(crate) fn completion_callback(context: &mut Context) -> JsValue {
    NativeFunction::from_fn_ptr(complete)
        .to_js_function(context.realm())
        .into()
}

fn render_args(args: &[JsValue], ctx: &mut Context) -> String {
    args.iter()
        .map(|arg| match arg.as_string() {
            Some(s) => s.to_std_string_escaped(),
            None => match js_to_json(ctx, arg) {
                Ok(Value::Null) | Err(_) => arg.display().to_string(),
                Ok(json) => json.to_string(),
            },
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_debug(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let message = render_args(args, ctx);
    debug!(target: "decoy::inject", "{message}");
    Ok(JsValue::undefined())
}

fn log_info(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let message = render_args(args, ctx);
    info!(target: "decoy::inject", "{message}");
    Ok(JsValue::undefined())
}

fn log_warn(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let message = render_args(args, ctx);
    warn!(target: "decoy::inject", "{message}");
    Ok(JsValue::undefined())
}

fn log_error(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let message = render_args(args, ctx);
    error!(target: "decoy::inject", "{message}");
    Ok(JsValue::undefined())
}

fn register_method(
    obj: &JsObject,
    name: &str,
    func: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>,
    context: &mut Context,
) -> JsResult<()> {
    obj.set(
        PropertyKey::from(js_string!(name)),
        NativeFunction::from_fn_ptr(func).to_js_function(context.realm()),
        false,
        context,
    )
    .map(|_| ())
}

/// Logger object passed to injected functions. Output lands in the tracing
/// pipeline under the `decoy::inject` target.
pub(crate) fn create_logger(context: &mut Context) -> JsResult<JsValue> {
    let obj = new_object(context);
    register_method(&obj, "debug", log_debug, context)?;
    register_method(&obj, "info", log_info, context)?;
    register_method(&obj, "warn", log_warn, context)?;
    register_method(&obj, "error", log_error, context)?;
    Ok(obj.into())
}

/// Install `process.env`, `console`, `setTimeout` and `clearTimeout` as globals.
pub(crate) fn install_globals(context: &mut Context) -> JsResult<()> {
    let env = new_object(context);
    for (key, value) in std::env::vars() {
        env.set(js_string!(key), JsValue::from(js_string!(value)), false, context)?;
    }
    let process = new_object(context);
    process.set(js_string!("env"), env, false, context)?;

    let console = new_object(context);
    register_method(&console, "log", log_info, context)?;
    register_method(&console, "info", log_info, context)?;
    register_method(&console, "debug", log_debug, context)?;
    register_method(&console, "warn", log_warn, context)?;
    register_method(&console, "error", log_error, context)?;

    let global = context.global_object();
    global.set(js_string!("process"), process, false, context)?;
    global.set(js_string!("console"), console, false, context)?;
    register_method(&global, "setTimeout", set_timeout, context)?;
    register_method(&global, "clearTimeout", clear_timeout, context)?;
    Ok(())
}
