//! Sandboxed JavaScript execution for transform and action scripts.
//!
//! Two entry points exist:
//!
//! - source-level `transform(event)` over
//!   `{payload, headers, actions: [{id, target_url}]}`, returning the same
//!   shape (possibly with a filtered action list) or null to drop the event;
//! - action-level `process(event)` over `{payload, headers}`, returning any
//!   JSON-serializable value recorded as the attempt's response body.
//!
//! Each run gets a fresh QuickJS runtime with no host objects, no module
//! loader, and no I/O. Event values cross the boundary as JSON text, so
//! scripts only ever see plain data. Hard limits: 64 KiB of script text and
//! a 500 ms wall-clock interrupt that aborts a running script.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rquickjs::{Context, Ctx, Function, Runtime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum script text size in bytes.
pub const MAX_SCRIPT_SIZE: usize = 64 * 1024;

/// Wall-clock budget for a single script execution.
pub const EXEC_TIMEOUT: Duration = Duration::from_millis(500);

/// Memory ceiling for the sandbox runtime.
const MEMORY_LIMIT: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script exceeds 64KB limit")]
    TooLarge,

    #[error("script execution timed out")]
    Timeout,

    #[error("script must define a 'transform' function")]
    NoTransform,

    #[error("script must define a 'process' function")]
    NoProcess,

    #[error("script error: {0}")]
    Exec(String),

    #[error("script returned invalid output: {0}")]
    InvalidOutput(String),
}

/// Lightweight action reference passed into and out of transform scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRef {
    pub id: Uuid,
    pub target_url: String,
}

/// The `event` value handed to a transform script.
#[derive(Debug, Clone, Serialize)]
pub struct TransformInput {
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
    pub actions: Vec<ActionRef>,
}

/// What a transform script decided.
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
    /// Actions the script kept. Empty means "kept none".
    pub actions: Vec<ActionRef>,
    /// True when the script returned null/undefined to drop the event.
    pub dropped: bool,
}

impl TransformOutcome {
    fn dropped() -> Self {
        Self {
            payload: serde_json::Value::Null,
            headers: BTreeMap::new(),
            actions: Vec::new(),
            dropped: true,
        }
    }
}

/// Raw shape deserialized from the script's return value.
#[derive(Debug, Deserialize)]
struct RawTransform {
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    headers: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    actions: Vec<RawActionRef>,
}

#[derive(Debug, Deserialize)]
struct RawActionRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    target_url: String,
}

/// Execute a source transform script against the event.
pub fn run_transform(script: &str, input: &TransformInput) -> Result<TransformOutcome, ScriptError> {
    let event_json =
        serde_json::to_string(input).map_err(|e| ScriptError::Exec(format!("failed to encode event: {e}")))?;

    let Some(returned) = run_entry(script, "transform", event_json, ScriptError::NoTransform)? else {
        return Ok(TransformOutcome::dropped());
    };

    let raw: RawTransform =
        serde_json::from_str(&returned).map_err(|e| ScriptError::InvalidOutput(e.to_string()))?;

    let headers = raw
        .headers
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, value)
        })
        .collect();

    // Actions with unparseable ids are silently dropped from the kept set.
    let actions = raw
        .actions
        .into_iter()
        .filter_map(|a| {
            let id = Uuid::parse_str(&a.id).ok()?;
            Some(ActionRef {
                id,
                target_url: a.target_url,
            })
        })
        .collect();

    Ok(TransformOutcome {
        payload: raw.payload,
        headers,
        actions,
        dropped: false,
    })
}

/// Execute an action script's `process(event)` function.
///
/// Returns the JSON serialization of the script's return value. A null or
/// undefined return is recorded as the literal string `"null"`.
pub fn run_action(
    script: &str,
    payload: &serde_json::Value,
    headers: &BTreeMap<String, String>,
) -> Result<String, ScriptError> {
    let event = serde_json::json!({ "payload": payload, "headers": headers });
    let event_json =
        serde_json::to_string(&event).map_err(|e| ScriptError::Exec(format!("failed to encode event: {e}")))?;

    match run_entry(script, "process", event_json, ScriptError::NoProcess)? {
        Some(json) => Ok(json),
        None => Ok("null".to_string()),
    }
}

/// Check that a transform script compiles and binds a `transform` function.
pub fn validate_transform(script: &str) -> Result<(), ScriptError> {
    validate_entry(script, "transform", ScriptError::NoTransform)
}

/// Check that an action script compiles and binds a `process` function.
pub fn validate_action(script: &str) -> Result<(), ScriptError> {
    validate_entry(script, "process", ScriptError::NoProcess)
}

/// Shared execution path: evaluate the script, resolve the entry point, call
/// it with the event, and bring the result back as JSON text.
///
/// `Ok(None)` means the script returned null/undefined.
fn run_entry(
    script: &str,
    entry: &str,
    event_json: String,
    missing: ScriptError,
) -> Result<Option<String>, ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::TooLarge);
    }

    let (runtime, timed_out) = sandbox_runtime()?;
    let context = Context::full(&runtime).map_err(|e| ScriptError::Exec(e.to_string()))?;

    context.with(|ctx| {
        if let Err(e) = ctx.eval::<(), _>(script) {
            return Err(classify(&ctx, e, &timed_out));
        }

        // The binding must exist and be callable before we go any further.
        if ctx.globals().get::<_, Function>(entry).is_err() {
            return Err(missing);
        }

        ctx.globals()
            .set("__hookrelay_event", event_json)
            .map_err(|e| ScriptError::Exec(e.to_string()))?;

        let wrapper = format!(
            r#"(() => {{
                const __result = {entry}(JSON.parse(globalThis.__hookrelay_event));
                if (__result === null || __result === undefined) {{ return null; }}
                const __json = JSON.stringify(__result);
                if (__json === undefined) {{
                    throw new TypeError("{entry} returned a value that cannot be serialized");
                }}
                return __json;
            }})()"#
        );

        ctx.eval::<Option<String>, _>(wrapper)
            .map_err(|e| classify(&ctx, e, &timed_out))
    })
}

fn validate_entry(script: &str, entry: &str, missing: ScriptError) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::TooLarge);
    }

    let (runtime, timed_out) = sandbox_runtime()?;
    let context = Context::full(&runtime).map_err(|e| ScriptError::Exec(e.to_string()))?;

    context.with(|ctx| {
        if let Err(e) = ctx.eval::<(), _>(script) {
            return Err(classify(&ctx, e, &timed_out));
        }

        if ctx.globals().get::<_, Function>(entry).is_err() {
            return Err(missing);
        }

        Ok(())
    })
}

/// Build a fresh runtime with the memory ceiling and the wall-clock
/// interrupt armed. The returned flag is set when the interrupt fires.
fn sandbox_runtime() -> Result<(Runtime, Arc<AtomicBool>), ScriptError> {
    let runtime = Runtime::new().map_err(|e| ScriptError::Exec(e.to_string()))?;
    runtime.set_memory_limit(MEMORY_LIMIT);

    let timed_out = Arc::new(AtomicBool::new(false));
    let deadline = Instant::now() + EXEC_TIMEOUT;
    let flag = timed_out.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || {
        if Instant::now() >= deadline {
            flag.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    })));

    Ok((runtime, timed_out))
}

fn classify(ctx: &Ctx<'_>, err: rquickjs::Error, timed_out: &AtomicBool) -> ScriptError {
    if timed_out.load(Ordering::SeqCst) {
        return ScriptError::Timeout;
    }

    if matches!(err, rquickjs::Error::Exception) {
        let caught = ctx.catch();
        let message = caught
            .as_exception()
            .and_then(|e| e.message())
            .unwrap_or_else(|| format!("{caught:?}"));
        return ScriptError::Exec(message);
    }

    ScriptError::Exec(err.to_string())
}
