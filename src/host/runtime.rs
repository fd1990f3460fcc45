use anyhow::{Context as AnyhowContext, Result};
use rquickjs::{Context, Ctx, Error as JsError, Function, Runtime, Value};
use serde_json::{json, Value as JsonValue};

use super::{NativeError, NativePayload, NativeResult};

/// Arrays nested deeper than this are reported as opaque. Also stops
/// self-referencing arrays from recursing forever.
const MAX_ARRAY_DEPTH: usize = 64;

const MAX_JOBS: usize = 1000;

/// JavaScript runtime backed by QuickJS.
///
/// Owns the QuickJS runtime and context, forwards `console.*` to tracing and
/// routes calls to embedder functions through a single dispatcher.
pub struct QuickJsEngine {
    runtime: Runtime,
    context: Context,
}

impl QuickJsEngine {
    /// Create an engine whose host-function calls go to `dispatch`.
    ///
    /// `dispatch` receives the function name and its arguments as a JSON array
    /// and returns a JSON envelope: `{"value": ..}` or `{"error": ".."}`.
    pub fn new<D>(dispatch: D) -> Result<Self>
    where
        D: Fn(String, String) -> String + 'static,
    {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        let engine = Self { runtime, context };
        engine.init_globals(dispatch)?;
        Ok(engine)
    }

    /// Evaluate a script and convert its completion value.
    pub fn evaluate(&self, source: &str, filename: &str) -> NativeResult {
        let script = with_source_url(source, filename);
        let result = self.context.with(|ctx| match ctx.eval::<Value, _>(script) {
            Ok(value) => Ok(value_to_payload(&value, 0)),
            Err(JsError::Exception) => Err(NativeError::new(
                capture_exception_message(&ctx)
                    .unwrap_or_else(|| "QuickJS exception".to_string()),
            )),
            Err(err) => Err(NativeError::new(err.to_string())),
        });

        self.execute_pending_jobs();
        result
    }

    /// Expose `name` to scripts as a function forwarding to the dispatcher.
    pub fn define_function(&self, name: &str) -> Result<()> {
        let literal = serde_json::to_string(name)?;
        let source = format!("globalThis.__frontier_define_host_function({literal});");
        self.evaluate(&source, "host-function.js")
            .map(|_| ())
            .map_err(|err| anyhow::anyhow!("failed to define host function {name}: {err}"))
    }

    pub fn remove_function(&self, name: &str) -> Result<()> {
        let literal = serde_json::to_string(name)?;
        let source = format!("delete globalThis[{literal}];");
        self.evaluate(&source, "host-function.js")
            .map(|_| ())
            .map_err(|err| anyhow::anyhow!("failed to remove host function {name}: {err}"))
    }

    fn execute_pending_jobs(&self) {
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= MAX_JOBS {
                        tracing::warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            MAX_JOBS
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(
                        target: "quickjs",
                        "Job execution error: {:?}",
                        job_exception
                    );
                    break;
                }
            }
        }

        if job_count > 0 {
            tracing::debug!(target: "quickjs", "Executed {} pending jobs", job_count);
        }
    }

    fn init_globals<D>(&self, dispatch: D) -> Result<()>
    where
        D: Fn(String, String) -> String + 'static,
    {
        self.context
            .with(|ctx| {
                let global = ctx.globals();
                let log_fn =
                    Function::new(ctx.clone(), log_from_js)?.with_name("__frontier_log")?;
                global.set("__frontier_log", log_fn)?;

                let call_fn = Function::new(
                    ctx.clone(),
                    move |name: String, args: String| -> rquickjs::Result<String> {
                        Ok(dispatch(name, args))
                    },
                )?
                .with_name("__frontier_call_host")?;
                global.set("__frontier_call_host", call_fn)?;

                ctx.eval::<(), _>(CONSOLE_BOOTSTRAP.as_bytes())?;
                ctx.eval::<(), _>(HOST_FUNCTION_BOOTSTRAP.as_bytes())
            })
            .map_err(anyhow::Error::from)
    }
}

fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
    let mut script = String::with_capacity(source.len() + filename.len() + 32);
    script.push_str(source);
    if !source.ends_with('\n') {
        script.push('\n');
    }
    script.push_str("//# sourceURL=");
    script.push_str(filename);
    script.push('\n');
    script.into_bytes()
}

fn value_to_payload(value: &Value<'_>, depth: usize) -> NativePayload {
    if value.is_undefined() {
        return NativePayload::Undefined;
    }
    if value.is_null() {
        return NativePayload::Null;
    }
    if let Some(b) = value.as_bool() {
        return NativePayload::Bool(b);
    }
    if let Some(n) = value.as_int() {
        return NativePayload::Number(f64::from(n));
    }
    if let Some(n) = value.as_float() {
        return NativePayload::Number(n);
    }
    if let Some(s) = value.as_string() {
        return match s.to_string() {
            Ok(text) => NativePayload::Text(text),
            Err(_) => NativePayload::Opaque("string".to_string()),
        };
    }
    if let Some(array) = value.as_array() {
        if depth >= MAX_ARRAY_DEPTH {
            return NativePayload::Opaque("array nested too deeply".to_string());
        }
        let mut items = Vec::with_capacity(array.len());
        for index in 0..array.len() {
            match array.get::<Value>(index) {
                Ok(item) => items.push(value_to_payload(&item, depth + 1)),
                Err(_) => return NativePayload::Opaque("array".to_string()),
            }
        }
        return NativePayload::List(items);
    }
    NativePayload::Opaque(value.type_name().to_string())
}

/// Arguments arrive as a JSON array produced by `JSON.stringify`.
pub(crate) fn payload_from_json(json: &JsonValue) -> NativePayload {
    match json {
        JsonValue::Null => NativePayload::Null,
        JsonValue::Bool(b) => NativePayload::Bool(*b),
        JsonValue::Number(n) => n
            .as_f64()
            .map(NativePayload::Number)
            .unwrap_or_else(|| NativePayload::Opaque("number".to_string())),
        JsonValue::String(s) => NativePayload::Text(s.clone()),
        JsonValue::Array(items) => NativePayload::List(items.iter().map(payload_from_json).collect()),
        JsonValue::Object(_) => NativePayload::Opaque("object".to_string()),
    }
}

pub(crate) fn payload_to_json(payload: &NativePayload) -> JsonValue {
    match payload {
        NativePayload::Undefined | NativePayload::Null | NativePayload::Opaque(_) => JsonValue::Null,
        NativePayload::Bool(b) => JsonValue::Bool(*b),
        NativePayload::Number(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        NativePayload::Text(s) => JsonValue::String(s.clone()),
        NativePayload::List(items) => JsonValue::Array(items.iter().map(payload_to_json).collect()),
    }
}

pub(crate) fn result_envelope(result: &NativeResult) -> String {
    let envelope = match result {
        Ok(payload) => json!({ "value": payload_to_json(payload) }),
        Err(err) => json!({ "error": err.message }),
    };
    envelope.to_string()
}

fn log_from_js(message: String) -> rquickjs::Result<()> {
    tracing::info!(target: "quickjs", message = %message);
    Ok(())
}

fn capture_exception_message(ctx: &Ctx<'_>) -> Option<String> {
    let exception: Value = ctx.catch();

    if let Some(obj) = exception.as_object() {
        if let Ok(message) = obj.get::<_, String>("message") {
            return Some(message);
        }
    }
    if let Some(text) = exception.as_string() {
        if let Ok(text) = text.to_string() {
            return Some(text);
        }
    }

    Some(format!("{:?}", exception))
}

const CONSOLE_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const logImpl = (...args) => {
        try {
            global.__frontier_log(args.map(stringify).join(' '));
        } catch (err) {
            // console must never throw
        }
    };

    if (typeof global.console !== 'object' || global.console === null) {
        global.console = {};
    }
    global.console.log = logImpl;
    global.console.error = logImpl;
    global.console.warn = logImpl;
    global.console.info = logImpl;
    global.console.debug = logImpl;
})();
"#;

const HOST_FUNCTION_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const call = global.__frontier_call_host;
    Object.defineProperty(global, '__frontier_define_host_function', {
        value: (name) => {
            global[name] = function (...args) {
                const reply = JSON.parse(call(name, JSON.stringify(args)));
                if (Object.prototype.hasOwnProperty.call(reply, 'error')) {
                    throw new Error(reply.error);
                }
                return reply.value;
            };
        },
        enumerable: false,
    });
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> QuickJsEngine {
        QuickJsEngine::new(|_, _| json!({ "value": null }).to_string()).expect("engine")
    }

    #[test]
    fn converts_primitive_results() {
        let engine = engine();
        assert_eq!(engine.evaluate("40 + 2", "t.js"), Ok(NativePayload::Number(42.0)));
        assert_eq!(engine.evaluate("'hi'", "t.js"), Ok(NativePayload::Text("hi".into())));
        assert_eq!(engine.evaluate("true", "t.js"), Ok(NativePayload::Bool(true)));
        assert_eq!(engine.evaluate("null", "t.js"), Ok(NativePayload::Null));
        assert_eq!(engine.evaluate("undefined", "t.js"), Ok(NativePayload::Undefined));
    }

    #[test]
    fn converts_arrays_and_flags_objects() {
        let engine = engine();
        assert_eq!(
            engine.evaluate("[1, 'a', [false]]", "t.js"),
            Ok(NativePayload::List(vec![
                NativePayload::Number(1.0),
                NativePayload::Text("a".into()),
                NativePayload::List(vec![NativePayload::Bool(false)]),
            ]))
        );
        assert!(matches!(
            engine.evaluate("({ a: 1 })", "t.js"),
            Ok(NativePayload::Opaque(_))
        ));
    }

    #[test]
    fn self_referencing_array_terminates() {
        let engine = engine();
        let result = engine.evaluate("const a = []; a.push(a); a", "t.js").unwrap();
        let mut current = &result;
        let mut depth = 0;
        while let NativePayload::List(items) = current {
            current = &items[0];
            depth += 1;
        }
        assert!(matches!(current, NativePayload::Opaque(_)));
        assert_eq!(depth, MAX_ARRAY_DEPTH);
    }

    #[test]
    fn reports_thrown_errors() {
        let engine = engine();
        let err = engine
            .evaluate("throw new Error('bad things')", "t.js")
            .unwrap_err();
        assert_eq!(err.message, "bad things");
    }

    #[test]
    fn host_functions_round_trip_through_dispatcher() {
        let engine = QuickJsEngine::new(|name, args| {
            let parsed: JsonValue = serde_json::from_str(&args).unwrap();
            json!({ "value": format!("{name}:{}", parsed[0]) }).to_string()
        })
        .expect("engine");
        engine.define_function("echo").unwrap();
        assert_eq!(
            engine.evaluate("echo(7)", "t.js"),
            Ok(NativePayload::Text("echo:7".into()))
        );

        engine.remove_function("echo").unwrap();
        assert!(engine.evaluate("echo(7)", "t.js").is_err());
    }

    #[test]
    fn host_function_errors_become_exceptions() {
        let engine =
            QuickJsEngine::new(|_, _| json!({ "error": "denied" }).to_string()).expect("engine");
        engine.define_function("guarded").unwrap();
        let result = engine.evaluate(
            "(() => { try { guarded(); return 'no'; } catch (e) { return e.message; } })()",
            "t.js",
        );
        assert_eq!(result, Ok(NativePayload::Text("denied".into())));
    }
}
