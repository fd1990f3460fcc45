//! Synchronous browser API on top of a callback-only [`WebViewHost`].

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::bridge::{CallError, CallId, Outcome, SyncBridge};
use crate::config::BridgeConfig;
use crate::host::{
    Completion, CookieJar, HostEvent, HostFunction, HostLoop, NativeError, NativePayload,
    NativeResult, QuickJsHost, WebViewHost,
};
use crate::pump::EventPump;
use crate::value::Value;

pub type ListenerId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
    LocationChanged(String),
    TitleChanged(String),
    /// The page passed to [`Browser::set_text`] finished loading.
    Completed,
}

impl From<HostEvent> for BrowserEvent {
    fn from(event: HostEvent) -> Self {
        match event {
            HostEvent::LocationChanged(url) => BrowserEvent::LocationChanged(url),
            HostEvent::TitleChanged(title) => BrowserEvent::TitleChanged(title),
            HostEvent::LoadCompleted => BrowserEvent::Completed,
        }
    }
}

type Listener = Rc<dyn Fn(&Browser, &BrowserEvent)>;

struct BrowserInner {
    bridge: Rc<SyncBridge>,
    host: Rc<dyn WebViewHost>,
    config: BridgeConfig,
    disposed: Cell<bool>,
    listeners: RefCell<Vec<(ListenerId, Listener)>>,
    next_listener: Cell<ListenerId>,
    functions: RefCell<HashSet<String>>,
}

/// Handle to one embedded browser. Clones share the same instance.
#[derive(Clone)]
pub struct Browser {
    inner: Rc<BrowserInner>,
}

impl Browser {
    pub fn new(host: Rc<dyn WebViewHost>, pump: Rc<dyn EventPump>, config: BridgeConfig) -> Self {
        let inner = Rc::new(BrowserInner {
            bridge: Rc::new(SyncBridge::new(pump)),
            host,
            config,
            disposed: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(1),
            functions: RefCell::new(HashSet::new()),
        });

        let weak = Rc::downgrade(&inner);
        inner.host.set_event_sink(Some(Rc::new(move |event: HostEvent| {
            if let Some(inner) = weak.upgrade() {
                dispatch_event(&inner, event.into());
            }
        })));

        Self { inner }
    }

    /// Browser backed by an in-process QuickJS host with its own cookie jar.
    pub fn with_quickjs(config: BridgeConfig) -> Result<Self> {
        Self::with_quickjs_cookies(config, Rc::new(RefCell::new(CookieJar::new())))
    }

    /// QuickJS-backed browser sharing `cookies` with other instances.
    pub fn with_quickjs_cookies(
        config: BridgeConfig,
        cookies: Rc<RefCell<CookieJar>>,
    ) -> Result<Self> {
        let event_loop = Rc::new(HostLoop::new(config.idle_wait()));
        let host = QuickJsHost::with_cookie_jar(Rc::clone(&event_loop), &config, cookies)?;
        Ok(Self::new(Rc::new(host), event_loop, config))
    }

    pub fn bridge(&self) -> &SyncBridge {
        &self.inner.bridge
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Tear the browser down. Waits in progress give up on their next
    /// iteration and report empty results.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        debug!(target: "browser", "disposing browser");
        self.inner.host.set_event_sink(None);
        self.inner.listeners.borrow_mut().clear();
        let functions: Vec<String> = self.inner.functions.borrow_mut().drain().collect();
        for name in functions {
            self.inner.host.remove_function(&name);
        }
    }

    /// Evaluate `script` as the body of a function and return its result.
    ///
    /// Use `return` to produce a value. Timeouts, disposal and calls made from
    /// inside listeners or host functions yield `Value::Null`.
    pub fn evaluate(&self, script: &str) -> Result<Value, CallError> {
        let wrapped = format!("(function() {{\n{script}\n}}).call(globalThis)");
        let host = Rc::clone(&self.inner.host);
        let outcome = self.invoke(
            self.inner.config.script_timeout(),
            move |token, done| host.run_script(&wrapped, token, done),
            decode_script_result,
        );
        match outcome {
            Outcome::Resolved(value) => Ok(value),
            Outcome::Failed(error) => Err(error),
            Outcome::TimedOut | Outcome::Abandoned | Outcome::FireAndForget => Ok(Value::Null),
        }
    }

    /// Run `script` without waiting for it. Returns `false` once disposed.
    pub fn execute(&self, script: &str) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.inner.host.run_script(
            script,
            CallId::FIRE_AND_FORGET,
            Box::new(|_, result| {
                if let Err(err) = result {
                    debug!(target: "browser", error = %err, "executed script threw");
                }
            }),
        );
        true
    }

    /// Source of the current page, or an empty string if unavailable.
    pub fn get_text(&self) -> String {
        let host = Rc::clone(&self.inner.host);
        let outcome = self.invoke(
            self.inner.config.content_timeout(),
            move |token, done| host.fetch_content(token, done),
            decode_text,
        );
        text_or_default(outcome, "get_text")
    }

    /// Value of cookie `name` for `url`, or an empty string.
    pub fn get_cookie(&self, url: &str, name: &str) -> String {
        let host = Rc::clone(&self.inner.host);
        let (url, name) = (url.to_string(), name.to_string());
        let outcome = self.invoke(
            self.inner.config.cookie_timeout(),
            move |token, done| host.read_cookie(&url, &name, token, done),
            decode_text,
        );
        text_or_default(outcome, "get_cookie")
    }

    /// Store a cookie header for `url`. `false` if it was rejected or the
    /// call did not complete.
    pub fn set_cookie(&self, url: &str, value: &str) -> bool {
        let host = Rc::clone(&self.inner.host);
        let (url, value) = (url.to_string(), value.to_string());
        let outcome = self.invoke(
            self.inner.config.cookie_timeout(),
            move |token, done| host.write_cookie(&url, &value, token, done),
            decode_flag,
        );
        match outcome {
            Outcome::Resolved(Value::Bool(stored)) => stored,
            Outcome::Failed(error) => {
                warn!(target: "browser", error = %error, "set_cookie failed");
                false
            }
            _ => false,
        }
    }

    /// Drop every session cookie from this browser's jar.
    pub fn clear_sessions(&self) {
        self.inner.host.clear_sessions();
    }

    /// Start loading `html`. Listeners see the events once it is loaded.
    pub fn set_text(&self, html: &str) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.inner.host.load_html(html);
        true
    }

    pub fn get_url(&self) -> String {
        self.inner.host.current_url()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Browser, &BrowserEvent) + 'static,
    {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Expose `handler` to scripts as a global function called `name`.
    ///
    /// The handler runs while the host is blocked inside the calling script,
    /// so synchronous browser calls made from it do not wait and return empty
    /// results. An `Err` is thrown into the script as an `Error`.
    pub fn register_function<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Browser, &[Value]) -> Result<Value, String> + 'static,
    {
        if self.is_disposed() {
            return;
        }
        let weak: Weak<BrowserInner> = Rc::downgrade(&self.inner);
        let function: HostFunction = Rc::new(move |args: Vec<NativePayload>| {
            let Some(inner) = weak.upgrade() else {
                return Err(NativeError::new("browser has been disposed"));
            };
            let arguments: Vec<Value> = args.into_iter().map(payload_to_argument).collect();
            let browser = Browser {
                inner: Rc::clone(&inner),
            };
            let result = inner.bridge.guard().scope(|| handler(&browser, &arguments));
            result
                .map(|value| value_to_payload(&value))
                .map_err(NativeError::new)
        });
        self.inner.functions.borrow_mut().insert(name.to_string());
        self.inner.host.install_function(name, function);
    }

    pub fn unregister_function(&self, name: &str) -> bool {
        if !self.inner.functions.borrow_mut().remove(name) {
            return false;
        }
        self.inner.host.remove_function(name);
        true
    }

    fn invoke<S, D>(&self, timeout: Duration, submit: S, decode: D) -> Outcome
    where
        S: FnOnce(CallId, Completion),
        D: Fn(NativeResult) -> Result<Value, CallError> + 'static,
    {
        if self.is_disposed() {
            return Outcome::Abandoned;
        }
        let inner = &self.inner;
        inner.bridge.invoke_synchronously(
            |id| {
                let bridge = Rc::clone(&inner.bridge);
                let done: Completion = Box::new(move |token, result| {
                    bridge.resolve(token, decode(result));
                });
                submit(id, done);
            },
            timeout,
            || inner.disposed.get(),
        )
    }
}

fn dispatch_event(inner: &Rc<BrowserInner>, event: BrowserEvent) {
    if inner.disposed.get() {
        return;
    }
    let listeners: Vec<Listener> = inner
        .listeners
        .borrow()
        .iter()
        .map(|(_, listener)| Rc::clone(listener))
        .collect();
    if listeners.is_empty() {
        return;
    }

    let browser = Browser {
        inner: Rc::clone(inner),
    };
    let _scope = inner.bridge.guard().enter();
    for listener in listeners {
        listener(&browser, &event);
    }
}

fn text_or_default(outcome: Outcome, operation: &'static str) -> String {
    match outcome {
        Outcome::Resolved(Value::String(text)) => text,
        Outcome::Failed(error) => {
            warn!(target: "browser", operation, error = %error, "operation failed");
            String::new()
        }
        _ => String::new(),
    }
}

fn decode_payload(payload: NativePayload) -> Result<Value, CallError> {
    match payload {
        NativePayload::Undefined | NativePayload::Null => Ok(Value::Null),
        NativePayload::Bool(b) => Ok(Value::Bool(b)),
        NativePayload::Number(n) => Ok(Value::Number(n)),
        NativePayload::Text(s) => Ok(Value::String(s)),
        NativePayload::List(items) => items
            .into_iter()
            .map(decode_payload)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        NativePayload::Opaque(kind) => Err(CallError::invalid_return_value(format!(
            "unsupported return type: {kind}"
        ))),
    }
}

fn decode_script_result(result: NativeResult) -> Result<Value, CallError> {
    match result {
        Ok(payload) => decode_payload(payload),
        Err(err) => Err(CallError::operation_failed(err.message)),
    }
}

fn decode_text(result: NativeResult) -> Result<Value, CallError> {
    match result {
        Ok(NativePayload::Text(text)) => Ok(Value::String(text)),
        Ok(NativePayload::Null | NativePayload::Undefined) => Ok(Value::Null),
        Ok(other) => Err(CallError::invalid_return_value(format!(
            "expected text, got {other:?}"
        ))),
        Err(err) => Err(CallError::operation_failed(err.message)),
    }
}

fn decode_flag(result: NativeResult) -> Result<Value, CallError> {
    match result {
        Ok(NativePayload::Bool(flag)) => Ok(Value::Bool(flag)),
        Ok(other) => Err(CallError::invalid_return_value(format!(
            "expected boolean, got {other:?}"
        ))),
        Err(err) => Err(CallError::operation_failed(err.message)),
    }
}

/// Script arguments of unsupported types arrive as `null`.
fn payload_to_argument(payload: NativePayload) -> Value {
    decode_payload(payload).unwrap_or(Value::Null)
}

fn value_to_payload(value: &Value) -> NativePayload {
    match value {
        Value::Null => NativePayload::Null,
        Value::Bool(b) => NativePayload::Bool(*b),
        Value::Number(n) => NativePayload::Number(*n),
        Value::String(s) => NativePayload::Text(s.clone()),
        Value::Array(items) => NativePayload::List(items.iter().map(value_to_payload).collect()),
    }
}
