use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value as JsonValue;
use tracing::{debug, error};

use super::cookies::CookieJar;
use super::event_loop::HostLoop;
use super::runtime::{payload_from_json, result_envelope, QuickJsEngine};
use super::{
    Completion, HostEvent, HostEventSink, HostFunction, NativeError, NativePayload, WebViewHost,
};
use crate::bridge::CallId;
use crate::config::BridgeConfig;

pub const ABOUT_BLANK: &str = "about:blank";

type FunctionTable = Rc<RefCell<HashMap<String, HostFunction>>>;

struct PageState {
    url: String,
    html: String,
}

struct HostState {
    event_loop: Rc<HostLoop>,
    engine: QuickJsEngine,
    page: RefCell<PageState>,
    cookies: Rc<RefCell<CookieJar>>,
    functions: FunctionTable,
    sink: RefCell<Option<HostEventSink>>,
    latency: Duration,
}

impl HostState {
    fn emit(&self, event: HostEvent) {
        // Clone out first: listeners may replace the sink.
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }
}

/// In-process host: scripts run on QuickJS, completions go through a
/// [`HostLoop`] so they only fire while somebody pumps it.
#[derive(Clone)]
pub struct QuickJsHost {
    state: Rc<HostState>,
}

impl QuickJsHost {
    pub fn new(event_loop: Rc<HostLoop>, config: &BridgeConfig) -> Result<Self> {
        Self::with_cookie_jar(event_loop, config, Rc::new(RefCell::new(CookieJar::new())))
    }

    /// Build a host that shares `cookies` with other hosts.
    pub fn with_cookie_jar(
        event_loop: Rc<HostLoop>,
        config: &BridgeConfig,
        cookies: Rc<RefCell<CookieJar>>,
    ) -> Result<Self> {
        let functions: FunctionTable = Rc::new(RefCell::new(HashMap::new()));
        let table = Rc::clone(&functions);
        let engine = QuickJsEngine::new(move |name, args| dispatch_host_call(&table, &name, &args))?;

        Ok(Self {
            state: Rc::new(HostState {
                event_loop,
                engine,
                page: RefCell::new(PageState {
                    url: ABOUT_BLANK.to_string(),
                    html: String::new(),
                }),
                cookies,
                functions,
                sink: RefCell::new(None),
                latency: config.native_latency(),
            }),
        })
    }

    pub fn event_loop(&self) -> &Rc<HostLoop> {
        &self.state.event_loop
    }

    pub fn cookie_jar(&self) -> Rc<RefCell<CookieJar>> {
        Rc::clone(&self.state.cookies)
    }

    fn schedule(&self, task: impl FnOnce(&HostState) + 'static) {
        let state = Rc::clone(&self.state);
        self.state
            .event_loop
            .post_delayed(self.state.latency, move || task(&state));
    }
}

fn dispatch_host_call(functions: &FunctionTable, name: &str, args: &str) -> String {
    let function = functions.borrow().get(name).cloned();
    let result = match function {
        None => Err(NativeError::new(format!("{name} is not a registered function"))),
        Some(function) => match serde_json::from_str::<JsonValue>(args) {
            Ok(JsonValue::Array(items)) => function(items.iter().map(payload_from_json).collect()),
            Ok(_) => Err(NativeError::new("host function arguments must be an array")),
            Err(err) => Err(NativeError::new(format!("malformed host call arguments: {err}"))),
        },
    };
    if let Err(err) = &result {
        debug!(target: "quickjs", function = name, error = %err, "host function failed");
    }
    result_envelope(&result)
}

fn extract_title(html: &str) -> Option<String> {
    let lowered = html.to_ascii_lowercase();
    let open = lowered.find("<title")?;
    let start = open + lowered[open..].find('>')? + 1;
    let end = start + lowered[start..].find("</title")?;
    let title = html[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    Some(title)
}

impl WebViewHost for QuickJsHost {
    fn run_script(&self, script: &str, token: CallId, done: Completion) {
        let script = script.to_string();
        self.schedule(move |state| {
            let result = state.engine.evaluate(&script, "evaluate.js");
            done(token, result);
        });
    }

    fn fetch_content(&self, token: CallId, done: Completion) {
        self.schedule(move |state| {
            let html = state.page.borrow().html.clone();
            done(token, Ok(NativePayload::Text(html)));
        });
    }

    fn read_cookie(&self, url: &str, name: &str, token: CallId, done: Completion) {
        let (url, name) = (url.to_string(), name.to_string());
        self.schedule(move |state| {
            let value = state.cookies.borrow().get(&url, &name);
            let payload = value.map(NativePayload::Text).unwrap_or(NativePayload::Null);
            done(token, Ok(payload));
        });
    }

    fn write_cookie(&self, url: &str, value: &str, token: CallId, done: Completion) {
        let (url, value) = (url.to_string(), value.to_string());
        self.schedule(move |state| {
            let stored = state.cookies.borrow_mut().set(&url, &value);
            done(token, Ok(NativePayload::Bool(stored)));
        });
    }

    fn load_html(&self, html: &str) {
        let html = html.to_string();
        self.schedule(move |state| {
            let title = extract_title(&html);
            {
                let mut page = state.page.borrow_mut();
                page.url = ABOUT_BLANK.to_string();
                page.html = html;
            }

            let title_literal =
                serde_json::to_string(title.as_deref().unwrap_or("")).unwrap_or_default();
            let bootstrap = format!(
                "globalThis.document = {{ title: {title_literal}, URL: \"{ABOUT_BLANK}\" }};"
            );
            if let Err(err) = state.engine.evaluate(&bootstrap, "document.js") {
                error!(target: "quickjs", error = %err, "failed to expose document");
            }

            state.emit(HostEvent::LocationChanged(ABOUT_BLANK.to_string()));
            if let Some(title) = title {
                state.emit(HostEvent::TitleChanged(title));
            }
            state.emit(HostEvent::LoadCompleted);
        });
    }

    fn current_url(&self) -> String {
        self.state.page.borrow().url.clone()
    }

    fn clear_sessions(&self) {
        self.state.cookies.borrow_mut().clear_sessions();
    }

    fn install_function(&self, name: &str, function: HostFunction) {
        self.state
            .functions
            .borrow_mut()
            .insert(name.to_string(), function);
        // Defined from the loop so we never re-enter a running script.
        let name = name.to_string();
        self.state.event_loop.post({
            let state = Rc::clone(&self.state);
            move || {
                if let Err(err) = state.engine.define_function(&name) {
                    error!(target: "quickjs", error = %err, "failed to install host function");
                }
            }
        });
    }

    fn remove_function(&self, name: &str) {
        if self.state.functions.borrow_mut().remove(name).is_none() {
            return;
        }
        let name = name.to_string();
        self.state.event_loop.post({
            let state = Rc::clone(&self.state);
            move || {
                if let Err(err) = state.engine.remove_function(&name) {
                    error!(target: "quickjs", error = %err, "failed to remove host function");
                }
            }
        });
    }

    fn set_event_sink(&self, sink: Option<HostEventSink>) {
        *self.state.sink.borrow_mut() = sink;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::EventPump;
    use std::cell::Cell;

    fn host() -> QuickJsHost {
        let event_loop = Rc::new(HostLoop::new(Duration::from_millis(1)));
        QuickJsHost::new(event_loop, &BridgeConfig::default()).expect("host")
    }

    #[test]
    fn completions_wait_for_the_loop() {
        let host = host();
        let received = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&received);
        host.run_script(
            "6 * 7",
            CallId(5),
            Box::new(move |token, result| *slot.borrow_mut() = Some((token, result))),
        );
        assert!(received.borrow().is_none());

        host.event_loop().pump_until_idle();
        assert_eq!(
            received.borrow_mut().take(),
            Some((CallId(5), Ok(NativePayload::Number(42.0))))
        );
    }

    #[test]
    fn load_html_raises_events_in_order() {
        let host = host();
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        host.set_event_sink(Some(Rc::new(move |event: HostEvent| log.borrow_mut().push(event))));

        host.load_html("<html><head><TITLE> Hello\n  World </TITLE></head></html>");
        host.event_loop().pump_until_idle();

        assert_eq!(
            *events.borrow(),
            vec![
                HostEvent::LocationChanged(ABOUT_BLANK.to_string()),
                HostEvent::TitleChanged("Hello World".to_string()),
                HostEvent::LoadCompleted,
            ]
        );
        assert_eq!(host.current_url(), ABOUT_BLANK);
    }

    #[test]
    fn installed_functions_are_callable_from_scripts() {
        let host = host();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        host.install_function(
            "sum",
            Rc::new(move |args: Vec<NativePayload>| {
                counter.set(counter.get() + 1);
                let total: f64 = args
                    .iter()
                    .map(|arg| match arg {
                        NativePayload::Number(n) => *n,
                        _ => 0.0,
                    })
                    .sum();
                Ok(NativePayload::Number(total))
            }),
        );

        let received = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&received);
        host.run_script(
            "sum(1, 2, 3)",
            CallId(1),
            Box::new(move |_, result| *slot.borrow_mut() = Some(result)),
        );
        host.event_loop().pump_until_idle();

        assert_eq!(
            received.borrow_mut().take(),
            Some(Ok(NativePayload::Number(6.0)))
        );
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn unknown_function_reports_error() {
        let table: FunctionTable = Rc::new(RefCell::new(HashMap::new()));
        let reply: JsonValue =
            serde_json::from_str(&dispatch_host_call(&table, "missing", "[]")).unwrap();
        assert!(reply["error"].as_str().unwrap().contains("missing"));
    }

    #[test]
    fn title_extraction() {
        assert_eq!(extract_title("<title>x</title>"), Some("x".into()));
        assert_eq!(extract_title("<p>no title</p>"), None);
    }
}
