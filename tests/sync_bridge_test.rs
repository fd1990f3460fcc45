use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use frontier_webview::host::{
    Completion, HostEventSink, HostFunction, NativeError, NativePayload, NativeResult,
};
use frontier_webview::{Browser, BridgeConfig, CallId, ErrorKind, EventPump, Value, WebViewHost};

/// Loop double: queued closures run one per pump.
#[derive(Default)]
struct CountingPump {
    queue: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    pumps: Cell<usize>,
}

impl EventPump for CountingPump {
    fn pump_once(&self) -> bool {
        self.pumps.set(self.pumps.get() + 1);
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some(task) => {
                task();
                true
            }
            None => {
                std::thread::sleep(Duration::from_millis(1));
                false
            }
        }
    }
}

/// Host whose script results are fixed by the test. Completions are either
/// delivered inline or queued on the pump.
struct StubHost {
    pump: Rc<CountingPump>,
    inline: bool,
    reply: RefCell<NativeResult>,
    scripts: RefCell<Vec<(String, CallId)>>,
}

impl StubHost {
    fn new(pump: Rc<CountingPump>, inline: bool, reply: NativeResult) -> Rc<Self> {
        Rc::new(Self {
            pump,
            inline,
            reply: RefCell::new(reply),
            scripts: RefCell::new(Vec::new()),
        })
    }

    fn deliver(&self, token: CallId, result: NativeResult, done: Completion) {
        if self.inline {
            done(token, result);
        } else {
            self.pump
                .queue
                .borrow_mut()
                .push_back(Box::new(move || done(token, result)));
        }
    }
}

impl WebViewHost for StubHost {
    fn run_script(&self, script: &str, token: CallId, done: Completion) {
        self.scripts.borrow_mut().push((script.to_string(), token));
        let reply = self.reply.borrow().clone();
        self.deliver(token, reply, done);
    }

    fn fetch_content(&self, token: CallId, done: Completion) {
        self.deliver(token, Ok(NativePayload::Text("<p>stub</p>".into())), done);
    }

    fn read_cookie(&self, _url: &str, name: &str, token: CallId, done: Completion) {
        self.deliver(token, Ok(NativePayload::Text(format!("{name}-value"))), done);
    }

    fn write_cookie(&self, _url: &str, _value: &str, token: CallId, done: Completion) {
        self.deliver(token, Ok(NativePayload::Bool(true)), done);
    }

    fn load_html(&self, _html: &str) {}

    fn current_url(&self) -> String {
        "about:blank".to_string()
    }

    fn clear_sessions(&self) {}

    fn install_function(&self, _name: &str, _function: HostFunction) {}

    fn remove_function(&self, _name: &str) {}

    fn set_event_sink(&self, _sink: Option<HostEventSink>) {}
}

fn browser_with(inline: bool, reply: NativeResult) -> (Browser, Rc<StubHost>, Rc<CountingPump>) {
    let pump = Rc::new(CountingPump::default());
    let host = StubHost::new(Rc::clone(&pump), inline, reply);
    let browser = Browser::new(host.clone(), pump.clone(), BridgeConfig::default());
    (browser, host, pump)
}

#[test]
fn inline_completion_returns_without_pumping() {
    let (browser, host, pump) = browser_with(true, Ok(NativePayload::Number(2.0)));

    let value = browser.evaluate("1+1").expect("evaluate");

    assert_eq!(value, Value::Number(2.0));
    assert_eq!(pump.pumps.get(), 0);
    assert_eq!(host.scripts.borrow().len(), 1);
    assert_eq!(browser.bridge().in_flight(), 0);
}

#[test]
fn queued_completion_needs_one_pump() {
    let (browser, _host, pump) = browser_with(false, Ok(NativePayload::Text("done".into())));

    let value = browser.evaluate("return 'done'").expect("evaluate");

    assert_eq!(value, Value::from("done"));
    assert_eq!(pump.pumps.get(), 1);
}

#[test]
fn script_is_wrapped_as_function_body() {
    let (browser, host, _pump) = browser_with(true, Ok(NativePayload::Undefined));

    assert_eq!(browser.evaluate("return 7").expect("evaluate"), Value::Null);

    let scripts = host.scripts.borrow();
    let (wrapped, token) = &scripts[0];
    assert!(wrapped.starts_with("(function() {"));
    assert!(wrapped.contains("\nreturn 7\n"));
    assert!(!token.is_fire_and_forget());
}

#[test]
fn guarded_call_is_fire_and_forget() {
    let (browser, host, pump) = browser_with(false, Ok(NativePayload::Number(2.0)));

    let value = browser
        .bridge()
        .guard()
        .scope(|| browser.evaluate("return 2"))
        .expect("evaluate");

    assert_eq!(value, Value::Null);
    assert_eq!(pump.pumps.get(), 0);
    let scripts = host.scripts.borrow();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].1, CallId::FIRE_AND_FORGET);
    assert_eq!(browser.bridge().in_flight(), 0);
}

#[test]
fn unsupported_payload_is_invalid_return_value() {
    let (browser, _host, _pump) = browser_with(true, Ok(NativePayload::Opaque("object".into())));

    let err = browser.evaluate("return {}").unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidReturnValue);
}

#[test]
fn native_error_is_operation_failed() {
    let (browser, _host, _pump) = browser_with(true, Err(NativeError::new("SyntaxError: nope")));

    let err = browser.evaluate("return (").unwrap_err();

    assert_eq!(err.kind, ErrorKind::OperationFailed);
    assert!(err.message.contains("SyntaxError"));
}

#[test]
fn typed_operations_decode_their_results() {
    let (browser, _host, _pump) = browser_with(false, Ok(NativePayload::Null));

    assert_eq!(browser.get_text(), "<p>stub</p>");
    assert_eq!(browser.get_cookie("https://example.com/", "sid"), "sid-value");
    assert!(browser.set_cookie("https://example.com/", "sid=1"));
}

#[test]
fn disposed_browser_returns_sentinels_without_calling_host() {
    let (browser, host, pump) = browser_with(true, Ok(NativePayload::Number(1.0)));
    browser.dispose();

    assert_eq!(browser.evaluate("return 1").expect("evaluate"), Value::Null);
    assert_eq!(browser.get_text(), "");
    assert!(!browser.set_cookie("https://example.com/", "a=b"));
    assert!(!browser.execute("1"));
    assert!(host.scripts.borrow().is_empty());
    assert_eq!(pump.pumps.get(), 0);
}
