//! The native side of the browser.
//!
//! A host only offers callback-style primitives: each takes a completion token
//! and a [`Completion`], and invokes the completion later from its event loop.
//! [`QuickJsHost`] is the in-process implementation backed by QuickJS and a
//! cooperative [`HostLoop`].

pub mod cookies;
pub mod event_loop;
pub mod quickjs;
pub mod runtime;

pub use cookies::CookieJar;
pub use event_loop::HostLoop;
pub use quickjs::QuickJsHost;

use std::rc::Rc;

use thiserror::Error;

use crate::bridge::CallId;

/// Raw result shapes produced by the host before decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum NativePayload {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<NativePayload>),
    /// Something the host could not map, described by its type name.
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type NativeResult = Result<NativePayload, NativeError>;

/// Called once by the host with the token it was handed.
pub type Completion = Box<dyn FnOnce(CallId, NativeResult)>;

/// Script-callable function installed by the embedder.
pub type HostFunction = Rc<dyn Fn(Vec<NativePayload>) -> NativeResult>;

/// Notifications raised by the host outside of any pending call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    TitleChanged(String),
    LocationChanged(String),
    LoadCompleted,
}

pub type HostEventSink = Rc<dyn Fn(HostEvent)>;

/// Asynchronous primitives the browser is built on.
///
/// Every method returns immediately. Completions run later on the same thread,
/// from inside the host's event pump.
pub trait WebViewHost {
    fn run_script(&self, script: &str, token: CallId, done: Completion);

    fn fetch_content(&self, token: CallId, done: Completion);

    fn read_cookie(&self, url: &str, name: &str, token: CallId, done: Completion);

    fn write_cookie(&self, url: &str, value: &str, token: CallId, done: Completion);

    /// Load markup as the current page. Raises [`HostEvent`]s when done.
    fn load_html(&self, html: &str);

    fn current_url(&self) -> String;

    fn clear_sessions(&self);

    fn install_function(&self, name: &str, function: HostFunction);

    fn remove_function(&self, name: &str);

    fn set_event_sink(&self, sink: Option<HostEventSink>);
}
