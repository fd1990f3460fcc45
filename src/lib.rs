// Library exports for the binary and integration tests

pub mod bridge;
pub mod browser;
pub mod config;
pub mod host;
pub mod pump;
pub mod value;

// Re-export commonly used types for tests
pub use bridge::{CallError, CallId, ErrorKind, Outcome, SyncBridge};
pub use browser::{Browser, BrowserEvent, ListenerId};
pub use config::{BridgeConfig, ConfigError};
pub use host::{CookieJar, HostLoop, QuickJsHost, WebViewHost};
pub use pump::EventPump;
pub use value::Value;
