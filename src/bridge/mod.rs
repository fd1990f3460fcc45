//! Synchronous calls on top of callback-based native operations.
//!
//! The native side only offers "start this, call me back later". Callers want
//! a return value. [`SyncBridge`] tags each call with an id from the
//! [`CallbackRegistry`], hands the id to the native primitive as its
//! completion token and pumps the host [`EventPump`] until the completion
//! arrives, the timeout passes or the owner goes away.
//!
//! Everything runs on one thread. The registry is behind a `RefCell` and no
//! borrow is held while the loop is pumped, so completions that fire from
//! inside `pump_once` can always reach it.
//!
//! Handlers the native side is itself blocked on run inside the
//! [`ReentrancyGuard`]. Calls made from there do not wait at all: the
//! operation is still issued but its result is never collected.

mod guard;
mod pending;
mod registry;

pub use guard::{GuardScope, ReentrancyGuard};
pub use pending::{CallError, CallId, ErrorKind, PendingCall};
pub use registry::{CallbackRegistry, RegistryError};

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::pump::EventPump;
use crate::value::Value;

/// How a synchronous invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Resolved(Value),
    Failed(CallError),
    TimedOut,
    Abandoned,
    /// Issued from inside a guarded handler; no result is collected.
    FireAndForget,
}

impl Outcome {
    /// Collapse soft outcomes into `None`, keep hard failures as errors.
    pub fn into_result(self) -> Result<Option<Value>, CallError> {
        match self {
            Outcome::Resolved(value) => Ok(Some(value)),
            Outcome::Failed(error) => Err(error),
            Outcome::TimedOut | Outcome::Abandoned | Outcome::FireAndForget => Ok(None),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }
}

pub struct SyncBridge {
    registry: RefCell<CallbackRegistry>,
    guard: ReentrancyGuard,
    pump: Rc<dyn EventPump>,
}

impl SyncBridge {
    pub fn new(pump: Rc<dyn EventPump>) -> Self {
        Self::with_registry(pump, CallbackRegistry::new())
    }

    pub fn with_registry(pump: Rc<dyn EventPump>, registry: CallbackRegistry) -> Self {
        Self {
            registry: RefCell::new(registry),
            guard: ReentrancyGuard::new(),
            pump,
        }
    }

    pub fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }

    pub fn pump(&self) -> &Rc<dyn EventPump> {
        &self.pump
    }

    pub fn in_flight(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn is_registered(&self, id: CallId) -> bool {
        self.registry.borrow().contains(id)
    }

    /// Completion entry point for native callbacks.
    ///
    /// Completions for released or fire-and-forget ids are dropped silently.
    pub fn resolve(&self, id: CallId, result: Result<Value, CallError>) -> bool {
        if id.is_fire_and_forget() {
            trace!(target: "bridge", "discarding fire-and-forget completion");
            return false;
        }
        self.registry.borrow_mut().resolve(id, result)
    }

    /// Issue `submit` and pump until its completion arrives.
    ///
    /// `submit` receives the completion token to pass to the native side.
    /// `is_abandoned` is polled once per iteration and ends the wait early
    /// when the owner has been disposed.
    pub fn invoke_synchronously<S, A>(&self, submit: S, timeout: Duration, is_abandoned: A) -> Outcome
    where
        S: FnOnce(CallId),
        A: Fn() -> bool,
    {
        if self.guard.is_active() {
            debug!(
                target: "bridge",
                depth = self.guard.depth(),
                "synchronous call from a guarded handler, not waiting for the result"
            );
            submit(CallId::FIRE_AND_FORGET);
            return Outcome::FireAndForget;
        }

        let id = match self.register_call() {
            Ok(id) => id,
            Err(err) => {
                error!(target: "bridge", error = %err, "unable to register synchronous call");
                return Outcome::Failed(CallError::operation_failed(err.to_string()));
            }
        };
        let _release = ReleaseOnDrop {
            registry: &self.registry,
            id,
        };

        trace!(target: "bridge", id = %id, ?timeout, "submitting call");
        submit(id);
        let deadline = Instant::now().checked_add(timeout);
        let mut pumps = 0usize;

        loop {
            if is_abandoned() {
                debug!(target: "bridge", id = %id, pumps, "owner disposed while waiting");
                return Outcome::Abandoned;
            }

            if let Some(result) = self.take_completed(id) {
                trace!(target: "bridge", id = %id, pumps, "call completed");
                return match result {
                    Ok(value) => Outcome::Resolved(value),
                    Err(error) => Outcome::Failed(error),
                };
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                if let Some(call) = self.registry.borrow_mut().get_mut(id) {
                    call.mark_timed_out();
                }
                warn!(
                    target: "bridge",
                    id = %id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    pumps,
                    "gave up waiting for a native completion; either the operation is \
                     slower than the timeout or its callback is blocked behind this wait \
                     (a deadlock that the timeout has now broken)"
                );
                return Outcome::TimedOut;
            }

            self.pump.pump_once();
            pumps += 1;
        }
    }

    fn register_call(&self) -> Result<CallId, RegistryError> {
        let mut registry = self.registry.borrow_mut();
        let id = registry.allocate()?;
        registry.register(id, PendingCall::new())?;
        Ok(id)
    }

    fn take_completed(&self, id: CallId) -> Option<Result<Value, CallError>> {
        self.registry
            .borrow_mut()
            .get_mut(id)
            .and_then(PendingCall::take_result)
    }
}

/// Releases the registry entry on every exit path, unwinding included.
struct ReleaseOnDrop<'a> {
    registry: &'a RefCell<CallbackRegistry>,
    id: CallId,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        match self.registry.try_borrow_mut() {
            Ok(mut registry) => {
                registry.release(self.id);
            }
            Err(_) => {
                error!(target: "bridge", id = %self.id, "registry busy, leaking pending call entry");
            }
        }
    }
}
