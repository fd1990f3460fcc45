use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use super::pending::{CallError, CallId, PendingCall};
use crate::value::Value;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("every callback identifier is in flight")]
    Exhausted,
    #[error("callback identifier {0} is already registered")]
    Duplicate(CallId),
}

/// In-flight calls keyed by the id the native side echoes back.
#[derive(Debug)]
pub struct CallbackRegistry {
    entries: HashMap<CallId, PendingCall>,
    next_id: u32,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(next_id: u32) -> Self {
        Self {
            entries: HashMap::new(),
            next_id: next_id.max(1),
        }
    }

    /// Hand out an id that is not currently a key. Zero is never returned and
    /// the counter wraps back to 1.
    pub fn allocate(&mut self) -> Result<CallId, RegistryError> {
        if self.entries.len() >= u32::MAX as usize {
            return Err(RegistryError::Exhausted);
        }
        loop {
            let id = CallId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.entries.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    pub fn register(&mut self, id: CallId, call: PendingCall) -> Result<(), RegistryError> {
        if id.is_fire_and_forget() || self.entries.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        self.entries.insert(id, call);
        Ok(())
    }

    /// Deliver a completion. Unknown ids belong to calls that were already
    /// released (or never registered) and are ignored.
    pub fn resolve(&mut self, id: CallId, result: Result<Value, CallError>) -> bool {
        match self.entries.get_mut(&id) {
            Some(call) => {
                let accepted = call.complete(result);
                if !accepted {
                    trace!(target: "bridge", id = %id, "ignoring duplicate completion");
                }
                accepted
            }
            None => {
                trace!(target: "bridge", id = %id, "dropping stray completion");
                false
            }
        }
    }

    pub fn release(&mut self, id: CallId) -> Option<PendingCall> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: CallId) -> Option<&PendingCall> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: CallId) -> Option<&mut PendingCall> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
