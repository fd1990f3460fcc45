use std::cell::Cell;

/// Counts how deep we are inside handlers the native side is blocked on.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    depth: Cell<u32>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn is_active(&self) -> bool {
        self.depth.get() > 0
    }

    /// Raise the depth until the returned scope is dropped.
    pub fn enter(&self) -> GuardScope<'_> {
        self.depth.set(self.depth.get().saturating_add(1));
        GuardScope { guard: self }
    }

    /// Run `f` with the depth raised. The depth is restored on unwind too.
    pub fn scope<T>(&self, f: impl FnOnce() -> T) -> T {
        let _scope = self.enter();
        f()
    }
}

#[must_use = "the guard is released as soon as the scope is dropped"]
pub struct GuardScope<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        let depth = self.guard.depth.get();
        self.guard.depth.set(depth.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn nests_and_unwinds() {
        let guard = ReentrancyGuard::new();
        assert!(!guard.is_active());
        guard.scope(|| {
            assert_eq!(guard.depth(), 1);
            guard.scope(|| assert_eq!(guard.depth(), 2));
            assert_eq!(guard.depth(), 1);
        });
        assert_eq!(guard.depth(), 0);
    }

    #[test]
    fn restores_depth_when_handler_panics() {
        let guard = ReentrancyGuard::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            guard.scope(|| panic!("listener failed"));
        }));
        assert!(result.is_err());
        assert_eq!(guard.depth(), 0);
    }
}
