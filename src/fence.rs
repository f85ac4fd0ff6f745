// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Fences let the recording thread wait for the driver thread to catch up.
//!
//! The stream itself is asynchronous; a fence is the synchronous drain on top of it.  The
//! recording side registers a continuation under a fresh [FenceId] and records a
//! [crate::command::Command::Fence].  When the driver thread reaches that command it calls
//! [crate::driver::Driver::finish] and then signals the fence.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one fence within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(u64);

impl FenceId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        FenceId(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// How a fence completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FenceStatus {
    /// Everything recorded before the fence has executed and the backend is idle.
    Signaled,
    /// The stream shut down before the fence command executed.
    Abandoned,
}

/// Pending fences, shared between the recording and driver threads.
pub struct FenceRegistry {
    next: AtomicU64,
    pending: wasm_safe_mutex::Mutex<HashMap<FenceId, r#continue::Sender<FenceStatus>>>,
}

impl std::fmt::Debug for FenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FenceRegistry")
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl FenceRegistry {
    pub fn new() -> Self {
        FenceRegistry {
            next: AtomicU64::new(1),
            pending: wasm_safe_mutex::Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new fence.  The future resolves once the fence is signaled or abandoned.
    pub fn register(&self) -> (FenceId, impl Future<Output = FenceStatus> + use<>) {
        let id = FenceId(self.next.fetch_add(1, Ordering::Relaxed));
        let (sender, future) = r#continue::continuation();
        self.pending.lock_sync().insert(id, sender);
        (id, future)
    }

    /// Completes a fence.  Returns false if it was not pending.
    pub fn signal(&self, id: FenceId) -> bool {
        let sender = self.pending.lock_sync().remove(&id);
        match sender {
            Some(sender) => {
                sender.send(FenceStatus::Signaled);
                true
            }
            None => false,
        }
    }

    /// Resolves every pending fence as [FenceStatus::Abandoned].
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock_sync().drain().collect();
        let count = drained.len();
        for (_, sender) in drained {
            sender.send(FenceStatus::Abandoned);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock_sync().len()
    }
}

impl Default for FenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FenceRegistry {
    fn drop(&mut self) {
        self.abandon_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_resolves_future() {
        let registry = FenceRegistry::new();
        let (id, future) = registry.register();
        assert_eq!(registry.pending_count(), 1);
        assert!(registry.signal(id));
        assert!(!registry.signal(id));
        assert_eq!(test_executors::sleep_on(future), FenceStatus::Signaled);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn abandon_resolves_everything() {
        let registry = FenceRegistry::new();
        let (a, first) = registry.register();
        let (b, second) = registry.register();
        assert_ne!(a, b);
        assert_eq!(registry.abandon_all(), 2);
        assert_eq!(test_executors::sleep_on(first), FenceStatus::Abandoned);
        assert_eq!(test_executors::sleep_on(second), FenceStatus::Abandoned);
    }

    #[test]
    fn dropping_registry_abandons() {
        let registry = FenceRegistry::new();
        let (_, future) = registry.register();
        drop(registry);
        assert_eq!(test_executors::sleep_on(future), FenceStatus::Abandoned);
    }
}
