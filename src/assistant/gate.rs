//! Single-flight guard for the query pipeline

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether a query pipeline is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No query in flight
    Open,
    /// A query holds the token
    Held,
}

/// Admits at most one query at a time
///
/// Rejected callers are not queued; they are expected to tell the user to
/// wait and drop the request.
#[derive(Debug, Clone, Default)]
pub struct ProcessingGate {
    held: Arc<AtomicBool>,
}

impl ProcessingGate {
    /// Create an open gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the token if nobody holds it
    ///
    /// The token reopens the gate when dropped, so every exit path of the
    /// guarded work releases it.
    #[must_use]
    pub fn try_enter(&self) -> Option<ProcessingToken> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                tracing::trace!("processing gate entered");
                ProcessingToken {
                    held: Arc::clone(&self.held),
                }
            })
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> GateState {
        if self.held.load(Ordering::Acquire) {
            GateState::Held
        } else {
            GateState::Open
        }
    }

    /// Whether a query is in flight
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state() == GateState::Held
    }
}

/// Proof of holding the gate
#[derive(Debug)]
#[must_use = "the gate reopens as soon as the token is dropped"]
pub struct ProcessingToken {
    held: Arc<AtomicBool>,
}

impl ProcessingToken {
    /// Release explicitly; equivalent to dropping
    pub fn exit(self) {
        drop(self);
    }
}

impl Drop for ProcessingToken {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
        tracing::trace!("processing gate released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_enter_rejected() {
        let gate = ProcessingGate::new();
        let token = gate.try_enter();
        assert!(token.is_some());
        assert!(gate.try_enter().is_none());
        assert!(gate.try_enter().is_none());
        assert_eq!(gate.state(), GateState::Held);
    }

    #[test]
    fn test_enter_after_exit() {
        let gate = ProcessingGate::new();
        let token = gate.try_enter().unwrap();
        token.exit();

        assert_eq!(gate.state(), GateState::Open);
        assert!(gate.try_enter().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let gate = ProcessingGate::new();
        let other = gate.clone();
        let _token = gate.try_enter().unwrap();
        assert!(other.is_held());
        assert!(other.try_enter().is_none());
    }

    #[test]
    fn test_released_on_panic_unwind() {
        let gate = ProcessingGate::new();
        let inner = gate.clone();
        let result = std::panic::catch_unwind(move || {
            let _token = inner.try_enter().unwrap();
            panic!("pipeline failed");
        });
        assert!(result.is_err());
        assert!(!gate.is_held());
    }
}
