//! Per-stream lifecycle bookkeeping.

use std::sync::atomic::{AtomicU8, Ordering};

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const COMPLETED: u8 = 2;
const FAILED: u8 = 3;

/// Lifecycle state of one outstanding response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Active,
    /// The peer reported itself unhealthy, or cancelled the stream. A
    /// planned termination, not a fault.
    Cancelled,
    /// The generator exhausted its element cap.
    Completed,
    /// Transport or serialization fault on this stream.
    Failed,
}

/// Bookkeeping object tracking one response stream's lifecycle.
///
/// Transitions are monotonic: exactly one terminal transition ever
/// succeeds, decided by a compare-and-swap, so `Cancelled` and `Completed`
/// are mutually exclusive even when the race between the generator and the
/// health monitor resolves on the same tick.
#[derive(Debug)]
pub struct StreamHandle {
    id: u64,
    state: AtomicU8,
}

impl StreamHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(ACTIVE),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        match self.state.load(Ordering::Acquire) {
            CANCELLED => StreamState::Cancelled,
            COMPLETED => StreamState::Completed,
            FAILED => StreamState::Failed,
            _ => StreamState::Active,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.load(Ordering::Acquire) != ACTIVE
    }

    /// Marks the stream cancelled. Returns whether this call won the
    /// terminal transition.
    pub fn cancel(&self) -> bool {
        self.finish(CANCELLED)
    }

    /// Marks the stream completed. Returns whether this call won the
    /// terminal transition.
    pub fn complete(&self) -> bool {
        self.finish(COMPLETED)
    }

    /// Marks the stream failed. Returns whether this call won the terminal
    /// transition.
    pub fn fail(&self) -> bool {
        self.finish(FAILED)
    }

    fn finish(&self, terminal: u8) -> bool {
        self.state
            .compare_exchange(ACTIVE, terminal, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_terminal_transition_wins() {
        let handle = StreamHandle::new(1);
        assert_eq!(handle.state(), StreamState::Active);
        assert!(handle.cancel());
        assert_eq!(handle.state(), StreamState::Cancelled);

        // Terminal states are mutually exclusive and never overwritten.
        assert!(!handle.complete());
        assert!(!handle.fail());
        assert!(!handle.cancel());
        assert_eq!(handle.state(), StreamState::Cancelled);
    }

    #[test]
    fn completion_is_terminal() {
        let handle = StreamHandle::new(2);
        assert!(handle.complete());
        assert!(handle.is_terminal());
        assert!(!handle.cancel());
        assert_eq!(handle.state(), StreamState::Completed);
    }
}
