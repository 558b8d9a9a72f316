// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Represents the current cancel state.
#[derive(PartialEq, Clone, Copy, Debug)]
enum CancelState {
    Untouched,
    Cancelled,
}

type CancelAction = Arc<dyn Fn(Option<f64>) + Send + Sync>;

/// A cancel handle is returned when a note or scheduled event is started. Cancelling it
/// runs the owner's cancel action; cancelling more than once runs it again, which owners
/// must tolerate.
#[derive(Clone)]
pub struct CancelHandle {
    /// Whether cancel has been called at least once.
    cancelled: Arc<Mutex<CancelState>>,
    /// What to do on cancel. Receives the optional stop time.
    action: CancelAction,
}

impl CancelHandle {
    /// Creates a new cancel handle running the given action.
    pub fn new<F>(action: F) -> CancelHandle
    where
        F: Fn(Option<f64>) + Send + Sync + 'static,
    {
        CancelHandle {
            cancelled: Arc::new(Mutex::new(CancelState::Untouched)),
            action: Arc::new(action),
        }
    }

    /// Creates a cancel handle that does nothing.
    pub fn noop() -> CancelHandle {
        CancelHandle::new(|_| {})
    }

    /// Returns true if the handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock() == CancelState::Cancelled
    }

    /// Cancels now.
    pub fn cancel(&self) {
        self.cancel_at(None);
    }

    /// Cancels at the given context time, or now if absent.
    pub fn cancel_at(&self, time: Option<f64>) {
        *self.cancelled.lock() = CancelState::Cancelled;
        (self.action)(time);
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_cancel_handle_cancelled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel_handle = {
            let calls = calls.clone();
            CancelHandle::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(!cancel_handle.is_cancelled());

        cancel_handle.clone().cancel();
        assert!(cancel_handle.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_handle_passes_time() {
        let seen = Arc::new(Mutex::new(None));
        let cancel_handle = {
            let seen = seen.clone();
            CancelHandle::new(move |time| *seen.lock() = time)
        };

        cancel_handle.cancel_at(Some(2.5));
        assert_eq!(*seen.lock(), Some(2.5));
    }

    #[test]
    fn test_noop() {
        let cancel_handle = CancelHandle::noop();
        cancel_handle.cancel();
        assert!(cancel_handle.is_cancelled());
    }
}
