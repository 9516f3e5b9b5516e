// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Listener registry used as a resource's event and error channel.

use std::cell::RefCell;
use std::fmt;

use strata_core::StrataError;

type Listener<E> = Box<dyn FnMut(&E)>;

/// Events that can carry an error.
pub trait ErrorEvent {
    fn from_error(err: StrataError) -> Self;
}

impl ErrorEvent for StrataError {
    fn from_error(err: StrataError) -> Self {
        err
    }
}

/// Where errors without an explicit per-call callback go.
pub trait ErrorChannel {
    fn emit_error(&self, err: StrataError);
}

/// A consumer-thread event emitter.
///
/// Listeners run in registration order. Listeners added while an emit is in
/// progress start receiving events with the next emit.
pub struct Emitter<E> {
    label: String,
    listeners: RefCell<Vec<Listener<E>>>,
}

impl<E> Emitter<E> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn on<F>(&self, listener: F)
    where
        F: FnMut(&E) + 'static,
    {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Calls every listener with `event`. Returns how many were called.
    pub fn emit(&self, event: &E) -> usize {
        let mut running = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in running.iter_mut() {
            listener(event);
        }
        let called = running.len();

        let mut slot = self.listeners.borrow_mut();
        let added = std::mem::take(&mut *slot);
        running.extend(added);
        *slot = running;
        called
    }
}

impl<E: ErrorEvent> ErrorChannel for Emitter<E> {
    fn emit_error(&self, err: StrataError) {
        let code = err.code();
        let message = err.to_string();
        if self.emit(&E::from_error(err)) == 0 {
            tracing::error!(resource = %self.label, code, error = %message, "unhandled error event");
        }
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("label", &self.label)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use tracing_test::traced_test;

    #[test]
    fn listeners_run_in_order() {
        let emitter: Emitter<u32> = Emitter::new("test");
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Rc::clone(&seen);
            emitter.on(move |n| seen.borrow_mut().push(format!("{tag}{n}")));
        }
        assert_eq!(emitter.emit(&1), 2);
        assert_eq!(*seen.borrow(), vec!["a1", "b1"]);
    }

    #[test]
    fn listener_added_during_emit_sees_next_event() {
        let emitter: Rc<Emitter<u32>> = Rc::new(Emitter::new("test"));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let inner_emitter = Rc::clone(&emitter);
        let inner_seen = Rc::clone(&seen);
        let mut added = false;
        emitter.on(move |_| {
            if !added {
                added = true;
                let seen = Rc::clone(&inner_seen);
                inner_emitter.on(move |n| seen.borrow_mut().push(*n));
            }
        });
        emitter.emit(&1);
        emitter.emit(&2);
        assert_eq!(*seen.borrow(), vec![2]);
        assert_eq!(emitter.listener_count(), 2);
    }

    #[test]
    fn error_channel_delivers_to_listeners() {
        let emitter: Emitter<StrataError> = Emitter::new("stmt");
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        emitter.on(move |err| {
            assert!(matches!(err, StrataError::AlreadyFinalized));
            *sink.borrow_mut() += 1;
        });
        emitter.emit_error(StrataError::AlreadyFinalized);
        assert_eq!(*count.borrow(), 1);
    }

    #[traced_test]
    #[test]
    fn unhandled_error_is_logged() {
        let emitter: Emitter<StrataError> = Emitter::new("orphan");
        emitter.emit_error(StrataError::ResourceClosed);
        assert!(logs_contain("unhandled error event"));
        assert!(logs_contain("SQLITE_MISUSE"));
    }
}
