// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outcome recorders for assertions on callback order and content.

use std::cell::RefCell;
use std::rc::Rc;

use strata_core::StrataError;
use strata_scheduler::{Emitter, Reply};

/// Captures tagged operation outcomes in the order callbacks fired.
pub struct Recorder<T> {
    entries: Rc<RefCell<Vec<(String, Result<T, StrataError>)>>>,
}

impl<T: 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            entries: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A reply that records its outcome under `tag`.
    pub fn reply(&self, tag: impl Into<String>) -> Reply<T> {
        let entries = Rc::clone(&self.entries);
        let tag = tag.into();
        Reply::new(move |result| entries.borrow_mut().push((tag, result)))
    }

    /// Tags in callback order.
    pub fn tags(&self) -> Vec<String> {
        self.entries.borrow().iter().map(|(tag, _)| tag.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// How many callbacks fired for `tag`.
    pub fn count(&self, tag: &str) -> usize {
        self.entries.borrow().iter().filter(|(t, _)| t == tag).count()
    }

    /// The error recorded for `tag`, if its outcome was an error.
    pub fn error(&self, tag: &str) -> Option<StrataError> {
        self.entries
            .borrow()
            .iter()
            .find(|(t, _)| t == tag)
            .and_then(|(_, result)| result.as_ref().err().cloned())
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<(String, Result<T, StrataError>)> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }
}

impl<T: Clone + 'static> Recorder<T> {
    /// The value recorded for `tag`, if its outcome was a success.
    pub fn value(&self, tag: &str) -> Option<T> {
        self.entries
            .borrow()
            .iter()
            .find(|(t, _)| t == tag)
            .and_then(|(_, result)| result.as_ref().ok().cloned())
    }
}

impl<T: 'static> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Rc::clone(&self.entries),
        }
    }
}

/// Registers a listener on `emitter` that keeps a copy of every event.
pub fn capture<E: Clone + 'static>(emitter: &Emitter<E>) -> Rc<RefCell<Vec<E>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    emitter.on(move |event: &E| sink.borrow_mut().push(event.clone()));
    events
}
