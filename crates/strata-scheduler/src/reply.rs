// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-operation completion context.

use std::fmt;

use strata_core::StrataError;

type Callback<T> = Box<dyn FnOnce(Result<T, StrataError>)>;

/// The completion side of one scheduled operation.
///
/// A `Reply` either carries an explicit callback or is empty. Empty replies
/// matter to the scheduler: errors that cannot be delivered to a callback are
/// raised on the owning resource's error channel instead.
#[must_use = "a reply must be sent or handed to the scheduler"]
pub struct Reply<T> {
    callback: Option<Callback<T>>,
}

impl<T> Reply<T> {
    /// A reply that invokes `f` with the operation's outcome.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<T, StrataError>) + 'static,
    {
        Self {
            callback: Some(Box::new(f)),
        }
    }

    /// A reply without a callback.
    pub fn none() -> Self {
        Self { callback: None }
    }

    pub fn is_some(&self) -> bool {
        self.callback.is_some()
    }

    /// Delivers `result` to the callback.
    ///
    /// Returns the error back when there was no callback to take it, so the
    /// caller can route it to the resource's error channel.
    pub fn send(self, result: Result<T, StrataError>) -> Option<StrataError> {
        match (self.callback, result) {
            (Some(callback), result) => {
                callback(result);
                None
            }
            (None, Ok(_)) => None,
            (None, Err(err)) => Some(err),
        }
    }

    /// Resolves with `err`. Returns `true` when an explicit callback received it.
    pub fn fail(self, err: StrataError) -> bool {
        match self.callback {
            Some(callback) => {
                callback(Err(err));
                true
            }
            None => false,
        }
    }
}

impl<T> Default for Reply<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("has_callback", &self.is_some())
            .finish()
    }
}
