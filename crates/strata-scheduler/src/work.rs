// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Work items: one unit of scheduled work plus its exclusivity flag.
//!
//! A work item is owned by a resource queue until it starts. Starting hands
//! it a lease (`L`) from the scheduler that started it; the lease travels
//! with the operation until its completion returns it.

use std::fmt;

use strata_core::StrataError;

use crate::reply::Reply;

/// One schedulable operation.
pub trait Operation<L> {
    /// Starts the operation. Called on the consumer thread with the lease
    /// that must be returned when the operation completes.
    fn begin(self: Box<Self>, lease: L);

    /// Resolves an operation that never started. Returns `true` when an
    /// explicit callback received `err`.
    fn reject(self: Box<Self>, err: StrataError) -> bool;
}

/// The common operation shape: a reply plus a begin function that owns it.
struct Call<T, F> {
    reply: Reply<T>,
    begin: F,
}

impl<T, L, F> Operation<L> for Call<T, F>
where
    F: FnOnce(Reply<T>, L),
{
    fn begin(self: Box<Self>, lease: L) {
        let Call { reply, begin } = *self;
        begin(reply, lease);
    }

    fn reject(self: Box<Self>, err: StrataError) -> bool {
        self.reply.fail(err)
    }
}

/// A queued or running unit of work.
pub struct WorkItem<L> {
    op: Box<dyn Operation<L>>,
    exclusive: bool,
}

impl<L: 'static> WorkItem<L> {
    /// Builds a work item from a reply and the function that starts it.
    pub fn new<T, F>(reply: Reply<T>, exclusive: bool, begin: F) -> Self
    where
        T: 'static,
        F: FnOnce(Reply<T>, L) + 'static,
    {
        Self {
            op: Box::new(Call { reply, begin }),
            exclusive,
        }
    }

    /// Wraps a custom operation.
    pub fn from_operation(op: Box<dyn Operation<L>>, exclusive: bool) -> Self {
        Self { op, exclusive }
    }
}

impl<L> WorkItem<L> {
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub(crate) fn mark_exclusive(&mut self) {
        self.exclusive = true;
    }

    pub(crate) fn begin(self, lease: L) {
        self.op.begin(lease);
    }

    pub(crate) fn reject(self, err: StrataError) -> bool {
        self.op.reject(err)
    }
}

impl<L> fmt::Debug for WorkItem<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}
