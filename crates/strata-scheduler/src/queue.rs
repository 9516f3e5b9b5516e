// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FIFO of pending work items attached to one resource.

use std::collections::VecDeque;

use strata_core::StrataError;

use crate::work::WorkItem;

/// How a batch of queued items was resolved by [`WorkQueue::reject_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rejection {
    /// Number of items removed from the queue.
    pub resolved: usize,
    /// Whether at least one explicit callback received the error.
    pub delivered: bool,
}

impl Rejection {
    /// `true` when items were resolved but none had a callback, i.e. the
    /// error still needs to surface on the resource's own error channel.
    pub fn needs_shared_error(&self) -> bool {
        self.resolved > 0 && !self.delivered
    }
}

/// Arrival-ordered queue of work items.
pub struct WorkQueue<L> {
    items: VecDeque<WorkItem<L>>,
}

impl<L> WorkQueue<L> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: WorkItem<L>) {
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<WorkItem<L>> {
        self.items.pop_front()
    }

    /// Exclusivity of the head item, if any.
    pub fn peek_exclusive(&self) -> Option<bool> {
        self.items.front().map(WorkItem::is_exclusive)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes every item, oldest first.
    pub fn take_all(&mut self) -> VecDeque<WorkItem<L>> {
        std::mem::take(&mut self.items)
    }
}

impl<L> Default for WorkQueue<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves every item of `items` with `err`, in arrival order.
///
/// Takes the items out of the queue first so callbacks that submit new work
/// never observe a half-drained queue.
pub fn reject_all<L>(items: VecDeque<WorkItem<L>>, err: &StrataError) -> Rejection {
    let mut rejection = Rejection::default();
    for item in items {
        rejection.resolved += 1;
        if item.reject(err.clone()) {
            rejection.delivered = true;
        }
    }
    rejection
}

/// Drops every item without resolving it.
pub fn discard_all<L>(items: VecDeque<WorkItem<L>>) -> usize {
    items.len()
}
