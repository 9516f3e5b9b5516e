// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle records for resources and dependent resources.
//!
//! These are plain `Copy` values. Schedulers read them, compute the next
//! state, and write them back, so no borrow is ever held across a callback.

/// Connection-level lifecycle record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceState {
    /// The open transition completed successfully and no close has completed.
    pub open: bool,
    /// An exclusive operation is in flight, or the resource is permanently closed.
    pub locked: bool,
    /// Shared operations currently running.
    pub pending: usize,
    /// Every operation is treated as exclusive.
    pub serialize: bool,
}

impl ResourceState {
    /// Permanently closed: either closed normally or failed to open.
    pub fn is_closed(&self) -> bool {
        !self.open && self.locked
    }

    /// Whether a submission with the given (effective) exclusivity has to
    /// wait in the queue.
    pub fn must_queue(&self, exclusive: bool) -> bool {
        !self.open || self.locked || ((exclusive || self.serialize) && self.pending > 0)
    }

    /// Whether queued work may be started at all.
    pub fn admits_drain(&self) -> bool {
        self.open && !self.locked
    }
}

/// Statement-level lifecycle record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependentState {
    /// Preparation succeeded. Never reset, so it also records whether the
    /// resource was ever usable.
    pub prepared: bool,
    pub finalized: bool,
    /// An operation on this statement is in flight.
    pub locked: bool,
}

impl DependentState {
    pub fn must_queue(&self) -> bool {
        !self.prepared || self.locked
    }
}
