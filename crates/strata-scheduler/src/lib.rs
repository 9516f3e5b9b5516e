// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operation scheduling for a shared stateful resource and its dependents.
//!
//! All scheduler state lives on one consumer thread. Only the blocking part
//! of a work item runs elsewhere, through a [`Dispatcher`]; its completion
//! comes back to the consumer and drives the next scheduling decision.
//!
//! - [`ResourceScheduler`] gates connection-level work: shared items run
//!   concurrently, exclusive items run alone.
//! - [`DependentScheduler`] runs statement work one item at a time, after
//!   preparation, under a shared lease of its parent.
//! - [`stream`] delivers worker-produced sequences in order, exactly once.

pub mod aggregator;
pub mod dependent;
pub mod dispatch;
pub mod emitter;
pub mod event_loop;
pub mod lifecycle;
pub mod queue;
pub mod reply;
pub mod resource;
pub mod work;

pub use aggregator::{stream, Producer};
pub use dependent::{DependentLease, DependentScheduler, LeasePair};
pub use dispatch::{
    dispatch_with, AfterWork, BlockingWork, Dispatcher, Flow, WakeHandle, WakeHandler,
};
pub use emitter::{Emitter, ErrorChannel, ErrorEvent};
pub use event_loop::EventLoop;
pub use lifecycle::{DependentState, ResourceState};
pub use queue::{Rejection, WorkQueue};
pub use reply::Reply;
pub use resource::{Lease, ResourceScheduler};
pub use work::{Operation, WorkItem};
