// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Strata.
//!
//! # Components
//!
//! - [`ManualDispatcher`] - dispatcher whose jobs run only when the test says so
//! - [`Recorder`] - captures tagged callback outcomes in firing order
//! - [`capture`] - copies every event an emitter raises
//! - [`TempDatabase`] - database path in a self-deleting temp directory

pub mod manual_dispatcher;
pub mod recorder;
pub mod temp;

pub use manual_dispatcher::ManualDispatcher;
pub use recorder::{capture, Recorder};
pub use temp::TempDatabase;
