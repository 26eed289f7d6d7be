// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fm-adapters: subprocess plumbing and work-spec runners.
//!
//! The process gateway spawns children in their own process group so an
//! entire tree can be torn down on cancel. Work runners translate a
//! [`fm_core::WorkSpec`] into a concrete subprocess invocation and stream
//! its output back as events.

pub mod local;
pub mod subprocess;
pub mod work;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use local::LocalWorkAdapter;
pub use subprocess::{ChildGroup, SpawnError};
pub use work::{WorkAdapter, WorkEvent, WorkOutcome, WorkRequest};
