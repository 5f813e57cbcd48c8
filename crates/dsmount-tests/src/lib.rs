//! dsmount Test & Validation
//!
//! Drives the supervisor against real `/bin/sh` worker stubs: retry bounds,
//! fatal errors, cleanup escalation, teardown, and full mount lifecycles.

pub mod harness;

#[cfg(test)]
mod retry_tests;

pub use harness::{CountingLauncher, StubBehavior, StuckReset, TestEnv};
