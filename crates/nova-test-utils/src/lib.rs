//! Utilities shared by Nova edit-and-continue tests.
//!
//! - [`mocks`]: scripted analyzer, delta emitter, debugger and baseline
//!   provider doubles implementing the `nova-enc` service traits.
//! - [`fixtures`]: source fixtures with `<AS:N>` active statement markers and
//!   helpers for building debugger records and solutions from them.

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
