//! Readiness multiplexing for pktwire endpoints.
//!
//! A [`Selector`] co-owns a set of endpoints and, on each
//! [`poll`](Selector::poll), fills caller-owned [`ReadySets`] with the ones
//! that are readable, writable or faulty.

#[cfg(not(unix))]
compile_error!("pktwire-select currently supports Unix platforms only");

pub mod error;
pub mod selector;

pub use error::{Result, SelectError};
pub use selector::{PollOutcome, ReadySets, Selector, SelectorConfig};
