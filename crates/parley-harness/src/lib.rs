//! Deterministic simulation harness for Parley testing.
//!
//! - [`SimEnv`]: seeded ChaCha RNG and a virtual wall clock, so nonces,
//!   random keys and conversation ids are reproducible
//! - [`SimFeed`]: in-memory remote feed with fault injection (offline, error
//!   statuses, slow fetches) and a peer that can post messages
//!
//! Both are `Clone` and share state between clones, so a test can keep a
//! handle while the code under test owns another.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_env;
pub mod sim_feed;

pub use sim_env::SimEnv;
pub use sim_feed::SimFeed;
