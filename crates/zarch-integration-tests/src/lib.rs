//! Integration test crate for the zarch registry.
//!
//! This crate has no library code. Its tests drive `zarch-db` through its
//! public API against real files: store round trips, identifier resolution,
//! migration and backup behaviour, and adoption of registries written before
//! migrations were tracked.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p zarch-integration-tests
//! ```
