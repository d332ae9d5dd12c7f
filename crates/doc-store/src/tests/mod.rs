//! Contract tests for the in-memory document store.
//!
//! - `contract.rs` - Rules 1-8 (store contract seen through `dyn DocumentStore`)
