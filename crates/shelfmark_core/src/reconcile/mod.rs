//! Reconciliation of source candidates into the canonical store
//!
//! Candidates are matched against canonical books by normalized title, scoped to the
//! author when one is known, and merged field by field into the oldest match. Authors
//! are matched by external key, then by name gated on birth year. The bulk fetch walks
//! an author's whole catalog with bounded concurrency and persists sequentially.

pub mod bulk;
pub mod engine;
pub mod errors;
pub mod import;
pub mod merge;
pub mod normalize;
pub mod policy;
