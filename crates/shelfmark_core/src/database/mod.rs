//! Canonical store
//!
//! Exposes the `Db` handle and the pre-defined queries that the reconciliation engine,
//! the recommendation pipeline and the shelf writer run against it. Every query is
//! generic over the executor, so callers decide whether it runs on the pool or inside
//! a transaction.
pub mod queries;
pub mod types;
