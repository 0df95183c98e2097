//! Personalized recommendations
//!
//! A user's list is rebuilt at most once per day. The candidate pool is every
//! canonical book the user has not finished or started, split into display-quality
//! tiers. AI suggestions are fuzzy-matched onto the better tiers and the remaining
//! slots are filled in tier order.

pub mod cache;
pub mod fuzzy;
pub mod pipeline;
