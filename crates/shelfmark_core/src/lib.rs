//! `shelfmark_core`
//!
//! Core library of Shelfmark, a social reading tracker. It pulls book metadata from Open Library
//! and Project Gutenberg, reconciles it into one canonical catalog, serves daily personalised
//! recommendations and screens user text before it is stored.

pub mod ai;

pub mod config;

pub mod context;

pub mod database;

pub mod moderation;

pub mod recommend;

pub mod reconcile;

pub mod sources;

#[cfg(test)]
mod testing;
