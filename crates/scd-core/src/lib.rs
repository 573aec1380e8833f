//! Core types and algorithms for historised (SCD2) dimensions.
//!
//! This crate is deliberately free of database and CLI dependencies. It turns
//! attribute snapshots into versioning deltas and attaches the historically
//! correct dimension version to fact rows. Persistence lives behind
//! [`store::DimensionStore`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod config;
pub mod detect;
pub mod error;
pub mod guard;
pub mod hash;
pub mod join;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod stats;
pub mod store;
pub mod version;

pub use error::{Error, Result};
