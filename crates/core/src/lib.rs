//! Assistive Store Core - cart domain types.
//!
//! Shared by the cart state manager (`assistive-store-cart`) and the
//! `as-cart` command-line tool. Everything here is plain data plus the pure
//! operations on it (merging, line lookup, totals); storage, HTTP and
//! connectivity live in the cart crate.
//!
//! # Modules
//!
//! - [`types`] - Product and action IDs, prices, cart lines, mutations and
//!   queued actions

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
