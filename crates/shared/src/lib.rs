#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Bazaar Shared Types and Utilities
//!
//! Domain identifiers and enums shared by the billing core and the API server,
//! plus the Postgres pool helpers.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
