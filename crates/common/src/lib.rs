//! Shared error helpers used across all podshim crates.

pub mod error;

pub use error::{Aggregate, FromMessage};
