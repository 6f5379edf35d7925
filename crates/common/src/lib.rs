//! Shared error taxonomy for the parley workspace.

pub mod error;

pub use error::{Error, Result};
