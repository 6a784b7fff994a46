//! Core types, constants, errors and collaborator traits.
//!
//! This module has no I/O of its own.

mod constants;
mod error;
mod payload;
mod traits;

pub use constants::*;
pub use error::*;
pub use payload::*;
pub use traits::*;
