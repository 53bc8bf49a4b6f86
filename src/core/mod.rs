//! Core types shared by every layer: constants, errors and the state machine
//! trait.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
