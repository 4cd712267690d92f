//! Fixtures shared by the unit tests

mod delivery;
mod fixtures;

pub use delivery::*;
pub use fixtures::*;
