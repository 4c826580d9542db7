//! Document Generation Unit.

pub mod error;
pub mod unit;

pub use error::GenerationError;
pub use unit::{DocumentGenerator, UnitRequest};
