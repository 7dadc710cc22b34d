//! Domain models for the prescription verification workflow.

mod decision;
mod prescription;
mod product;

pub use decision::*;
pub use prescription::*;
pub use product::*;
