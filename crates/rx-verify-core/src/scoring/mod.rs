//! Pure scoring functions: confidence tiers and review priority.

mod confidence;
mod triage;

pub use confidence::*;
pub use triage::*;
