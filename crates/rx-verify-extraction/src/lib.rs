//! Adapter for the prescription extraction service.
//!
//! The service itself runs outside this workspace. This crate builds the
//! prompts it is driven with, parses its JSON answers into the core's
//! [`ExtractionBatch`](rx_verify_core::ExtractionBatch), and provides a
//! pattern-based [`MockExtractor`] for tests and offline use.

pub mod extraction;
pub mod prompts;

pub use extraction::*;
pub use prompts::*;
