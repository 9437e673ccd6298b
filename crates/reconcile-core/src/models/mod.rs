//! Domain models for the reconciliation engine.

mod patient;
mod exam;
mod report;
mod plan;

pub use patient::*;
pub use exam::*;
pub use report::*;
pub use plan::*;
