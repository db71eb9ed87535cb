//! # Control Execution
//!
//! - [`selection`]: control id / `/regex/` filters applied before running
//! - [`assertion`]: evaluation of one assertion against a resource or table
//! - [`runner`]: declaration-order execution with per-test fault isolation

pub mod assertion;
pub mod runner;
pub mod selection;

pub use assertion::{evaluate, Outcome, Subject};
pub use runner::ControlRunner;
pub use selection::ControlSelector;
