//! Academic rule resolution and student lifecycle workflows.
//!
//! Rules flow from the [`rules`] store through the [`rules::RuleEngine`] into the result
//! evaluator, promotion engine, and transfer engine found under [`academics`]. Persistence,
//! time, and auditing are injected through traits so any host (web, CLI, batch) can drive the
//! same workflows.

pub mod academics;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod rules;
pub mod telemetry;

pub use error::{AppError, ErrorKind};
