//! Host-side driver for the external scenario runtime: single executions,
//! repeated performance monitoring, and output validation.

pub mod error;
pub mod monitor;
pub mod runner;
pub mod validate;

pub use error::RunnerError;
pub use monitor::{Monitor, MonitorConfig, Report, Sample, Summary};
pub use runner::{parse_metrics, ExitReason, Execution, Metrics, ScenarioRunner, DEFAULT_PROGRAM};
pub use validate::{compare, compare_files, Tolerance, ValidationStatus};
