//! Benchmark support utilities
//!
//! Provides metrics collection and Markdown report generation for load
//! tests against the replay engine and step runner.

mod metrics;
mod report;
mod runner;

pub use metrics::{BenchmarkMetrics, LatencyHistogram, ThroughputCounter};
pub use report::{BenchmarkReport, ReportConfig};
pub use runner::{BenchmarkRunner, BenchmarkScenario, ScenarioConfig, StepDuration};
