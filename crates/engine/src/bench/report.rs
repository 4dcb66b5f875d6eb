//! Markdown benchmark report generation.
//!
//! Grounded on the same `BenchmarkMetrics` the teacher's HTML report read
//! from, but rendered as a plain Markdown table instead of templated HTML
//! with embedded charts — `minijinja` was never part of this workspace's
//! dependency stack (dropped, see DESIGN.md), and a worker binary's
//! benchmark run has no browser to open a chart in anyway.

use std::fs;
use std::path::Path;

use super::metrics::BenchmarkMetrics;

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: String,
    pub title: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: "target/benchmark-reports".to_string(),
            title: "Benchmark Report".to_string(),
        }
    }
}

pub struct BenchmarkReport {
    config: ReportConfig,
}

impl BenchmarkReport {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    /// Writes the report to `<output_dir>/benchmark_<name>_<timestamp>.md`
    /// and returns the path written.
    pub fn generate(&self, metrics: &BenchmarkMetrics) -> std::io::Result<String> {
        let output_dir = Path::new(&self.config.output_dir);
        fs::create_dir_all(output_dir)?;

        let filename = format!(
            "benchmark_{}_{}.md",
            metrics.name.replace(' ', "_").to_lowercase(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let output_path = output_dir.join(&filename);

        let markdown = self.render_markdown(metrics);
        fs::write(&output_path, &markdown)?;

        let absolute_path = output_path.canonicalize().unwrap_or(output_path);
        Ok(absolute_path.to_string_lossy().to_string())
    }

    fn render_markdown(&self, metrics: &BenchmarkMetrics) -> String {
        let s2s = metrics.schedule_to_start.summary();
        let exec = metrics.execution.summary();
        let e2e = metrics.end_to_end.summary();

        let mut out = String::new();
        out.push_str(&format!("# {} — {}\n\n", self.config.title, metrics.name));
        out.push_str(&format!("Duration: {:.2}s\n\n", metrics.elapsed().as_secs_f64()));
        out.push_str(&format!("- Total tasks: {}\n", metrics.tasks_completed.total()));
        out.push_str(&format!("- Throughput: {:.1} tasks/sec\n", metrics.tasks_completed.throughput()));
        out.push_str(&format!("- Peak memory: {:.1} MB\n", metrics.resources.peak_memory_mb()));
        out.push_str(&format!("- Avg CPU: {:.1}%\n\n", metrics.resources.avg_cpu_percent()));

        out.push_str("| Metric | Count | Mean (ms) | Min | P50 | P95 | P99 | Max |\n");
        out.push_str("|---|---|---|---|---|---|---|---|\n");
        for (label, summary) in [("Schedule → Start", &s2s), ("Execution", &exec), ("End-to-End", &e2e)] {
            out.push_str(&format!(
                "| {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |\n",
                label,
                summary.count,
                summary.mean.as_secs_f64() * 1000.0,
                summary.min.as_secs_f64() * 1000.0,
                summary.p50.as_secs_f64() * 1000.0,
                summary.p95.as_secs_f64() * 1000.0,
                summary.p99.as_secs_f64() * 1000.0,
                summary.max.as_secs_f64() * 1000.0,
            ));
        }

        let mut step_summaries: Vec<_> = metrics.step_summaries().into_iter().collect();
        if !step_summaries.is_empty() {
            step_summaries.sort_by(|a, b| a.0.cmp(&b.0));
            out.push_str("\n## Per-step latency\n\n");
            out.push_str("| Step | Count | Mean (ms) | P50 | P95 | P99 |\n");
            out.push_str("|---|---|---|---|---|---|\n");
            for (step_name, summary) in step_summaries {
                out.push_str(&format!(
                    "| {} | {} | {:.2} | {:.2} | {:.2} | {:.2} |\n",
                    step_name,
                    summary.count,
                    summary.mean.as_secs_f64() * 1000.0,
                    summary.p50.as_secs_f64() * 1000.0,
                    summary.p95.as_secs_f64() * 1000.0,
                    summary.p99.as_secs_f64() * 1000.0,
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_markdown_table_with_the_three_latency_rows() {
        let metrics = BenchmarkMetrics::new("smoke");
        metrics.end_to_end.record(std::time::Duration::from_millis(5));
        let report = BenchmarkReport::new(ReportConfig::default());
        let markdown = report.render_markdown(&metrics);
        assert!(markdown.contains("End-to-End"));
        assert!(markdown.contains("smoke"));
    }
}
