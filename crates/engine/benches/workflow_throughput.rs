//! Replay engine + step runner throughput benchmark.
//!
//! Trimmed from the teacher's three scenarios (raw task throughput, full
//! workflow-completion throughput, and per-worker claim contention) to one
//! representative scenario: many runs, each driving a handful of
//! sequential steps through a `Scheduler` backed by the in-memory store and
//! queue. The claim-contention scenario has no direct analogue once steps
//! are addressed by correlation id inside a run rather than a claimed-task
//! row id — see DESIGN.md.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use durable_orchestrator::bench::{BenchmarkReport, BenchmarkRunner, BenchmarkScenario, ReportConfig, ScenarioConfig, StepDuration};
use durable_orchestrator::codec::{CodecBuilder, Value};
use durable_orchestrator::crypto::NoopEncryptor;
use durable_orchestrator::manifest::Manifest;
use durable_orchestrator::orchestration::{Orchestrator, OrchestrationContext, OrchestratorError};
use durable_orchestrator::queue::InMemoryQueue;
use durable_orchestrator::scheduler::{Scheduler, WORKFLOW_QUEUE_PREFIX};
use durable_orchestrator::step::{always_fatal, StepError, StepHandler, StepOptions};
use durable_orchestrator::storage::{EventStore, InMemoryEventStore};
use durable_orchestrator::views::RunStatus;
use durable_orchestrator::{RunId, WorkflowName};

/// A step handler whose latency is drawn from [`StepDuration`]'s weighted
/// fast/medium/slow/very-long distribution, scaled down by
/// `SIMULATED_STEP_SCALE` so a 1000-run benchmark still finishes inside
/// `max_duration` instead of spending most of its wall clock asleep.
struct SimulatedStep;

const SIMULATED_STEP_SCALE: u32 = 1000;

#[async_trait]
impl StepHandler for SimulatedStep {
    async fn call(&self, _args: Value) -> Result<Value, StepError> {
        tokio::time::sleep(StepDuration::sample() / SIMULATED_STEP_SCALE).await;
        Ok(Value::Null)
    }
}

#[derive(Serialize, Deserialize)]
struct ChainInput {
    steps: u32,
}

#[derive(Serialize, Deserialize)]
struct ChainOutput {
    completed: u32,
}

/// Runs `steps` sequential no-op steps, one replay pass per step.
struct Chain;

#[async_trait]
impl Orchestrator for Chain {
    const TYPE: &'static str = "bench_chain";
    type Input = ChainInput;
    type Output = ChainOutput;

    async fn run(&self, ctx: &OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestratorError> {
        for _ in 0..input.steps {
            ctx.step("noop", Value::Null).await?;
        }
        Ok(ChainOutput { completed: input.steps })
    }
}

struct ChainScenario {
    scheduler: Arc<Scheduler>,
    store: Arc<InMemoryEventStore>,
    steps_per_run: u32,
}

impl ChainScenario {
    fn new(steps_per_run: u32) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let codec = Arc::new(CodecBuilder::with_defaults().build());

        let (orchestrators, steps, _) = Manifest::new()
            .register_orchestrator(Chain)
            .register_step("noop", SimulatedStep)
            .build();

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            queue,
            codec,
            Arc::new(NoopEncryptor),
            orchestrators,
            steps,
            StepOptions::new(always_fatal),
            "bench",
        ));

        Self { scheduler, store, steps_per_run }
    }

    /// Drives one run from start to completion, claiming workflow/step
    /// messages in turn until `run.status` is terminal or the step budget
    /// is exhausted (guards against an infinite loop if replay never
    /// suspends/completes as expected).
    async fn drive_to_completion(&self, run_id: RunId) {
        let budget = self.steps_per_run as usize * 2 + 4;
        for _ in 0..budget {
            let run = self.store.runs_get(run_id).await.unwrap();
            if run.status != RunStatus::Running {
                return;
            }
            self.scheduler.poll_workflows(WORKFLOW_QUEUE_PREFIX, 1).await.unwrap();
            self.scheduler.poll_steps(1).await.unwrap();
        }
    }
}

impl BenchmarkScenario for ChainScenario {
    async fn setup(&self) {}

    async fn execute_run(&self, run_id: RunId) -> (Duration, Duration) {
        let codec = CodecBuilder::with_defaults().build();
        let input = codec.encode(&Value::Int(self.steps_per_run as i64)).unwrap();

        let enqueue_start = Instant::now();
        self.scheduler
            .start_run(run_id, WorkflowName::new("bench_chain"), input)
            .await
            .unwrap();
        let schedule_to_start = enqueue_start.elapsed();

        let exec_start = Instant::now();
        self.drive_to_completion(run_id).await;
        let execution_time = exec_start.elapsed();

        (schedule_to_start, execution_time)
    }

    async fn cleanup(&self) {}
}

async fn run_chain_benchmark(name: &str, workflows: u64, steps_per_run: u32, workers: usize) -> Arc<durable_orchestrator::bench::BenchmarkMetrics> {
    let scenario = Arc::new(ChainScenario::new(steps_per_run));
    let runner = BenchmarkRunner::new(ScenarioConfig {
        name: name.to_string(),
        workers,
        total_runs: workflows,
        warmup: Duration::from_millis(200),
        max_duration: Duration::from_secs(30),
        sample_interval: Duration::from_millis(100),
        target_rate: None,
    });

    runner.run(scenario).await;
    runner.metrics()
}

fn main() {
    let rt = Runtime::new().unwrap();
    let metrics = rt.block_on(run_chain_benchmark("chain_1000runs_10steps", 1_000, 10, 50));

    println!("\nGenerating benchmark report...");
    let report = BenchmarkReport::new(ReportConfig {
        output_dir: "target/benchmark-reports".to_string(),
        title: "Replay Throughput Benchmark".to_string(),
    });
    match report.generate(&metrics) {
        Ok(path) => println!("  report: {path}"),
        Err(e) => println!("  report failed: {e}"),
    }
}
