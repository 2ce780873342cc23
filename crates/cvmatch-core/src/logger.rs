use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::PipelineSelection;
use crate::error::MatchError;

/// Side-effecting run log. Implementations must not panic; nothing here can fail a run.
pub trait RunLogger: Send + Sync {
    fn log_run_start(&self, run_id: u64, selection: &PipelineSelection, candidates: usize);
    fn log_state(&self, run_id: u64, state: &str);
    fn log_prompt(&self, run_id: u64, prompt: &str);
    fn log_prediction(&self, run_id: u64, partial: &str, index: usize, elapsed: Duration);
    fn log_result(&self, run_id: u64, result: &str, elapsed: Duration);
    fn log_error(&self, run_id: u64, error: &MatchError);
    fn log_cancelled(&self, run_id: u64);
    fn log_timeout(&self, run_id: u64, timeout: Duration);
}

/// Emits every event through `tracing` with a `run_id` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRunLogger;

impl RunLogger for TracingRunLogger {
    fn log_run_start(&self, run_id: u64, selection: &PipelineSelection, candidates: usize) {
        info!(
            run_id,
            candidates,
            embedding = %selection.embedding_model,
            generator = %selection.generative_model,
            backend = %selection.retrieval_backend,
            prompt = %selection.prompt_version,
            "matching run started"
        );
    }

    fn log_state(&self, run_id: u64, state: &str) {
        debug!(run_id, state, "run state");
    }

    fn log_prompt(&self, run_id: u64, prompt: &str) {
        debug!(run_id, chars = prompt.len(), prompt, "prompt rendered");
    }

    fn log_prediction(&self, run_id: u64, partial: &str, index: usize, elapsed: Duration) {
        debug!(run_id, index, elapsed_ms = elapsed.as_millis() as u64, chars = partial.len(), "partial prediction");
    }

    fn log_result(&self, run_id: u64, result: &str, elapsed: Duration) {
        info!(run_id, elapsed_ms = elapsed.as_millis() as u64, chars = result.len(), "generation finished");
    }

    fn log_error(&self, run_id: u64, error: &MatchError) {
        warn!(run_id, error = %error, "run failed");
    }

    fn log_cancelled(&self, run_id: u64) {
        info!(run_id, "run cancelled");
    }

    fn log_timeout(&self, run_id: u64, timeout: Duration) {
        warn!(run_id, timeout_secs = timeout.as_secs_f64(), "inference timed out");
    }
}
