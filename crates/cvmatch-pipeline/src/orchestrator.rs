//! The matching run state machine.
//!
//! `Idle → Embedding → Indexing → Retrieving → Prompting → Generating`, ending in
//! `Completed`, `TimedOut`, `Cancelled` or `Failed`. At most one run is active per
//! orchestrator: starting a run cancels its predecessor and waits for it to tear down.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cvmatch_core::chunker::{embed_with_chunking, SlidingWindowChunker};
use cvmatch_core::postprocess::{clean_generated_text, split_candidate_sections};
use cvmatch_core::prompt::{build_prompt, candidate_blocks};
use cvmatch_core::{
    CancelToken, Embedding, IndexedCandidate, MatchError, MatchReport, MatchResult, MatchSettings, Result, RunLogger,
    ScoredCandidate, SettingsHandle, TracingRunLogger, NO_MATCHES_TEXT,
};

use crate::factory::{ServiceFactory, Services, StandardFactory};
use crate::relay::{DeliveryGate, PartialRelay, PartialSink};
use crate::state::{RunOutcome, RunState, RunStatus};

struct ActiveRun {
    token: CancelToken,
    gate: DeliveryGate,
}

/// Handle to a run that has been registered but not yet driven.
struct RunTicket {
    run_id: u64,
    token: CancelToken,
    gate: DeliveryGate,
}

/// Settles a run whose future is dropped mid-flight. The token is cancelled and
/// `Cancelled` published before the active slot is released.
struct RunGuard<'a> {
    orch: &'a Orchestrator,
    run_id: u64,
    token: CancelToken,
    serial: Option<tokio::sync::MutexGuard<'a, ()>>,
    settled: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.token.cancel();
            // only a run that got past the serial gate has published states
            if self.serial.is_some() {
                self.orch.logger.log_cancelled(self.run_id);
                self.orch.publish(self.run_id, RunState::Cancelled);
            }
        }
        let mut active = self.orch.active.lock();
        if active.as_ref().is_some_and(|run| run.token.same_as(&self.token)) {
            *active = None;
        }
    }
}

enum Generation {
    Finished(String),
    Failed(MatchError),
    TimedOut,
    Cancelled,
}

pub struct Orchestrator {
    factory: Arc<dyn ServiceFactory>,
    settings: SettingsHandle,
    logger: Arc<dyn RunLogger>,
    active: Mutex<Option<ActiveRun>>,
    run_gate: tokio::sync::Mutex<()>,
    run_seq: AtomicU64,
    status: watch::Sender<RunStatus>,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn ServiceFactory>, settings: SettingsHandle, logger: Arc<dyn RunLogger>) -> Self {
        let (status, _) = watch::channel(RunStatus { run_id: 0, state: RunState::Idle });
        Self {
            factory,
            settings,
            logger,
            active: Mutex::new(None),
            run_gate: tokio::sync::Mutex::new(()),
            run_seq: AtomicU64::new(0),
            status,
        }
    }

    /// Real capabilities with `tracing` logging.
    pub fn with_defaults(settings: SettingsHandle) -> Self {
        Self::new(Arc::new(StandardFactory::new()), settings, Arc::new(TracingRunLogger))
    }

    /// The configuration cell read at the start of each run.
    pub fn settings(&self) -> &SettingsHandle { &self.settings }

    pub fn subscribe_state(&self) -> watch::Receiver<RunStatus> { self.status.subscribe() }

    pub fn current_status(&self) -> RunStatus { *self.status.borrow() }

    /// Cancels the active run, if any. No partial output is delivered after this returns.
    pub fn cancel(&self) {
        let run = self.active.lock().as_ref().map(|run| (run.token.clone(), run.gate.clone()));
        if let Some((token, gate)) = run {
            gate.cancel_run(&token);
        }
    }

    /// Runs a match to completion on the current task.
    pub async fn run_match<F>(&self, job_description: &str, candidates: &[String], on_partial: F) -> RunOutcome
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let ticket = self.begin();
        self.drive(ticket, job_description, candidates, Arc::new(on_partial)).await
    }

    /// Supersedes the active run immediately, then drives the new one on a worker task.
    pub fn spawn_run(self: &Arc<Self>, job_description: String, candidates: Vec<String>, on_partial: PartialSink) -> JoinHandle<RunOutcome> {
        let ticket = self.begin();
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive(ticket, &job_description, &candidates, on_partial).await })
    }

    fn begin(&self) -> RunTicket {
        let run_id = self.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancelToken::new();
        let gate = DeliveryGate::default();
        let previous = self.active.lock().replace(ActiveRun { token: token.clone(), gate: gate.clone() });
        if let Some(prev) = previous {
            prev.gate.cancel_run(&prev.token);
            debug!(run_id, "superseding previous run");
        }
        RunTicket { run_id, token, gate }
    }

    async fn drive(&self, ticket: RunTicket, job_description: &str, candidates: &[String], sink: PartialSink) -> RunOutcome {
        let RunTicket { run_id, token, gate } = ticket;
        let mut guard = RunGuard { orch: self, run_id, token: token.clone(), serial: None, settled: false };
        // the previous run holds this until it has published its terminal state
        guard.serial = Some(self.run_gate.lock().await);
        let relay = PartialRelay::new(run_id, token.clone(), gate, sink, self.logger.clone());

        let outcome = match self.execute(run_id, &token, &relay, job_description, candidates).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancellation() => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed(e),
        };
        match &outcome {
            RunOutcome::Cancelled => self.logger.log_cancelled(run_id),
            RunOutcome::Failed(e) => self.logger.log_error(run_id, e),
            _ => {}
        }
        self.publish(run_id, outcome.state());
        guard.settled = true;
        outcome
    }

    async fn execute(
        &self,
        run_id: u64,
        token: &CancelToken,
        relay: &PartialRelay,
        job_description: &str,
        candidates: &[String],
    ) -> Result<RunOutcome> {
        token.check()?;
        let settings = self.settings.snapshot();
        settings.validate()?;
        let services = self.factory.compose(&settings)?;
        self.logger.log_run_start(run_id, &services.selection, candidates.len());
        if job_description.trim().is_empty() {
            return Err(MatchError::InvalidInput("job description is empty".into()));
        }

        let timeout = settings.generation.timeout()?;

        self.publish(run_id, RunState::Embedding);
        let chunker = chunker_for(&settings)?;
        until_cancelled(token, services.embedder.load_model()).await?;
        services.store.setup(services.embedder.dim()).await?;
        token.check()?;

        self.publish(run_id, RunState::Indexing);
        services.store.clear().await?;
        let mut indexed = Vec::with_capacity(candidates.len());
        for (position, text) in candidates.iter().enumerate() {
            token.check()?;
            if text.trim().is_empty() {
                warn!(run_id, position, "skipping empty candidate");
                continue;
            }
            let embedding = until_cancelled(token, embed(&services, chunker.as_ref(), text)).await?;
            token.check()?;
            indexed.push(IndexedCandidate::new(position, text.clone(), embedding));
        }
        services.store.index(indexed).await?;
        token.check()?;

        self.publish(run_id, RunState::Retrieving);
        // the query is embedded whole; chunk averaging is for candidates only
        let query = until_cancelled(token, services.embedder.embed(job_description)).await?;
        let hits = services.store.search(&query, settings.retrieval.top_k, settings.retrieval.min_score).await?;
        token.check()?;
        debug!(run_id, hits = hits.len(), "retrieved");
        if hits.is_empty() {
            self.logger.log_result(run_id, NO_MATCHES_TEXT, Duration::ZERO);
            return Ok(RunOutcome::Completed(MatchReport {
                run_id,
                selection: services.selection,
                matches: Vec::new(),
                explanation: NO_MATCHES_TEXT.to_string(),
            }));
        }

        self.publish(run_id, RunState::Prompting);
        let ranked: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        let prompt = build_prompt(services.prompt_version, job_description, &candidate_blocks(&ranked), hits.len());
        self.logger.log_prompt(run_id, &prompt);

        // one deadline covers loading the generator and streaming from it
        let started = Instant::now();
        let on_partial = |cumulative: &str| relay.deliver(cumulative);
        let timed = async {
            services.generator.load_model().await?;
            token.check()?;
            self.publish(run_id, RunState::Generating);
            let text = services.generator.generate(&prompt, &on_partial).await?;
            Ok::<_, MatchError>(text)
        };
        let generation = tokio::select! {
            biased;
            _ = token.cancelled() => Generation::Cancelled,
            res = tokio::time::timeout(timeout, timed) => match res {
                Ok(Ok(text)) => Generation::Finished(text),
                Ok(Err(e)) => Generation::Failed(e),
                Err(_) => Generation::TimedOut,
            },
        };

        let matches = || hits.iter().map(MatchResult::pending).collect::<Vec<_>>();
        match generation {
            Generation::Cancelled => Err(MatchError::Cancelled),
            Generation::Failed(e) => Err(e),
            Generation::TimedOut => {
                self.logger.log_timeout(run_id, timeout);
                Ok(RunOutcome::TimedOut { matches: matches(), partial: relay.partial() })
            }
            Generation::Finished(text) => {
                token.check()?;
                let explanation = clean_generated_text(&text);
                self.logger.log_result(run_id, &explanation, started.elapsed());
                Ok(RunOutcome::Completed(MatchReport {
                    run_id,
                    selection: services.selection,
                    matches: attach_sections(&hits, &explanation),
                    explanation,
                }))
            }
        }
    }

    fn publish(&self, run_id: u64, state: RunState) {
        self.logger.log_state(run_id, state.as_str());
        self.status.send_replace(RunStatus { run_id, state });
    }
}

fn chunker_for(settings: &MatchSettings) -> Result<Option<SlidingWindowChunker>> {
    if !settings.chunking.enabled { return Ok(None); }
    SlidingWindowChunker::new(settings.chunking.window_size, settings.chunking.stride).map(Some)
}

async fn embed(services: &Services, chunker: Option<&SlidingWindowChunker>, text: &str) -> Result<Embedding> {
    match chunker {
        Some(chunker) => embed_with_chunking(chunker, services.embedder.as_ref(), text).await,
        None => services.embedder.embed(text).await,
    }
}

/// Races `fut` against the token.
async fn until_cancelled<T>(token: &CancelToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MatchError::Cancelled),
        res = fut => res,
    }
}

fn attach_sections(hits: &[ScoredCandidate], explanation: &str) -> Vec<MatchResult> {
    let sections = split_candidate_sections(explanation);
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut result = MatchResult::pending(hit);
            if let Some((_, body)) = sections.iter().find(|(rank, _)| *rank == i + 1) {
                result.explanation = body.clone();
            }
            result
        })
        .collect()
}
