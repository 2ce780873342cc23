use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, ReentrantMutex};

use cvmatch_core::postprocess::clean_generated_text;
use cvmatch_core::{CancelToken, PartialFn, RunLogger};

pub type PartialSink = Arc<PartialFn<'static>>;

/// Delivery lock shared by a run's relay and whoever cancels it.
///
/// Cancelling under this lock waits out an in-flight delivery, so once
/// `cancel_run` returns the run cannot reach its sink again. The lock is
/// reentrant: a sink may cancel or supersede its own run from inside a delivery.
#[derive(Clone, Default)]
pub struct DeliveryGate(Arc<ReentrantMutex<()>>);

impl DeliveryGate {
    pub fn cancel_run(&self, token: &CancelToken) {
        let _held = self.0.lock();
        token.cancel();
    }
}

/// Forwards cleaned cumulative partials from the generator to the caller's sink.
pub struct PartialRelay {
    run_id: u64,
    token: CancelToken,
    gate: DeliveryGate,
    sink: PartialSink,
    logger: Arc<dyn RunLogger>,
    started: Instant,
    index: AtomicUsize,
    raw: Mutex<String>,
    delivered: Mutex<String>,
}

impl PartialRelay {
    pub fn new(run_id: u64, token: CancelToken, gate: DeliveryGate, sink: PartialSink, logger: Arc<dyn RunLogger>) -> Self {
        Self {
            run_id,
            token,
            gate,
            sink,
            logger,
            started: Instant::now(),
            index: AtomicUsize::new(0),
            raw: Mutex::new(String::new()),
            delivered: Mutex::new(String::new()),
        }
    }

    pub fn deliver(&self, cumulative: &str) {
        *self.raw.lock() = cumulative.to_string();
        let cleaned = clean_generated_text(cumulative);
        let _held = self.gate.0.lock();
        if self.token.is_cancelled() { return; }
        {
            let mut last = self.delivered.lock();
            if *last == cleaned { return; }
            last.clone_from(&cleaned);
        }
        let index = self.index.fetch_add(1, Ordering::SeqCst);
        self.logger.log_prediction(self.run_id, &cleaned, index, self.started.elapsed());
        (self.sink)(&cleaned);
    }

    /// Cleaned text of everything streamed so far.
    pub fn partial(&self) -> String {
        clean_generated_text(&self.raw.lock())
    }

    pub fn deliveries(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvmatch_core::TracingRunLogger;

    fn relay(token: &CancelToken, gate: &DeliveryGate, seen: &Arc<Mutex<Vec<String>>>) -> PartialRelay {
        let sink_seen = seen.clone();
        let sink: PartialSink = Arc::new(move |p: &str| sink_seen.lock().push(p.to_string()));
        PartialRelay::new(1, token.clone(), gate.clone(), sink, Arc::new(TracingRunLogger))
    }

    #[test]
    fn cleans_and_skips_duplicates() {
        let (token, gate) = (CancelToken::new(), DeliveryGate::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let r = relay(&token, &gate, &seen);
        r.deliver("**Best");
        r.deliver("**Best**");
        r.deliver("**Best** fit");
        assert_eq!(*seen.lock(), vec!["Best".to_string(), "Best fit".to_string()]);
        assert_eq!(r.deliveries(), 2);
    }

    #[test]
    fn nothing_after_cancel() {
        let (token, gate) = (CancelToken::new(), DeliveryGate::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let r = relay(&token, &gate, &seen);
        r.deliver("one");
        gate.cancel_run(&token);
        r.deliver("one two");
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(r.partial(), "one two", "partial text is still tracked");
    }

    #[test]
    fn sink_may_cancel_its_own_run() {
        let (token, gate) = (CancelToken::new(), DeliveryGate::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sink_token, sink_gate, sink_seen) = (token.clone(), gate.clone(), seen.clone());
        let sink: PartialSink = Arc::new(move |p: &str| {
            sink_seen.lock().push(p.to_string());
            sink_gate.cancel_run(&sink_token);
        });
        let r = PartialRelay::new(1, token.clone(), gate, sink, Arc::new(TracingRunLogger));
        r.deliver("stop here");
        r.deliver("stop here please");
        assert!(token.is_cancelled());
        assert_eq!(*seen.lock(), vec!["stop here".to_string()]);
    }
}
