//! Composes an embedder, a vector store and a generator into one matching run.

pub mod factory;
pub mod orchestrator;
pub mod relay;
pub mod state;

pub use factory::{ServiceFactory, Services, StandardFactory};
pub use orchestrator::Orchestrator;
pub use relay::{DeliveryGate, PartialRelay, PartialSink};
pub use state::{RunOutcome, RunState, RunStatus};
