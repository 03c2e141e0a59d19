//! Brand citation analysis for generative answer engines.
//!
//! [`pipeline`] asks a grounded answer engine a batch of probe questions about a
//! site and ranks the domains it cites. [`structure`] scores how well a single
//! page is laid out for machine readers.

pub mod engine;
pub mod error;
pub mod net;
pub mod pipeline;
pub mod structure;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{AnswerEngine, EngineRequest, EngineResponse, GeminiClient};
pub use error::{EngineError, NotReady, SubmitError, ValidationError};
pub use pipeline::{Orchestrator, OrchestratorConfig};
pub use structure::{StructureAnalyzer, StructureReport};
