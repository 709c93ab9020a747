//! # Overture Agent
//!
//! The turn orchestrator: one call per user message, owning the entire
//! lifetime of that turn — context assembly, provider streaming, tool
//! governance and execution, recovery from hallucinated tool syntax, and
//! finalization. Everything the orchestrator touches beyond this crate is a
//! trait seam defined in `overture-core`.

pub mod budget;
pub mod governance;
pub mod orchestrator;
pub mod recovery;
pub mod stream_event;
pub mod test_support;

pub use orchestrator::{TurnOrchestrator, TurnOutcome, TurnParams};
pub use stream_event::{EventSink, TurnEvent};
