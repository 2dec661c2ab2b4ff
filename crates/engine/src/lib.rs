pub mod diagnose;
pub mod error;
pub mod export;
pub mod extract;
pub mod orchestrator;
pub mod prompt;
pub mod repair;
pub mod verify;

pub use diagnose::DiagnosticAgent;
pub use error::EngineError;
pub use export::CaseOutcome;
pub use extract::SemanticExtractor;
pub use orchestrator::Orchestrator;
pub use verify::ReconstructionVerifier;
