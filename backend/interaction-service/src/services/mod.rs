pub mod orchestrator;

pub use orchestrator::{
    CachePolicy, InteractionOrchestrator, MutationOutcome, OrchestratorConfig, Warning,
};
