// gRPC boundary for interaction-service
//
// `server.rs` maps the `nova.interaction_service.v2` schema onto the
// orchestrator; `admission.rs` holds the request-rate gate.

pub mod admission;
pub mod server;

pub use admission::AdmissionInterceptor;
pub use server::{proto, InteractionServiceImpl};
