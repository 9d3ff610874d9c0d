pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod routing;
pub mod rules;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::{AppConfig, LoadOptions};
pub use domain::evidence::{EvidenceEntry, EvidenceFamily, EvidenceLedger, EvidenceTag};
pub use domain::intent::Intent;
pub use domain::state::{ConversationResult, ConversationState, EscalationReason};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use routing::{PipelineStage, RoutingTable, StageEvent, Transition};
pub use rules::GuardrailRules;
