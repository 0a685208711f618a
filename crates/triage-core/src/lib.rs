//! Fraud triage pipeline, case ledger, and cross-cutting safety envelope.
//!
//! This crate enforces the investigation pipeline's stage ordering, the case
//! ledger's hash-chain integrity, deterministic risk policy, and the rate
//! limiting / redaction / idempotency / pagination concerns every HTTP
//! boundary in `triage-service` depends on.

#![deny(unsafe_code)]

pub mod error;
pub mod events;
pub mod flow;
pub mod idempotency;
pub mod insights;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod pagination;
pub mod policy;
pub mod ratelimit;
pub mod redaction;
pub mod storage;
pub mod types;

pub use error::TriageError;
pub use events::{EventSink, RunHandle, RunRegistry, TriageEvent, TriageEventFrame, LATE_JOIN_WINDOW};
pub use flow::{TriageStage, TriageStageMachine};
pub use idempotency::IdempotencyCache;
pub use insights::{summarize, InsightsSummary};
pub use ledger::CaseLedger;
pub use metrics::Metrics;
pub use orchestrator::{FaultInjector, TriageEngine, TriageEngineConfig};
pub use pagination::{clamp_limit, paginate, Cursor, Page};
pub use policy::{RiskDecision, RiskPolicyConfig, RiskPolicyEngine, RiskSignalInputs};
pub use ratelimit::{Admission, CoordinationStore, RateLimiter, RateLimiterConfig};
pub use redaction::{RedactedString, Redactor};
pub use storage::{
    card_freeze_case, dispute_case, false_positive_case, operator_actor, DisputeOutcome,
    PersistenceAdapter, TransactionPage, TransactionQuery,
};
pub use types::{
    Account, Actor, AgentStep, AgentTrace, Alert, AlertRisk, AlertStatus, Card, CardNetwork,
    CardStatus, Case, CaseEvent, CaseStatus, CaseType, Customer, KbDoc, KycLevel, PolicyRow,
    Recommendation, StepOutcome, Transaction, TransactionStatus, TriageResult, TriageRun,
};
